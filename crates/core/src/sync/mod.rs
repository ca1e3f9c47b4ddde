pub mod packet;
pub mod sync_session;
pub mod transport;

pub use packet::{
    SyncAction, SyncError, SyncFileType, SyncPacket, FPP_CTRL_PORT, MIN_PACKET_LEN, STOP_POSITION,
};
pub use sync_session::SyncSession;
pub use transport::{MemoryTransport, SyncTransport, UdpBroadcastTransport};
