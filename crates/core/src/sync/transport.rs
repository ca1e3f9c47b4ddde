use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use super::packet::SyncError;

/// Where master sync packets are written.
pub trait SyncTransport: Send {
    fn send(&mut self, packet: &[u8]) -> Result<(), SyncError>;
}

/// Non-blocking UDP socket broadcasting to every peer on the control port.
pub struct UdpBroadcastTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpBroadcastTransport {
    pub fn open(local_ip: IpAddr, port: u16) -> Result<Self, SyncError> {
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        log::info!(
            "FPP sync master socket open on {}, sending to port {}",
            socket.local_addr()?,
            port
        );

        Ok(Self {
            socket,
            destination: SocketAddr::from(([255, 255, 255, 255], port)),
        })
    }
}

impl SyncTransport for UdpBroadcastTransport {
    fn send(&mut self, packet: &[u8]) -> Result<(), SyncError> {
        self.socket.send_to(packet, self.destination)?;
        Ok(())
    }
}

/// Keeps sent packets in memory. Clones share the recording.
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl SyncTransport for MemoryTransport {
    fn send(&mut self, packet: &[u8]) -> Result<(), SyncError> {
        self.sent.lock().push(packet.to_vec());
        Ok(())
    }
}
