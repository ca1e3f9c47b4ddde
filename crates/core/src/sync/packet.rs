//! FPP control packets. Layout (little endian, packed):
//!
//! ```text
//! 0  "FPPD"
//! 4  packet type (1 = sync)
//! 5  extra data length, u16
//! 7  sync type (0 start, 1 stop, 2 sync)
//! 8  file type (0 sequence, 1 media)
//! 9  frame number, u32
//! 13 seconds elapsed, f32
//! 17 file name, null terminated
//! ```

use thiserror::Error;

pub const FPP_CTRL_PORT: u16 = 32320;

/// Position value meaning "stopped".
pub const STOP_POSITION: u32 = u32::MAX;

const MAGIC: &[u8; 4] = b"FPPD";
const CTRL_PKT_SYNC: u8 = 1;
const CONTROL_HEADER_LEN: usize = 7;
const SYNC_HEADER_LEN: usize = 10;

/// Header plus an empty, null terminated file name.
pub const MIN_PACKET_LEN: usize = CONTROL_HEADER_LEN + SYNC_HEADER_LEN + 1;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("packet is {0} bytes, need at least 18")]
    TooShort(usize),
    #[error("packet does not start with FPPD")]
    BadMagic,
    #[error("control packet type {0} is not a sync packet")]
    NotSync(u8),
    #[error("unknown sync packet type {0}")]
    UnknownAction(u8),
    #[error("unknown sync file type {0}")]
    UnknownFileType(u8),
    #[error("sync socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    Start = 0,
    Stop = 1,
    Sync = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncFileType {
    Sequence = 0,
    Media = 1,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncPacket {
    pub action: SyncAction,
    pub file_type: SyncFileType,
    pub frame: u32,
    pub seconds: f32,
    pub filename: String,
}

impl SyncPacket {
    /// Append the wire form to `out`, which is cleared first so callers can reuse it.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let name = self.filename.as_bytes();
        out.clear();
        out.extend_from_slice(MAGIC);
        out.push(CTRL_PKT_SYNC);
        out.extend_from_slice(&((SYNC_HEADER_LEN + 1 + name.len()) as u16).to_le_bytes());
        out.push(self.action as u8);
        out.push(self.file_type as u8);
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.extend_from_slice(&self.seconds.to_le_bytes());
        out.extend_from_slice(name);
        out.push(0);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_PACKET_LEN + self.filename.len());
        self.encode_into(&mut out);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SyncError> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(SyncError::TooShort(buf.len()));
        }
        if &buf[0..4] != MAGIC {
            return Err(SyncError::BadMagic);
        }
        if buf[4] != CTRL_PKT_SYNC {
            return Err(SyncError::NotSync(buf[4]));
        }

        let action = match buf[7] {
            0 => SyncAction::Start,
            1 => SyncAction::Stop,
            2 => SyncAction::Sync,
            other => return Err(SyncError::UnknownAction(other)),
        };
        let file_type = match buf[8] {
            0 => SyncFileType::Sequence,
            1 => SyncFileType::Media,
            other => return Err(SyncError::UnknownFileType(other)),
        };
        let frame = u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]);
        let seconds = f32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]);

        let name = &buf[17..];
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        let filename = String::from_utf8_lossy(&name[..end]).into_owned();

        Ok(Self {
            action,
            file_type,
            frame,
            seconds,
            filename,
        })
    }
}
