use std::path::Path;

use super::packet::{SyncAction, SyncFileType, SyncPacket, STOP_POSITION};
use super::transport::SyncTransport;

const SEQUENCE_INTERVAL_MS: u32 = 1000;
const MEDIA_INTERVAL_MS: u32 = 1000;
/// Media syncs also wait this long after the last sequence sync.
const MEDIA_AFTER_SEQUENCE_MS: u32 = 500;

/// Master side of FPP sync. Tracks what was last announced on the sequence and media
/// channels and throttles periodic syncs. Without a transport every call is a no-op.
pub struct SyncSession {
    transport: Option<Box<dyn SyncTransport>>,
    last_sequence: String,
    last_sequence_ms: u32,
    last_media: String,
    last_media_ms: u32,
    scratch: Vec<u8>,
    packets_sent: u64,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::inert()
    }
}

impl SyncSession {
    pub fn inert() -> Self {
        Self {
            transport: None,
            last_sequence: String::new(),
            last_sequence_ms: 0,
            last_media: String::new(),
            last_media_ms: 0,
            scratch: Vec::with_capacity(256),
            packets_sent: 0,
        }
    }

    pub fn with_transport(transport: Box<dyn SyncTransport>) -> Self {
        let mut session = Self::inert();
        session.transport = Some(transport);
        session
    }

    pub fn is_active(&self) -> bool {
        self.transport.is_some()
    }

    pub fn set_transport(&mut self, transport: Option<Box<dyn SyncTransport>>) {
        if transport.is_none() {
            self.stop_all();
        }
        self.transport = transport;
        self.reset();
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    fn reset(&mut self) {
        self.last_sequence.clear();
        self.last_sequence_ms = 0;
        self.last_media.clear();
        self.last_media_ms = 0;
    }

    /// Stop whatever was last announced on both channels.
    pub fn stop_all(&mut self) {
        self.send_sync("", STOP_POSITION, 50);
    }

    /// Stop the last announced sequence, leaving the media channel alone.
    pub fn stop_sequence(&mut self) {
        if !self.last_sequence.is_empty() {
            let last = self.last_sequence.clone();
            self.send_sync(&last, STOP_POSITION, 50);
        }
    }

    /// Announce that `item` is at `msec`. Zero means just started and `STOP_POSITION` means
    /// stopped; anything else is a periodic sync subject to throttling.
    pub fn send_sync(&mut self, item: &str, msec: u32, frame_ms: u32) {
        if item.is_empty() {
            if !self.last_sequence.is_empty() {
                let last = self.last_sequence.clone();
                self.send_sync(&last, STOP_POSITION, 50);
            }
            if !self.last_media.is_empty() {
                let last = self.last_media.clone();
                self.send_sync(&last, STOP_POSITION, 50);
            }
            return;
        }

        if self.transport.is_none() {
            return;
        }

        let mut due = msec == 0 || msec == STOP_POSITION;

        if is_sequence(item) {
            if self.last_sequence != item {
                if !self.last_sequence.is_empty() {
                    let last = self.last_sequence.clone();
                    self.send_sync(&last, STOP_POSITION, frame_ms);
                }
                self.last_sequence = item.to_string();
                if msec != 0 {
                    self.send_sync(item, 0, frame_ms);
                }
            }

            // Wrapping keeps a position that jumped backwards due.
            if !due && msec.wrapping_sub(self.last_sequence_ms) > SEQUENCE_INTERVAL_MS {
                due = true;
            }
        } else {
            if self.last_media != item {
                if !self.last_media.is_empty() {
                    let last = self.last_media.clone();
                    self.send_sync(&last, STOP_POSITION, frame_ms);
                }
                self.last_media = item.to_string();
                if msec != 0 {
                    self.send_sync(item, 0, frame_ms);
                }
            }

            if !due
                && msec.wrapping_sub(self.last_media_ms) > MEDIA_INTERVAL_MS
                && msec.wrapping_sub(self.last_sequence_ms) > MEDIA_AFTER_SEQUENCE_MS
            {
                due = true;
            }
        }

        if due {
            self.transmit(item, msec, frame_ms);
        }
    }

    fn transmit(&mut self, item: &str, msec: u32, frame_ms: u32) {
        let action = match msec {
            0 => SyncAction::Start,
            STOP_POSITION => SyncAction::Stop,
            _ => SyncAction::Sync,
        };

        let (file_type, mut frame) = if is_sequence(item) {
            self.last_sequence_ms = msec;
            if action == SyncAction::Stop {
                self.last_sequence.clear();
                self.last_sequence_ms = 0;
            }
            (SyncFileType::Sequence, msec / frame_ms.max(1))
        } else {
            self.last_media_ms = msec;
            if action == SyncAction::Stop {
                self.last_media.clear();
                self.last_media_ms = 0;
            }
            (SyncFileType::Media, 0)
        };

        let seconds = if action == SyncAction::Sync {
            msec as f32 / 1000.0
        } else {
            frame = 0;
            0.0
        };

        let packet = SyncPacket {
            action,
            file_type,
            frame,
            seconds,
            filename: file_name(item),
        };
        packet.encode_into(&mut self.scratch);

        if let Some(transport) = self.transport.as_mut() {
            match transport.send(&self.scratch) {
                Ok(()) => {
                    self.packets_sent += 1;
                    log::debug!("FPP sync {:?} {} frame {}", action, packet.filename, frame);
                }
                Err(e) => log::debug!("FPP sync send failed: {}", e),
            }
        }
    }
}

fn is_sequence(item: &str) -> bool {
    Path::new(item)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("fseq"))
}

fn file_name(item: &str) -> String {
    Path::new(item)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| item.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::transport::MemoryTransport;

    fn decoded(transport: &MemoryTransport) -> Vec<(SyncAction, SyncFileType, String, u32)> {
        transport
            .sent()
            .iter()
            .map(|b| {
                let p = SyncPacket::decode(b).unwrap();
                (p.action, p.file_type, p.filename, p.frame)
            })
            .collect()
    }

    #[test]
    fn test_inert_session_sends_nothing() {
        let mut session = SyncSession::inert();
        session.send_sync("a.fseq", 0, 50);
        session.stop_all();
        assert_eq!(session.packets_sent(), 0);
    }

    #[test]
    fn test_sequence_throttle() {
        let transport = MemoryTransport::new();
        let mut session = SyncSession::with_transport(Box::new(transport.clone()));

        // Ticks every 50ms for three seconds.
        for msec in (50..=3000).step_by(50) {
            session.send_sync("/show/a.fseq", msec, 50);
        }

        let packets = decoded(&transport);
        assert_eq!(packets[0], (SyncAction::Start, SyncFileType::Sequence, "a.fseq".to_string(), 0));
        let syncs: Vec<u32> = packets
            .iter()
            .filter(|p| p.0 == SyncAction::Sync)
            .map(|p| p.3)
            .collect();
        // 1050ms and 2100ms at 50ms per frame.
        assert_eq!(syncs, vec![21, 42]);
    }

    #[test]
    fn test_filename_change_stops_then_starts() {
        let transport = MemoryTransport::new();
        let mut session = SyncSession::with_transport(Box::new(transport.clone()));

        session.send_sync("a.fseq", 100, 50);
        transport.clear();
        session.send_sync("b.fseq", 150, 50);

        let packets = decoded(&transport);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].0, SyncAction::Stop);
        assert_eq!(packets[0].2, "a.fseq");
        assert_eq!(packets[1].0, SyncAction::Start);
        assert_eq!(packets[1].2, "b.fseq");
    }

    #[test]
    fn test_media_waits_for_sequence() {
        let transport = MemoryTransport::new();
        let mut session = SyncSession::with_transport(Box::new(transport.clone()));

        session.send_sync("a.fseq", 0, 50);
        session.send_sync("a.mp3", 0, 50);
        session.send_sync("a.fseq", 1100, 50);
        transport.clear();

        // Media is over a second stale but the sequence synced 100ms ago.
        session.send_sync("a.mp3", 1200, 50);
        assert!(transport.sent().is_empty());

        session.send_sync("a.mp3", 1700, 50);
        let packets = decoded(&transport);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].1, SyncFileType::Media);
        assert_eq!(packets[0].3, 0);
    }

    #[test]
    fn test_stop_sequence_leaves_media_playing() {
        let transport = MemoryTransport::new();
        let mut session = SyncSession::with_transport(Box::new(transport.clone()));

        session.send_sync("a.fseq", 0, 50);
        session.send_sync("a.mp3", 0, 50);
        transport.clear();
        session.stop_sequence();
        session.stop_sequence();

        let packets = decoded(&transport);
        assert_eq!(
            packets,
            vec![(SyncAction::Stop, SyncFileType::Sequence, "a.fseq".to_string(), 0)]
        );

        transport.clear();
        session.stop_all();
        let packets = decoded(&transport);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].1, SyncFileType::Media);
    }

    #[test]
    fn test_stop_all_clears_channels() {
        let transport = MemoryTransport::new();
        let mut session = SyncSession::with_transport(Box::new(transport.clone()));

        session.send_sync("a.fseq", 0, 50);
        session.send_sync("a.mp3", 0, 50);
        transport.clear();
        session.stop_all();

        let packets = decoded(&transport);
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.0 == SyncAction::Stop));

        transport.clear();
        session.stop_all();
        assert!(transport.sent().is_empty());
    }
}
