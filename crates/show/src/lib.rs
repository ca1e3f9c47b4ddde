//! Show model for Marquee
//!
//! Playlists, their steps and items, and the schedules that activate them. Everything here is
//! plain data plus the playback state machine of a single playlist; arbitration between
//! playlists lives in `marquee-core`.

use std::sync::atomic::{AtomicU32, Ordering};

pub use error::ShowError;
pub use item::{BlendMode, ItemKind, PlaylistItem};
pub use playlist::Playlist;
pub use schedule::Schedule;
pub use step::PlaylistStep;

mod error;
mod item;
mod playlist;
mod schedule;
mod step;

/// Frame period used when a step has no sequence telling us otherwise.
pub const DEFAULT_FRAME_MS: u32 = 50;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a fresh identifier for a playlist, step, item or schedule.
pub fn next_id() -> u32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Make sure ids handed out from now on never collide with ids loaded from disk.
pub fn reserve_ids(max_loaded: u32) {
    NEXT_ID.fetch_max(max_loaded.saturating_add(1), Ordering::Relaxed);
}

/// Format a millisecond count as `m:ss.mmm`.
pub fn format_time(ms: u32) -> String {
    format!("{}:{:02}.{:03}", ms / 60000, (ms % 60000) / 1000, ms % 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "0:00.000");
        assert_eq!(format_time(61_250), "1:01.250");
        assert_eq!(format_time(3_599_999), "59:59.999");
    }

    #[test]
    fn test_reserve_ids_skips_loaded_range() {
        reserve_ids(10_000);
        assert!(next_id() > 10_000);
    }
}
