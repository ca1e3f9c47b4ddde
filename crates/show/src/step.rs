use serde::{Deserialize, Serialize};

use crate::item::{file_name, items_frame_ms};
use crate::{format_time, next_id, PlaylistItem};

/// A timed unit of a playlist. The step is as long as its longest item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaylistStep {
    pub id: u32,
    pub name: String,
    pub items: Vec<PlaylistItem>,
    /// Extra times the step repeats before the playlist moves on.
    #[serde(default)]
    pub loops: u32,

    #[serde(skip)]
    position_ms: u32,
    #[serde(skip)]
    loops_left: u32,
    #[serde(skip)]
    running: bool,
    #[serde(skip)]
    paused: bool,
}

impl PlaylistStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            items: Vec::new(),
            loops: 0,
            position_ms: 0,
            loops_left: 0,
            running: false,
            paused: false,
        }
    }

    pub fn with_item(mut self, item: PlaylistItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn start(&mut self) {
        self.position_ms = 0;
        self.loops_left = self.loops;
        self.running = true;
        self.paused = false;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.position_ms = 0;
    }

    pub fn restart(&mut self) {
        self.position_ms = 0;
        self.running = true;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn position_ms(&self) -> u32 {
        self.position_ms
    }

    pub fn loops_left(&self) -> u32 {
        self.loops_left
    }

    pub fn set_loops_left(&mut self, loops: u32) {
        self.loops_left = loops;
    }

    pub fn length_ms(&self) -> u32 {
        self.items.iter().map(PlaylistItem::end_ms).max().unwrap_or(0)
    }

    pub fn frame_ms(&self) -> u32 {
        items_frame_ms(&self.items)
    }

    /// Render the current position and advance by one frame period.
    /// Returns true once the step (including its repeats) has played out.
    pub fn frame(&mut self, buffer: &mut [u8], output: bool) -> bool {
        if output {
            for item in &self.items {
                item.render(buffer, self.position_ms);
            }
        }

        if self.paused {
            return false;
        }

        self.position_ms = self.position_ms.saturating_add(self.frame_ms());
        if self.position_ms < self.length_ms() {
            return false;
        }

        if self.loops_left > 0 {
            self.loops_left -= 1;
            self.position_ms = 0;
            return false;
        }

        true
    }

    /// Sequence file that peers should follow while this step plays.
    pub fn sync_sequence_file(&self) -> Option<&str> {
        self.items.iter().find_map(PlaylistItem::sequence_file)
    }

    pub fn sync_media_file(&self) -> Option<&str> {
        self.items.iter().find_map(PlaylistItem::media_file)
    }

    /// Whether this step plays the named sequence. Peers only send the file name, so directories
    /// are ignored.
    pub fn is_running_sequence(&self, file: &str) -> bool {
        let wanted = file_name(file);
        self.items
            .iter()
            .filter_map(PlaylistItem::sequence_file)
            .any(|f| file_name(f).eq_ignore_ascii_case(&wanted))
    }

    /// Reposition to match a peer. Frame-indexed steps use the frame number, others the clock.
    pub fn set_sync_position(&mut self, frame: u32, ms: u32) {
        let target = match self.items.iter().find_map(PlaylistItem::frame_ms) {
            Some(frame_ms) => frame.saturating_mul(frame_ms),
            None => ms,
        };
        self.position_ms = target.min(self.length_ms());
    }

    pub fn item(&self, name: &str) -> Option<&PlaylistItem> {
        self.items.iter().find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn has_item(&self, name: &str) -> bool {
        self.item(name).is_some()
    }

    pub fn status(&self) -> String {
        format!(
            "{}/{}",
            format_time(self.position_ms),
            format_time(self.length_ms())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_frame_step() -> PlaylistStep {
        PlaylistStep::new("Song")
            .with_item(PlaylistItem::sequence("song.fseq", 25, vec![vec![9], vec![8]]))
    }

    #[test]
    fn test_step_plays_out_after_length() {
        let mut step = two_frame_step();
        step.start();
        let mut buffer = [0u8; 1];

        assert!(!step.frame(&mut buffer, true));
        assert_eq!(buffer, [9]);
        assert!(step.frame(&mut buffer, true));
        assert_eq!(buffer, [8]);
    }

    #[test]
    fn test_step_repeats_loops() {
        let mut step = two_frame_step();
        step.loops = 1;
        step.start();
        let mut buffer = [0u8; 1];

        assert!(!step.frame(&mut buffer, false));
        assert!(!step.frame(&mut buffer, false));
        assert_eq!(step.position_ms(), 0);
        assert!(!step.frame(&mut buffer, false));
        assert!(step.frame(&mut buffer, false));
    }

    #[test]
    fn test_paused_step_holds_position() {
        let mut step = two_frame_step();
        step.start();
        step.set_paused(true);
        let mut buffer = [0u8; 1];
        assert!(!step.frame(&mut buffer, true));
        assert_eq!(step.position_ms(), 0);
    }

    #[test]
    fn test_sync_position_uses_frames() {
        let mut step = two_frame_step();
        step.start();
        step.set_sync_position(1, 999);
        assert_eq!(step.position_ms(), 25);
        assert!(step.is_running_sequence("/var/shows/SONG.fseq"));
        assert!(!step.is_running_sequence("other.fseq"));
    }
}
