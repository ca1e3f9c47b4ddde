use marquee_show::{Playlist, Schedule, ShowError};

/// An active schedule paired with the playlist copy it is playing.
///
/// Both are clones. Changes such as an extended end time stay with the running copy.
#[derive(Clone, Debug)]
pub struct RunningSchedule {
    pub schedule: Schedule,
    pub playlist: Playlist,
}

impl RunningSchedule {
    pub fn new(playlist: &Playlist, schedule: &Schedule) -> Self {
        Self {
            schedule: schedule.clone(),
            playlist: playlist.clone(),
        }
    }

    /// Start held back until arbitration lets it play.
    pub fn start_suspended(&mut self) -> Result<(), ShowError> {
        self.playlist.start_suspended(
            self.schedule.loop_playlist,
            self.schedule.random,
            self.schedule.loops,
            None,
        )
    }

    /// Play again from the top, dropping any end time extension.
    pub fn reset(&mut self) -> Result<(), ShowError> {
        self.playlist.stop();
        self.schedule.reset();
        self.start_suspended()
    }

    pub fn priority(&self) -> u8 {
        self.schedule.priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_show::{PlaylistItem, PlaylistStep};

    #[test]
    fn test_reset_starts_over() {
        let playlist = Playlist::new("Carols")
            .with_step(PlaylistStep::new("A").with_item(PlaylistItem::delay(100)))
            .with_step(PlaylistStep::new("B").with_item(PlaylistItem::delay(100)));
        let schedule = Schedule::always("Nightly", 3).unwrap();

        let mut running = RunningSchedule::new(&playlist, &schedule);
        running.start_suspended().unwrap();
        assert!(running.playlist.is_suspended());

        running.playlist.suspend(false);
        running.playlist.jump_to_step("B");
        running.schedule.add_mins_to_end_time(30);

        running.reset().unwrap();
        assert!(running.playlist.is_suspended());
        assert_eq!(running.playlist.running_step().unwrap().name, "A");
        assert_eq!(running.playlist.id, playlist.id);
        assert_eq!(running.priority(), 3);
    }
}
