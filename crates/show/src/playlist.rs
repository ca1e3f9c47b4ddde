use std::ops::Range;

use chrono::NaiveDateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{next_id, PlaylistStep, Schedule, ShowError, DEFAULT_FRAME_MS};

/// Playback state of a running playlist. Never persisted.
#[derive(Clone, Debug, Default)]
struct RunState {
    running: bool,
    suspended: bool,
    paused: bool,
    looping: bool,
    random: bool,
    loops_left: u32,
    current: Option<usize>,
    played_this_loop: usize,
    step_looping: bool,
    stop_at_end_of_step: bool,
    stop_at_end_of_loop: bool,
    finishing_up: bool,
    jump_to: Option<String>,
    command_at_end_of_step: Option<(String, String)>,
    fired_command: Option<(String, String)>,
}

/// An ordered set of steps plus the schedules that trigger it.
///
/// Cloning is a deep copy that keeps the id, so a running clone can always be traced back to
/// the template it came from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Playlist {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<PlaylistStep>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    /// The first step only plays when the playlist starts, not on every loop.
    #[serde(default)]
    pub first_once: bool,
    /// The last step only plays when the playlist finishes.
    #[serde(default)]
    pub last_once: bool,

    #[serde(skip)]
    state: RunState,
    #[serde(skip)]
    dirty: bool,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            steps: Vec::new(),
            schedules: Vec::new(),
            first_once: false,
            last_once: false,
            state: RunState::default(),
            dirty: false,
        }
    }

    pub fn with_step(mut self, step: PlaylistStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedules.push(schedule);
        self
    }

    // Lifecycle

    /// Start from `step` (or the first step). Fails on an empty playlist or unknown step.
    pub fn start(
        &mut self,
        looping: bool,
        random: bool,
        loops: u32,
        step: Option<&str>,
    ) -> Result<(), ShowError> {
        if self.steps.is_empty() {
            return Err(ShowError::EmptyPlaylist(self.name.clone()));
        }

        let index = match step.filter(|s| !s.is_empty()) {
            Some(name) => self
                .step_index(name)
                .ok_or_else(|| ShowError::UnknownStep(name.to_string()))?,
            None => 0,
        };

        self.stop();
        self.state = RunState {
            running: true,
            looping,
            random,
            loops_left: loops.saturating_sub(1),
            ..RunState::default()
        };
        self.begin_step(index);

        log::debug!("Playlist {} started at step {}", self.name, self.steps[index].name);
        Ok(())
    }

    /// Start but hold playback until the scheduler unsuspends us.
    pub fn start_suspended(
        &mut self,
        looping: bool,
        random: bool,
        loops: u32,
        step: Option<&str>,
    ) -> Result<(), ShowError> {
        self.start(looping, random, loops, step)?;
        self.state.suspended = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(step) = self.running_step_mut() {
            step.stop();
        }
        self.state = RunState::default();
    }

    /// Suspend or resume. Idempotent; returns the frame period to tick at from now on.
    pub fn suspend(&mut self, suspend: bool) -> u32 {
        if self.state.running {
            self.state.suspended = suspend;
        }
        self.frame_ms()
    }

    /// Toggle pause.
    pub fn pause(&mut self) {
        if !self.state.running {
            return;
        }
        self.state.paused = !self.state.paused;
        let paused = self.state.paused;
        if let Some(step) = self.running_step_mut() {
            step.set_paused(paused);
        }
    }

    /// Advance one frame, rendering into `buffer` when `output` is set.
    /// Returns true when the playlist has finished.
    pub fn frame(&mut self, buffer: &mut [u8], output: bool) -> bool {
        if !self.state.running || self.state.suspended {
            return false;
        }
        let Some(index) = self.state.current else {
            self.stop();
            return true;
        };

        if !self.steps[index].frame(buffer, output) {
            return false;
        }

        self.end_of_step(index)
    }

    fn end_of_step(&mut self, index: usize) -> bool {
        if let Some(command) = self.state.command_at_end_of_step.take() {
            self.state.fired_command = Some(command);
        }

        if self.state.step_looping {
            self.steps[index].restart();
            return false;
        }

        if self.state.stop_at_end_of_step {
            self.stop();
            return true;
        }

        if let Some(name) = self.state.jump_to.take() {
            if let Some(target) = self.step_index(&name) {
                self.begin_step(target);
                return false;
            }
            log::warn!("Playlist {} cannot jump to unknown step {}", self.name, name);
        }

        if self.state.finishing_up {
            let last = self.steps.len() - 1;
            if self.last_once && self.steps.len() > 1 && index != last {
                self.begin_step(last);
                return false;
            }
            self.stop();
            return true;
        }

        match self.following_step(index) {
            Some(next) => {
                self.begin_step(next);
                false
            }
            None => {
                self.stop();
                true
            }
        }
    }

    /// Work out what plays after `index`, consuming a loop if we wrap.
    fn following_step(&mut self, index: usize) -> Option<usize> {
        let last = self.steps.len() - 1;
        if self.last_once && self.steps.len() > 1 && index == last {
            return None;
        }

        let body = self.body();
        if index < body.start {
            return Some(self.pick_body_step(body.start, None));
        }

        let end_of_loop = if self.state.random {
            self.state.played_this_loop >= body.len()
        } else {
            index + 1 >= body.end
        };

        if !end_of_loop {
            return Some(self.pick_body_step(index + 1, Some(index)));
        }

        let wrap = if self.state.stop_at_end_of_loop {
            false
        } else if self.state.looping {
            true
        } else if self.state.loops_left > 0 {
            self.state.loops_left -= 1;
            true
        } else {
            false
        };

        if wrap {
            self.state.played_this_loop = 0;
            return Some(self.pick_body_step(body.start, Some(index)));
        }

        if self.last_once && self.steps.len() > 1 {
            return Some(last);
        }
        None
    }

    fn pick_body_step(&self, sequential: usize, avoid: Option<usize>) -> usize {
        let body = self.body();
        if !self.state.random || body.len() < 2 {
            return sequential;
        }
        let mut rng = rand::rng();
        loop {
            let pick = rng.random_range(body.clone());
            if Some(pick) != avoid {
                return pick;
            }
        }
    }

    /// Steps that repeat on every loop.
    fn body(&self) -> Range<usize> {
        let mut start = 0;
        let mut end = self.steps.len();
        if self.first_once && end - start > 1 {
            start += 1;
        }
        if self.last_once && end - start > 1 {
            end -= 1;
        }
        start..end
    }

    fn begin_step(&mut self, index: usize) {
        if let Some(step) = self.running_step_mut() {
            step.stop();
        }
        self.state.current = Some(index);
        if self.body().contains(&index) {
            self.state.played_this_loop += 1;
        }
        let paused = self.state.paused;
        let step = &mut self.steps[index];
        step.start();
        step.set_paused(paused);
    }

    // Navigation

    /// Jump straight to the named step. Returns the frame period to tick at.
    pub fn jump_to_step(&mut self, name: &str) -> u32 {
        if self.state.running {
            if let Some(index) = self.step_index(name) {
                self.begin_step(index);
            }
        }
        self.frame_ms()
    }

    pub fn jump_to_next_step(&mut self) -> u32 {
        if let (true, Some(index)) = (self.state.running, self.state.current) {
            let next = if index + 1 < self.steps.len() { index + 1 } else { 0 };
            let next = self.pick_body_step(next, Some(index));
            self.begin_step(next);
        }
        self.frame_ms()
    }

    pub fn jump_to_prior_step(&mut self) -> u32 {
        if let (true, Some(index)) = (self.state.running, self.state.current) {
            let prior = if index > 0 { index - 1 } else { self.steps.len() - 1 };
            self.begin_step(prior);
        }
        self.frame_ms()
    }

    pub fn restart_current_step(&mut self) {
        if let Some(step) = self.running_step_mut() {
            step.restart();
        }
    }

    pub fn jump_to_step_at_end_of_current_step(&mut self, name: &str) {
        self.state.jump_to = Some(name.to_string());
    }

    /// Finish the current step, play the end step if there is one, then stop.
    pub fn jump_to_end_steps_at_end_of_current_step(&mut self) {
        self.state.finishing_up = true;
    }

    pub fn stop_at_end_of_current_step(&mut self) {
        self.state.stop_at_end_of_step = true;
    }

    pub fn stop_at_end_of_this_loop(&mut self) {
        self.state.stop_at_end_of_loop = true;
    }

    /// Loop the named step until cleared, jumping to it if it is not the running step.
    pub fn loop_step(&mut self, name: &str) -> bool {
        let Some(index) = self.step_index(name) else {
            return false;
        };
        if !self.state.running {
            return false;
        }
        if self.state.current != Some(index) {
            self.begin_step(index);
        }
        self.state.step_looping = true;
        true
    }

    pub fn clear_step_looping(&mut self) {
        self.state.step_looping = false;
    }

    pub fn set_random(&mut self, random: bool) -> bool {
        self.state.random = random;
        true
    }

    pub fn set_looping(&mut self, looping: bool) -> bool {
        self.state.looping = looping;
        true
    }

    /// Queue a command to be picked up by the owner once the current step ends.
    pub fn set_command_at_end_of_current_step(&mut self, command: &str, parameters: &str) {
        self.state.command_at_end_of_step = Some((command.to_string(), parameters.to_string()));
    }

    pub fn take_fired_command(&mut self) -> Option<(String, String)> {
        self.state.fired_command.take()
    }

    // Queries

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn is_suspended(&self) -> bool {
        self.state.suspended
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn is_looping(&self) -> bool {
        self.state.looping
    }

    pub fn is_random(&self) -> bool {
        self.state.random
    }

    pub fn is_step_looping(&self) -> bool {
        self.state.step_looping
    }

    pub fn is_finishing_up(&self) -> bool {
        self.state.finishing_up
    }

    pub fn loops_left(&self) -> u32 {
        self.state.loops_left
    }

    pub fn frame_ms(&self) -> u32 {
        self.running_step()
            .map(PlaylistStep::frame_ms)
            .unwrap_or(DEFAULT_FRAME_MS)
    }

    pub fn running_step_index(&self) -> Option<usize> {
        self.state.current
    }

    pub fn running_step(&self) -> Option<&PlaylistStep> {
        self.state.current.and_then(|i| self.steps.get(i))
    }

    pub fn running_step_mut(&mut self) -> Option<&mut PlaylistStep> {
        self.state.current.and_then(|i| self.steps.get_mut(i))
    }

    /// The step that would play next if nothing intervenes. Random playlists have no
    /// predictable next step. The flag reports whether reaching it wraps the playlist.
    pub fn next_step(&self) -> Option<(&PlaylistStep, bool)> {
        let index = self.state.current?;
        if self.state.random {
            return None;
        }
        let body = self.body();
        let last = self.steps.len() - 1;
        if index < body.start {
            return self.steps.get(body.start).map(|s| (s, false));
        }
        if index + 1 < body.end {
            return self.steps.get(index + 1).map(|s| (s, false));
        }
        if self.last_once && self.steps.len() > 1 && index == last {
            return None;
        }
        if !self.state.stop_at_end_of_loop && (self.state.looping || self.state.loops_left > 0) {
            return self.steps.get(body.start).map(|s| (s, true));
        }
        if self.last_once && self.steps.len() > 1 {
            return self.steps.get(last).map(|s| (s, false));
        }
        None
    }

    pub fn random_step(&self) -> Option<&PlaylistStep> {
        if self.steps.is_empty() {
            return None;
        }
        let body = self.body();
        let index = rand::rng().random_range(body);
        self.steps.get(index)
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn step(&self, name: &str) -> Option<&PlaylistStep> {
        self.step_index(name).map(|i| &self.steps[i])
    }

    pub fn step_with_sequence(&self, file: &str) -> Option<&PlaylistStep> {
        self.steps.iter().find(|s| s.is_running_sequence(file))
    }

    pub fn schedule(&self, name: &str) -> Option<&Schedule> {
        self.schedules
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn length_ms(&self) -> u32 {
        self.steps.iter().map(PlaylistStep::length_ms).sum()
    }

    /// Earliest upcoming start across this playlist's schedules.
    pub fn next_scheduled(&self, now: NaiveDateTime) -> Option<(&Schedule, NaiveDateTime)> {
        self.schedules
            .iter()
            .filter_map(|s| s.next_trigger(now).map(|t| (s, t)))
            .min_by_key(|(_, t)| *t)
    }

    // Editing

    pub fn add_step(&mut self, step: PlaylistStep) {
        self.steps.push(step);
        self.dirty = true;
    }

    /// Remove a step by id, keeping the running step pointed at the same step.
    pub fn remove_step(&mut self, id: u32) -> Option<PlaylistStep> {
        let index = self.steps.iter().position(|s| s.id == id)?;

        match self.state.current {
            Some(current) if current == index => self.stop(),
            Some(current) if current > index => self.state.current = Some(current - 1),
            _ => {}
        }

        self.dirty = true;
        Some(self.steps.remove(index))
    }

    pub fn remove_all_steps(&mut self) {
        self.stop();
        self.steps.clear();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.schedules.iter().any(Schedule::is_dirty)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        for schedule in &mut self.schedules {
            schedule.clear_dirty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlaylistItem;

    /// Steps with a single 50ms frame each, so every frame() call finishes a step.
    fn playlist(names: &[&str]) -> Playlist {
        let mut playlist = Playlist::new("Show");
        for name in names {
            playlist.add_step(
                PlaylistStep::new(*name)
                    .with_item(PlaylistItem::sequence(format!("{name}.fseq"), 50, vec![vec![1]])),
            );
        }
        playlist
    }

    fn running_name(playlist: &Playlist) -> Option<&str> {
        playlist.running_step().map(|s| s.name.as_str())
    }

    fn tick(playlist: &mut Playlist) -> bool {
        let mut buffer = [0u8; 4];
        playlist.frame(&mut buffer, true)
    }

    #[test]
    fn test_plays_steps_in_order_then_finishes() {
        let mut pl = playlist(&["A", "B"]);
        pl.start(false, false, 0, None).unwrap();
        assert_eq!(running_name(&pl), Some("A"));
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("B"));
        assert!(tick(&mut pl));
        assert!(!pl.is_running());
    }

    #[test]
    fn test_start_errors() {
        let mut empty = Playlist::new("Empty");
        assert_eq!(
            empty.start(false, false, 0, None),
            Err(ShowError::EmptyPlaylist("Empty".to_string()))
        );

        let mut pl = playlist(&["A"]);
        assert!(pl.start(false, false, 0, Some("Z")).is_err());
        assert!(!pl.is_running());
    }

    #[test]
    fn test_suspended_playlist_does_not_advance() {
        let mut pl = playlist(&["A", "B"]);
        pl.start_suspended(false, false, 0, None).unwrap();
        assert!(pl.is_suspended());
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("A"));

        assert_eq!(pl.suspend(false), 50);
        assert_eq!(pl.suspend(false), 50);
        assert!(!pl.is_suspended());
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("B"));
    }

    #[test]
    fn test_loops_count_passes() {
        let mut pl = playlist(&["A", "B"]);
        pl.start(false, false, 2, None).unwrap();
        assert_eq!(pl.loops_left(), 1);
        assert!(!tick(&mut pl));
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("A"));
        assert_eq!(pl.loops_left(), 0);
        assert!(!tick(&mut pl));
        assert!(tick(&mut pl));
    }

    #[test]
    fn test_first_and_last_once() {
        let mut pl = playlist(&["Intro", "Song", "Outro"]);
        pl.first_once = true;
        pl.last_once = true;
        pl.start(true, false, 0, None).unwrap();

        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("Song"));
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("Song"));

        pl.jump_to_end_steps_at_end_of_current_step();
        assert!(pl.is_finishing_up());
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("Outro"));
        assert!(tick(&mut pl));
    }

    #[test]
    fn test_last_once_plays_at_natural_end() {
        let mut pl = playlist(&["Song", "Outro"]);
        pl.last_once = true;
        pl.start(false, false, 0, None).unwrap();
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("Outro"));
        assert!(tick(&mut pl));
    }

    #[test]
    fn test_stop_at_end_of_step_and_loop() {
        let mut pl = playlist(&["A", "B", "C"]);
        pl.start(true, false, 0, None).unwrap();
        pl.stop_at_end_of_current_step();
        assert!(tick(&mut pl));

        pl.start(true, false, 0, None).unwrap();
        pl.stop_at_end_of_this_loop();
        assert!(!tick(&mut pl));
        assert!(!tick(&mut pl));
        assert!(tick(&mut pl));
    }

    #[test]
    fn test_pending_jump_and_step_loop() {
        let mut pl = playlist(&["A", "B", "C"]);
        pl.start(false, false, 0, None).unwrap();
        pl.jump_to_step_at_end_of_current_step("c");
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("C"));

        assert!(pl.loop_step("B"));
        assert!(!tick(&mut pl));
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("B"));
        pl.clear_step_looping();
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("C"));
    }

    #[test]
    fn test_navigation_wraps() {
        let mut pl = playlist(&["A", "B"]);
        pl.start(false, false, 0, None).unwrap();
        pl.jump_to_prior_step();
        assert_eq!(running_name(&pl), Some("B"));
        pl.jump_to_next_step();
        assert_eq!(running_name(&pl), Some("A"));
        pl.jump_to_step("b");
        assert_eq!(running_name(&pl), Some("B"));
    }

    #[test]
    fn test_next_step_preview() {
        let mut pl = playlist(&["A", "B"]);
        pl.start(true, false, 0, None).unwrap();
        assert_eq!(pl.next_step().map(|(s, l)| (s.name.as_str(), l)), Some(("B", false)));
        pl.jump_to_step("B");
        assert_eq!(pl.next_step().map(|(s, l)| (s.name.as_str(), l)), Some(("A", true)));
        pl.set_random(true);
        assert!(pl.next_step().is_none());
    }

    #[test]
    fn test_random_playlist_plays_each_pass_length() {
        let mut pl = playlist(&["A", "B", "C"]);
        pl.start(false, true, 0, None).unwrap();
        assert!(!tick(&mut pl));
        assert!(!tick(&mut pl));
        assert!(tick(&mut pl));
    }

    #[test]
    fn test_remove_step_keeps_running_step() {
        let mut pl = playlist(&["A", "B", "C"]);
        pl.start(false, false, 0, Some("B")).unwrap();
        let first = pl.steps[0].id;
        pl.remove_step(first);
        assert_eq!(running_name(&pl), Some("B"));
        assert_eq!(pl.running_step_index(), Some(0));
        assert!(pl.is_dirty());
    }

    #[test]
    fn test_clone_keeps_id_and_is_independent() {
        let template = playlist(&["A", "B"]);
        let mut clone = template.clone();
        assert_eq!(clone.id, template.id);
        clone.start(false, false, 0, None).unwrap();
        assert!(clone.is_running());
        assert!(!template.is_running());
        clone.steps[0].name = "Changed".to_string();
        assert_eq!(template.steps[0].name, "A");
    }

    #[test]
    fn test_command_fires_at_end_of_step() {
        let mut pl = playlist(&["A", "B"]);
        pl.start(false, false, 0, None).unwrap();
        pl.set_command_at_end_of_current_step("Set volume to", "50");
        assert!(pl.take_fired_command().is_none());
        tick(&mut pl);
        assert_eq!(
            pl.take_fired_command(),
            Some(("Set volume to".to_string(), "50".to_string()))
        );
    }

    #[test]
    fn test_pause_toggles() {
        let mut pl = playlist(&["A", "B"]);
        pl.start(false, false, 0, None).unwrap();
        pl.pause();
        assert!(pl.is_paused());
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("A"));
        pl.pause();
        assert!(!tick(&mut pl));
        assert_eq!(running_name(&pl), Some("B"));
    }
}
