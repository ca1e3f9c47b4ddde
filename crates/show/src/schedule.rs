use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::{next_id, ShowError};

pub const MAX_PRIORITY: u8 = 19;

/// When a playlist should be playing, and how.
///
/// A window whose end time is before its start time runs past midnight into the next day.
/// Equal start and end times mean all day.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schedule {
    pub id: u32,
    pub name: String,
    priority: u8,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Days the window may open on. Empty means every day.
    #[serde(default)]
    pub days: Vec<Weekday>,
    #[serde(default)]
    pub loop_playlist: bool,
    #[serde(default)]
    pub random: bool,
    /// Number of passes through the playlist. Zero plays it once.
    #[serde(default)]
    pub loops: u32,

    #[serde(skip)]
    end_extension_mins: i64,
    #[serde(skip)]
    dirty: bool,
}

fn enabled_default() -> bool {
    true
}

impl Schedule {
    pub fn new(
        name: impl Into<String>,
        priority: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Self, ShowError> {
        if priority > MAX_PRIORITY {
            return Err(ShowError::InvalidPriority(priority));
        }
        Ok(Self {
            id: next_id(),
            name: name.into(),
            priority,
            enabled: true,
            start_date: None,
            end_date: None,
            start_time,
            end_time,
            days: Vec::new(),
            loop_playlist: false,
            random: false,
            loops: 0,
            end_extension_mins: 0,
            dirty: false,
        })
    }

    /// A schedule that is active around the clock.
    pub fn always(name: impl Into<String>, priority: u8) -> Result<Self, ShowError> {
        Self::new(name, priority, NaiveTime::MIN, NaiveTime::MIN)
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) -> Result<(), ShowError> {
        if priority > MAX_PRIORITY {
            return Err(ShowError::InvalidPriority(priority));
        }
        self.priority = priority;
        self.dirty = true;
        Ok(())
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.loop_playlist = looping;
        self
    }

    pub fn on_days(mut self, days: &[Weekday]) -> Self {
        self.days = days.to_vec();
        self
    }

    pub fn between_dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    /// Whether the window is open at `now`.
    pub fn check_active(&self, now: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        let today = now.date();
        if let Some(opened) = self.window_start_on(today) {
            if now >= opened && now < self.window_end(opened) {
                return true;
            }
        }
        // A window that opened yesterday may still be running past midnight.
        if let Some(yesterday) = today.pred_opt() {
            if let Some(opened) = self.window_start_on(yesterday) {
                if now >= opened && now < self.window_end(opened) {
                    return true;
                }
            }
        }
        false
    }

    /// Next time the window opens, or `now` when it is already open.
    pub fn next_trigger(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.enabled {
            return None;
        }
        if self.check_active(now) {
            return Some(now);
        }
        (0..=8)
            .filter_map(|offset| now.date().checked_add_signed(Duration::days(offset)))
            .filter_map(|date| self.window_start_on(date))
            .find(|opened| *opened > now)
    }

    /// When the currently open window will close.
    pub fn next_end(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = now.date();
        [today.pred_opt(), Some(today)]
            .into_iter()
            .flatten()
            .filter_map(|date| self.window_start_on(date))
            .map(|opened| self.window_end(opened))
            .find(|end| now < *end && self.check_active(now))
    }

    /// Push the end of today's window out, used when a show is running late.
    pub fn add_mins_to_end_time(&mut self, mins: i64) {
        self.end_extension_mins += mins;
    }

    /// Drop any temporary extension.
    pub fn reset(&mut self) {
        self.end_extension_mins = 0;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn window_start_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        if self.start_date.is_some_and(|start| date < start) {
            return None;
        }
        if self.end_date.is_some_and(|end| date > end) {
            return None;
        }
        if !self.days.is_empty() && !self.days.contains(&date.weekday()) {
            return None;
        }
        Some(date.and_time(self.start_time))
    }

    fn window_end(&self, opened: NaiveDateTime) -> NaiveDateTime {
        let mut end = opened.date().and_time(self.end_time);
        if end <= opened {
            end += Duration::days(1);
        }
        end + Duration::minutes(self.end_extension_mins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_priority_is_validated() {
        assert!(Schedule::always("ok", 19).is_ok());
        assert_eq!(
            Schedule::always("bad", 20).unwrap_err(),
            ShowError::InvalidPriority(20)
        );
    }

    #[test]
    fn test_evening_window() {
        let schedule = Schedule::new("Evening", 5, time(17, 0), time(22, 0)).unwrap();
        assert!(!schedule.check_active(at(2026, 12, 1, 16, 59)));
        assert!(schedule.check_active(at(2026, 12, 1, 17, 0)));
        assert!(!schedule.check_active(at(2026, 12, 1, 22, 0)));
    }

    #[test]
    fn test_window_across_midnight() {
        let schedule = Schedule::new("Late", 5, time(22, 0), time(2, 0)).unwrap();
        assert!(schedule.check_active(at(2026, 12, 1, 23, 30)));
        assert!(schedule.check_active(at(2026, 12, 2, 1, 30)));
        assert!(!schedule.check_active(at(2026, 12, 2, 2, 30)));
        assert_eq!(
            schedule.next_end(at(2026, 12, 2, 1, 30)),
            Some(at(2026, 12, 2, 2, 0))
        );
    }

    #[test]
    fn test_days_and_dates_limit_window() {
        // 2026-12-05 is a Saturday.
        let schedule = Schedule::always("Weekend", 1)
            .unwrap()
            .on_days(&[Weekday::Sat, Weekday::Sun])
            .between_dates(
                NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            );
        assert!(schedule.check_active(at(2026, 12, 5, 12, 0)));
        assert!(!schedule.check_active(at(2026, 12, 7, 12, 0)));
        assert!(!schedule.check_active(at(2027, 1, 2, 12, 0)));
    }

    #[test]
    fn test_next_trigger() {
        let schedule = Schedule::new("Evening", 5, time(17, 0), time(22, 0)).unwrap();
        assert_eq!(
            schedule.next_trigger(at(2026, 12, 1, 12, 0)),
            Some(at(2026, 12, 1, 17, 0))
        );
        assert_eq!(
            schedule.next_trigger(at(2026, 12, 1, 23, 0)),
            Some(at(2026, 12, 2, 17, 0))
        );
        let now = at(2026, 12, 1, 18, 0);
        assert_eq!(schedule.next_trigger(now), Some(now));

        let mut disabled = schedule.clone();
        disabled.enabled = false;
        assert_eq!(disabled.next_trigger(now), None);
    }

    #[test]
    fn test_end_extension_and_reset() {
        let mut schedule = Schedule::new("Evening", 5, time(17, 0), time(22, 0)).unwrap();
        schedule.add_mins_to_end_time(15);
        assert!(schedule.check_active(at(2026, 12, 1, 22, 10)));
        schedule.reset();
        assert!(!schedule.check_active(at(2026, 12, 1, 22, 10)));
    }
}
