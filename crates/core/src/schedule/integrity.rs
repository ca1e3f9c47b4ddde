use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use marquee_show::{ItemKind, Playlist};

use super::scheduler::Scheduler;

/// Problems found in a loaded show. Nothing here stops playback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    fn warn(&mut self, message: String) {
        log::warn!("CheckSchedule: WARN: {}", message);
        self.warnings.push(message);
    }

    fn error(&mut self, message: String) {
        log::error!("CheckSchedule: ERR: {}", message);
        self.errors.push(message);
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "ERR: {}", error)?;
        }
        for warning in &self.warnings {
            writeln!(f, "WARN: {}", warning)?;
        }
        write!(
            f,
            "{} errors, {} warnings",
            self.errors.len(),
            self.warnings.len()
        )
    }
}

/// Names that appear more than once, compared case-insensitively, in first-seen order.
fn duplicates<'a>(names: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut repeated = Vec::new();
    for name in names {
        let count = seen.entry(name.to_lowercase()).or_insert(0);
        *count += 1;
        if *count == 2 {
            repeated.push(name);
        }
    }
    repeated
}

impl Scheduler {
    /// Look over the whole show for mistakes that would make it misbehave at showtime.
    pub fn check_integrity(&self) -> IntegrityReport {
        let mut report = IntegrityReport::default();

        for name in duplicates(self.playlists.iter().map(|p| p.name.as_str())) {
            report.error(format!("Multiple playlists named '{}'", name));
        }

        for playlist in &self.playlists {
            self.check_playlist(playlist, &mut report);
        }

        let mut priorities: HashMap<u8, Vec<String>> = HashMap::new();
        for playlist in &self.playlists {
            for schedule in playlist.schedules.iter().filter(|s| s.enabled) {
                priorities
                    .entry(schedule.priority())
                    .or_default()
                    .push(format!("{}/{}", playlist.name, schedule.name));
            }
        }
        let mut shared: Vec<_> = priorities.into_iter().filter(|(_, s)| s.len() > 1).collect();
        shared.sort();
        for (priority, schedules) in shared {
            report.warn(format!(
                "Schedules {} share priority {}; if they overlap the first found plays",
                schedules.join(", "),
                priority
            ));
        }

        let channels = self.sink.total_channels();
        for overlay in self.compositor.overlays().iter() {
            if overlay.end_channel() > channels {
                report.warn(format!(
                    "Pixel data at channel {} runs to channel {} but only {} channels are output",
                    overlay.start_channel,
                    overlay.end_channel(),
                    channels
                ));
            }
        }

        log::info!(
            "Schedule check found {} errors and {} warnings",
            report.errors.len(),
            report.warnings.len()
        );
        report
    }

    fn check_playlist(&self, playlist: &Playlist, report: &mut IntegrityReport) {
        if playlist.steps.is_empty() {
            report.warn(format!("Playlist '{}' has no steps", playlist.name));
        }

        for name in duplicates(playlist.steps.iter().map(|s| s.name.as_str())) {
            report.error(format!(
                "Playlist '{}' has multiple steps named '{}'",
                playlist.name, name
            ));
        }
        for name in duplicates(playlist.schedules.iter().map(|s| s.name.as_str())) {
            report.error(format!(
                "Playlist '{}' has multiple schedules named '{}'",
                playlist.name, name
            ));
        }

        for step in &playlist.steps {
            let at = format!("Playlist '{}' step '{}'", playlist.name, step.name);
            if step.items.is_empty() {
                report.warn(format!("{} has no items", at));
            }

            let sequences = step.items.iter().filter(|i| i.sequence_file().is_some()).count();
            if sequences > 1 {
                report.error(format!(
                    "{} has {} sequences; only the first is synced",
                    at, sequences
                ));
            }
            let media = step.items.iter().filter(|i| i.media_file().is_some()).count();
            if media > 1 {
                report.warn(format!("{} plays {} audio or video files at once", at, media));
            }

            for item in &step.items {
                let file = match &item.kind {
                    // Sequences already holding their frames were not loaded from disk.
                    ItemKind::Sequence { file, frames, .. } if frames.is_empty() => file,
                    ItemKind::Media { file, .. } => file,
                    _ => continue,
                };
                if !self.file_exists(file) {
                    report.error(format!("{} references missing file {}", at, file));
                }
            }
        }
    }

    fn file_exists(&self, file: &str) -> bool {
        let path = Path::new(file);
        if path.is_absolute() {
            path.exists()
        } else {
            self.show_dir().join(path).exists()
        }
    }
}
