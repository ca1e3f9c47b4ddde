use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};
use thiserror::Error;

use marquee_show::{reserve_ids, Playlist};

use crate::schedule::ScheduleOptions;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read schedule file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write schedule file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid schedule file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize schedule: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("No schedule file configured")]
    NotConfigured,
}

/// Everything persisted about a show's schedule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleDocument {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(default)]
    pub options: ScheduleOptions,
    /// Name of the playlist looping behind everything else.
    #[serde(default)]
    pub background: Option<String>,
}

impl Default for ScheduleDocument {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: now,
            modified_at: now,
            playlists: Vec::new(),
            options: ScheduleOptions::default(),
            background: None,
        }
    }
}

impl ScheduleDocument {
    /// Largest id used anywhere in the document.
    pub fn max_id(&self) -> u32 {
        self.playlists
            .iter()
            .flat_map(|p| {
                std::iter::once(p.id)
                    .chain(p.schedules.iter().map(|s| s.id))
                    .chain(p.steps.iter().flat_map(|s| {
                        std::iter::once(s.id).chain(s.items.iter().map(|i| i.id))
                    }))
            })
            .max()
            .unwrap_or(0)
    }
}

/// Where the scheduler loads and saves its document.
pub trait ScheduleStore: Send {
    fn load(&self) -> Result<ScheduleDocument, StoreError>;

    fn save(&mut self, document: &ScheduleDocument) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

pub struct JsonScheduleStore {
    path: PathBuf,
}

impl JsonScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or start an empty one if the file does not exist yet.
    pub fn load_or_default(&self) -> Result<ScheduleDocument, StoreError> {
        if !self.path.exists() {
            log::info!(
                "No schedule at {}, starting with an empty one",
                self.path.display()
            );
            return Ok(ScheduleDocument::default());
        }
        self.load()
    }
}

impl ScheduleStore for JsonScheduleStore {
    fn load(&self) -> Result<ScheduleDocument, StoreError> {
        let file = File::open(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let document: ScheduleDocument =
            from_reader(BufReader::new(file)).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        // Newly created objects must not reuse ids from the file.
        reserve_ids(document.max_id());

        log::info!(
            "Loaded schedule from {} ({} playlists)",
            self.path.display(),
            document.playlists.len()
        );
        Ok(document)
    }

    fn save(&mut self, document: &ScheduleDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        let file = File::create(&self.path).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        to_writer_pretty(BufWriter::new(file), document)?;

        log::info!("Saved schedule to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_show::{PlaylistItem, PlaylistStep, Schedule};
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut store = JsonScheduleStore::new(dir.path().join("shows/schedule.json"));

        let playlist = Playlist::new("Carols")
            .with_step(PlaylistStep::new("Intro").with_item(PlaylistItem::media("intro.mp3", 3000)))
            .with_schedule(Schedule::always("Nightly", 4).unwrap());
        let document = ScheduleDocument {
            playlists: vec![playlist],
            background: Some("Carols".to_string()),
            ..ScheduleDocument::default()
        };

        store.save(&document).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.playlists.len(), 1);
        assert_eq!(loaded.playlists[0].name, "Carols");
        assert_eq!(loaded.playlists[0].steps[0].name, "Intro");
        assert_eq!(loaded.playlists[0].schedules[0].priority(), 4);
        assert_eq!(loaded.background.as_deref(), Some("Carols"));
        assert_eq!(loaded.max_id(), document.max_id());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let store = JsonScheduleStore::new(dir.path().join("absent.json"));

        assert!(matches!(store.load(), Err(StoreError::Read { .. })));
        assert!(store.load_or_default().unwrap().playlists.is_empty());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonScheduleStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Parse { .. })));
    }
}
