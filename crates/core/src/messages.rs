use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::command::{ActionResponse, QueryResponse};
use crate::sync::FPP_CTRL_PORT;

/// Role this node plays in FPP playback sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Standalone,
    FppMaster,
    FppSlave,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::Standalone => "standalone",
            SyncMode::FppMaster => "fpp-master",
            SyncMode::FppSlave => "fpp-slave",
        };
        f.write_str(name)
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "standalone" | "none" => Ok(SyncMode::Standalone),
            "fpp-master" | "master" => Ok(SyncMode::FppMaster),
            "fpp-slave" | "slave" => Ok(SyncMode::FppSlave),
            other => Err(format!("unknown sync mode '{}'", other)),
        }
    }
}

/// Requests submitted to a running engine through an `EngineHandle`.
#[derive(Debug)]
pub enum EngineRequest {
    Action {
        command: String,
        parameters: String,
        data: String,
        reply: oneshot::Sender<ActionResponse>,
    },
    Query {
        query: String,
        parameters: String,
        /// Address of the caller, echoed in status replies.
        ip: String,
        reference: String,
        reply: oneshot::Sender<QueryResponse>,
    },
    Status {
        reply: oneshot::Sender<String>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Show settings
    pub show_dir: PathBuf,
    pub schedule_file: PathBuf,
    pub default_frame_ms: u32,
    pub schedule_check_ms: u32,
    pub send_off_when_not_running: bool,
    pub brightness: u8,
    pub volume: u8,

    // Sync settings
    pub sync_mode: SyncMode,
    pub sync_port: u16,
    pub sync_local_ip: String,

    // Output settings (Art-Net)
    pub artnet_enabled: bool,
    pub artnet_broadcast: bool,
    pub artnet_source_ip: String,
    pub artnet_dest_ip: String,
    pub artnet_port: u16,
    pub artnet_universes: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_dir: PathBuf::from("."),
            schedule_file: PathBuf::from("schedule.json"),
            default_frame_ms: 50,
            schedule_check_ms: 500,
            send_off_when_not_running: true,
            brightness: 100,
            volume: 100,

            sync_mode: SyncMode::Standalone,
            sync_port: FPP_CTRL_PORT,
            sync_local_ip: "0.0.0.0".to_string(),

            artnet_enabled: true,
            artnet_broadcast: true,
            artnet_source_ip: "0.0.0.0".to_string(),
            artnet_dest_ip: "192.168.1.200".to_string(),
            artnet_port: 6454,
            artnet_universes: 4,
        }
    }
}

impl Settings {
    /// Where the schedule document lives. Relative paths resolve against the show directory.
    pub fn schedule_path(&self) -> PathBuf {
        if self.schedule_file.is_absolute() {
            self.schedule_file.clone()
        } else {
            self.show_dir.join(&self.schedule_file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!("FPP_MASTER".parse::<SyncMode>(), Ok(SyncMode::FppMaster));
        assert_eq!("slave".parse::<SyncMode>(), Ok(SyncMode::FppSlave));
        assert!("peer".parse::<SyncMode>().is_err());
        assert_eq!(SyncMode::FppSlave.to_string(), "fpp-slave");
    }

    #[test]
    fn test_schedule_path_resolves_against_show_dir() {
        let settings = Settings {
            show_dir: PathBuf::from("/shows/xmas"),
            ..Settings::default()
        };
        assert_eq!(
            settings.schedule_path(),
            PathBuf::from("/shows/xmas/schedule.json")
        );
    }
}
