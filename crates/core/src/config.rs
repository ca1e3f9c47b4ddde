use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Settings;

/// Configuration manager for Marquee settings
/// Provides a layered configuration system that separates schema, available options, and persisted
/// values. Configuration is stored in config.json in the working directory by default
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub show: ShowConfigSchema,
    pub sync: SyncConfigSchema,
    pub output: OutputConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowConfigSchema {
    pub default_frame_ms: ConfigOption<u32>,
    pub schedule_check_ms: ConfigOption<u32>,
    pub send_off_when_not_running: ConfigOption<bool>,
    pub brightness: ConfigOption<u8>,
    pub volume: ConfigOption<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfigSchema {
    pub sync_mode: ConfigOption<String>,
    pub sync_port: ConfigOption<u16>,
    pub sync_local_ip: ConfigOption<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfigSchema {
    pub artnet_enabled: ConfigOption<bool>,
    pub artnet_broadcast: ConfigOption<bool>,
    pub artnet_source_ip: ConfigOption<String>,
    pub artnet_dest_ip: ConfigOption<String>,
    pub artnet_port: ConfigOption<u16>,
    pub artnet_universes: ConfigOption<u16>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

impl<T> ConfigOption<T> {
    fn new(default: T, description: &str) -> Self {
        Self {
            default,
            valid_range: None,
            valid_choices: None,
            description: description.to_string(),
            requires_restart: false,
        }
    }

    fn range(mut self, min: T, max: T) -> Self {
        self.valid_range = Some((min, max));
        self
    }

    fn choices(mut self, choices: Vec<T>) -> Self {
        self.valid_choices = Some(choices);
        self
    }

    fn restart(mut self) -> Self {
        self.requires_restart = true;
        self
    }
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Failed to serialize config: {0}")]
    SerializeError(String),
    #[error("Config validation errors: {}", .0.join(", "))]
    ValidationError(Vec<String>),
}

impl ConfigManager {
    /// Create a new configuration manager
    /// If no path is provided, defaults to 'config.json' in the current working directory
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from("config.json"));

        Self {
            config_path,
            settings: Settings::default(),
        }
    }

    /// Load settings from configuration file
    /// Writes and returns the defaults if the file doesn't exist yet
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::ValidationError)?;

        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = self.existing_created_at().unwrap_or_else(|| now.clone());

        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at,
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    fn existing_created_at(&self) -> Option<String> {
        let content = fs::read_to_string(&self.config_path).ok()?;
        let file: ConfigFile = serde_json::from_str(&content).ok()?;
        Some(file.created_at)
    }

    /// Validate, update settings and save to file
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        ConfigSchema {
            show: ShowConfigSchema {
                default_frame_ms: ConfigOption::new(
                    50,
                    "Frame period used when nothing is playing",
                )
                .range(10, 1000),
                schedule_check_ms: ConfigOption::new(
                    500,
                    "How often schedules are re-evaluated in milliseconds",
                )
                .range(100, 60_000),
                send_off_when_not_running: ConfigOption::new(
                    true,
                    "Send blackout frames while idle instead of going silent",
                ),
                brightness: ConfigOption::new(100, "Master brightness percentage").range(0, 100),
                volume: ConfigOption::new(100, "Media volume percentage").range(0, 100),
            },
            sync: SyncConfigSchema {
                sync_mode: ConfigOption::new("standalone".to_string(), "FPP sync role")
                    .choices(vec![
                        "standalone".to_string(),
                        "fpp_master".to_string(),
                        "fpp_slave".to_string(),
                    ])
                    .restart(),
                sync_port: ConfigOption::new(32320, "UDP port for FPP sync packets")
                    .range(1024, 65535)
                    .restart(),
                sync_local_ip: ConfigOption::new(
                    "0.0.0.0".to_string(),
                    "Local address the sync socket binds to",
                )
                .restart(),
            },
            output: OutputConfigSchema {
                artnet_enabled: ConfigOption::new(true, "Enable channel output via Art-Net")
                    .restart(),
                artnet_broadcast: ConfigOption::new(
                    true,
                    "Use broadcast mode for Art-Net (vs unicast)",
                )
                .restart(),
                artnet_source_ip: ConfigOption::new(
                    "0.0.0.0".to_string(),
                    "Source IP address for Art-Net output",
                )
                .restart(),
                artnet_dest_ip: ConfigOption::new(
                    "192.168.1.200".to_string(),
                    "Destination IP address for Art-Net unicast",
                )
                .restart(),
                artnet_port: ConfigOption::new(6454, "UDP port for Art-Net output")
                    .range(1024, 65535)
                    .restart(),
                artnet_universes: ConfigOption::new(4, "Number of 512 channel universes to drive")
                    .range(1, 64)
                    .restart(),
            },
        }
    }

    /// Validate settings against schema
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        fn check<T: PartialOrd + std::fmt::Display + Copy>(
            errors: &mut Vec<String>,
            name: &str,
            option: &ConfigOption<T>,
            value: T,
        ) {
            if let Some((min, max)) = option.valid_range {
                if value < min || value > max {
                    errors.push(format!("{} must be between {} and {}", name, min, max));
                }
            }
        }

        check(
            &mut errors,
            "default_frame_ms",
            &schema.show.default_frame_ms,
            settings.default_frame_ms,
        );
        check(
            &mut errors,
            "schedule_check_ms",
            &schema.show.schedule_check_ms,
            settings.schedule_check_ms,
        );
        check(&mut errors, "brightness", &schema.show.brightness, settings.brightness);
        check(&mut errors, "volume", &schema.show.volume, settings.volume);
        check(&mut errors, "sync_port", &schema.sync.sync_port, settings.sync_port);
        check(
            &mut errors,
            "artnet_port",
            &schema.output.artnet_port,
            settings.artnet_port,
        );
        check(
            &mut errors,
            "artnet_universes",
            &schema.output.artnet_universes,
            settings.artnet_universes,
        );

        if settings.sync_local_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "sync_local_ip '{}' is not an IP address",
                settings.sync_local_ip
            ));
        }
        if settings.artnet_enabled && !settings.artnet_broadcast {
            if settings.artnet_dest_ip.parse::<std::net::IpAddr>().is_err() {
                errors.push(format!(
                    "artnet_dest_ip '{}' is not an IP address",
                    settings.artnet_dest_ip
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset settings to defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = Settings::default();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::SyncMode;

    #[test]
    fn test_config_manager_new() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let manager = ConfigManager::new(Some(config_path.clone()));
        assert_eq!(manager.config_path(), config_path);
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_load_creates_default_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        let settings = manager.load().unwrap();

        assert_eq!(settings, Settings::default());
        assert!(config_path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));

        let settings = Settings {
            sync_mode: SyncMode::FppMaster,
            brightness: 60,
            ..Settings::default()
        };
        manager.update_settings(settings).unwrap();

        let mut manager2 = ConfigManager::new(Some(config_path));
        let loaded_settings = manager2.load().unwrap();

        assert_eq!(loaded_settings.sync_mode, SyncMode::FppMaster);
        assert_eq!(loaded_settings.brightness, 60);
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(ConfigManager::validate_settings(&settings).is_ok());

        settings.default_frame_ms = 5;
        assert!(ConfigManager::validate_settings(&settings).is_err());

        settings.default_frame_ms = 50;
        settings.brightness = 101;
        settings.artnet_universes = 0;
        let errors = ConfigManager::validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_update_rejects_invalid_settings() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(Some(temp_dir.path().join("config.json")));

        let settings = Settings {
            sync_port: 80,
            ..Settings::default()
        };
        assert!(matches!(
            manager.update_settings(settings),
            Err(ConfigError::ValidationError(_))
        ));
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_schema_completeness() {
        let schema = ConfigManager::schema();

        assert!(schema.show.default_frame_ms.default > 0);
        assert!(schema.sync.sync_port.valid_range.is_some());
        assert!(schema.output.artnet_port.valid_range.is_some());
        assert!(!schema.output.artnet_universes.description.is_empty());
    }
}
