//! Configuration (ambient stack): TOML file stored in the OS-standard
//! config directory, loaded at startup and falling back to documented
//! defaults when absent or unparsable.
//!
//! - Linux: ~/.config/skautan/config.toml
//! - macOS: ~/Library/Application Support/skautan/config.toml
//! - Windows: %APPDATA%\skautan\config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub playback: PlaybackConfig,
    pub vote_server: VoteServerConfig,
}

/// Library scan roots and storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directories scanned (recursively) for audio files.
    pub scan_paths: Vec<PathBuf>,

    /// SQLite database path.
    pub db_path: PathBuf,

    /// Directory the migration/daily backups (§4.15) are written under.
    pub backup_dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            scan_paths: Vec::new(),
            db_path: default_state_dir().join("skautan.db"),
            backup_dir: default_state_dir().join("backups"),
        }
    }
}

/// Audio output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device name. Empty means "use the system default".
    pub output_device: String,

    pub initial_volume: f32,

    /// Whether tempo/volume survive a track change by default.
    pub keep_tempo: bool,
    pub keep_volume: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_device: String::new(),
            initial_volume: 1.0,
            keep_tempo: false,
            keep_volume: false,
        }
    }
}

/// Embedded HTTP vote server (C18) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for VoteServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 7890,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("skautan")
}

pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("skautan"))
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk. Returns defaults (with a warning logged)
/// if the file is missing or fails to parse — startup never fails because
/// of a bad config file.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("no config file at {path:?}, using defaults");
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("loaded config from {path:?}");
                config
            }
            Err(e) => {
                tracing::error!("failed to parse config file {path:?}: {e}");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("failed to read config file {path:?}: {e}");
            Config::default()
        }
    }
}

/// Persist `config` atomically (write to a temp file, then rename).
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    let path = dir.join("config.toml");

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::CreateDir(dir.clone(), e))?;

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, &path)
        .map_err(|e| ConfigError::Rename(temp_path, path.clone(), e))?;

    tracing::info!("saved config to {path:?}");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes_with_expected_sections() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[library]"));
        assert!(toml.contains("[playback]"));
        assert!(toml.contains("[vote_server]"));
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let mut config = Config::default();
        config.playback.initial_volume = 0.5;
        config.vote_server.port = 9000;
        config.library.scan_paths.push(PathBuf::from("/music"));

        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.playback.initial_volume, 0.5);
        assert_eq!(parsed.vote_server.port, 9000);
        assert_eq!(parsed.library.scan_paths, vec![PathBuf::from("/music")]);
    }

    #[test]
    fn partial_config_falls_back_to_defaults_for_missing_fields() {
        let toml = r#"
[vote_server]
port = 9999
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.vote_server.port, 9999);
        assert!(config.vote_server.enabled);
        assert_eq!(config.playback.initial_volume, 1.0);
    }
}
