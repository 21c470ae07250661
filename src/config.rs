use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "SystemOptimizer";
const BACKUP_FILE_NAME: &str = "SystemOptimizer_backup.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the settings backup lives. Only the Settings Guard touches it.
    pub backup_file: PathBuf,
    pub temp_dirs: Vec<PathBuf>,
    pub update_cache_dir: PathBuf,
    pub update_service: String,
    pub system_volume: String,
    /// Pause before the after-snapshot so it reflects the changes.
    pub settle_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let windir = windows_dir();
        let mut temp_dirs = vec![std::env::var_os("TEMP")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)];
        let system_temp = windir.join("Temp");
        if !temp_dirs.contains(&system_temp) {
            temp_dirs.push(system_temp);
        }

        Self {
            backup_file: app_data_dir().join(BACKUP_FILE_NAME),
            temp_dirs,
            update_cache_dir: windir.join("SoftwareDistribution"),
            update_service: "wuauserv".to_string(),
            system_volume: "C:".to_string(),
            settle_delay_ms: 2000,
        }
    }
}

impl Config {
    /// `%APPDATA%\SystemOptimizer\config.json`
    pub fn default_path() -> PathBuf {
        app_data_dir().join(APP_DIR).join("config.json")
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Load overrides from a JSON file; fields it omits keep their defaults.
    /// A missing file is not an error.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }
}

/// Roaming AppData on Windows; the platform config dir elsewhere.
fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| std::env::var_os("APPDATA").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn windows_dir() -> PathBuf {
    std::env::var_os("windir")
        .or_else(|| std::env::var_os("SystemRoot"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("C:\\Windows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_windows_locations() {
        let config = Config::default();
        assert!(config.backup_file.ends_with(BACKUP_FILE_NAME));
        assert!(config.update_cache_dir.ends_with("SoftwareDistribution"));
        assert_eq!(config.update_service, "wuauserv");
        assert_eq!(config.settle_delay(), Duration::from_secs(2));
        assert!(!config.temp_dirs.is_empty());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "settle_delay_ms": 0, "system_volume": "D:" }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.settle_delay_ms, 0);
        assert_eq!(config.system_volume, "D:");
        assert_eq!(config.update_service, "wuauserv");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().starts_with("parsing"));
    }
}
