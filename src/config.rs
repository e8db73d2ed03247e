//! Configuration for lamad-progress

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lamad-progress")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the local completion database and draft cache
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// App scope for completion rows
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Network timeout for auth and store calls, in milliseconds
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// Fraction of the viewport height cut from the bottom of the focus band
    #[serde(default = "default_focus_band_bottom_margin")]
    pub focus_band_bottom_margin: f64,

    /// Hosted completion table base URL (falls back to local SQLite when unset)
    #[serde(default)]
    pub remote_url: Option<String>,

    /// API key sent to the hosted table
    #[serde(default)]
    pub remote_api_key: Option<String>,

    /// Table name on the hosted store
    #[serde(default = "default_remote_table")]
    pub remote_table: String,

    /// Course catalog (TOML)
    #[serde(default)]
    pub course_file: Option<PathBuf>,
}

fn default_app_id() -> String {
    "lamad".to_string()
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

fn default_focus_band_bottom_margin() -> f64 {
    0.70
}

fn default_remote_table() -> String {
    "lesson_completions".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            app_id: default_app_id(),
            remote_timeout_ms: default_remote_timeout_ms(),
            focus_band_bottom_margin: default_focus_band_bottom_margin(),
            remote_url: None,
            remote_api_key: None,
            remote_table: default_remote_table(),
            course_file: None,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Network timeout as a Duration
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Get local completion database path
    pub fn completions_db_path(&self) -> PathBuf {
        self.storage_dir.join("completions.db")
    }

    /// Get draft cache path
    pub fn drafts_db_path(&self) -> PathBuf {
        self.storage_dir.join("drafts.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("app_id = \"ethics\"\n").unwrap();
        assert_eq!(config.app_id, "ethics");
        assert_eq!(config.remote_timeout_ms, 10_000);
        assert!((config.focus_band_bottom_margin - 0.70).abs() < f64::EPSILON);
        assert!(config.remote_url.is_none());
        assert_eq!(config.remote_table, "lesson_completions");
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage_dir = temp.path().to_path_buf();
        config.remote_timeout_ms = 2500;

        let path = config.config_path();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.remote_timeout(), Duration::from_millis(2500));
        assert_eq!(loaded.completions_db_path(), temp.path().join("completions.db"));
    }
}
