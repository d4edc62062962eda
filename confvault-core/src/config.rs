use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the metadata directory kept inside the managed directory.
pub const METADATA_DIR: &str = ".confvault";
pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_MAX_BACKUPS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Retention window: how many revisions `history()` keeps.
    pub max_backups: usize,
    pub ignore_patterns: Vec<String>,
    /// How long a mutation waits for the lock before failing with `Busy`.
    /// Zero fails immediately.
    pub lock_timeout_ms: u64,
    pub validation_timeout_ms: u64,
    /// Consulted by callers only. The engine always commits explicitly.
    pub auto_commit: bool,
    pub system_author: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            max_backups: DEFAULT_MAX_BACKUPS,
            ignore_patterns: vec![
                ".git".to_string(),
                METADATA_DIR.to_string(),
                ".storage".to_string(),
                "__pycache__".to_string(),
                "*.swp".to_string(),
                "*~".to_string(),
            ],
            lock_timeout_ms: 5_000,
            validation_timeout_ms: 30_000,
            auto_commit: true,
            system_author: "confvault <system@confvault>".to_string(),
        }
    }
}

impl VaultConfig {
    /// Reads `<root>/.confvault/config.toml` when present, then applies
    /// `CONFVAULT_*` environment overrides.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            debug!("Loading config from {:?}", path);
            toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn path(root: &Path) -> PathBuf {
        root.join(METADATA_DIR).join(CONFIG_FILE)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = var("CONFVAULT_MAX_BACKUPS") {
            self.max_backups = value
                .parse()
                .map_err(|_| Error::Config(format!("CONFVAULT_MAX_BACKUPS: {value:?}")))?;
        }
        if let Some(value) = var("CONFVAULT_AUTO_COMMIT") {
            self.auto_commit = matches!(value.as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_backups == 0 {
            return Err(Error::Config("max_backups must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = VaultConfig::default();
        assert_eq!(config.max_backups, 50);
        assert!(config.ignore_patterns.contains(&".git".to_string()));
        assert!(config.ignore_patterns.contains(&METADATA_DIR.to_string()));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(METADATA_DIR)).unwrap();
        std::fs::write(VaultConfig::path(dir.path()), "max_backups = 7\n").unwrap();

        let raw = std::fs::read_to_string(VaultConfig::path(dir.path())).unwrap();
        let config: VaultConfig = toml::from_str(&raw).unwrap();

        assert_eq!(config.max_backups, 7);
        assert_eq!(config.lock_timeout_ms, 5_000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig::default().with_max_backups(3);
        config.save(dir.path()).unwrap();

        let raw = std::fs::read_to_string(VaultConfig::path(dir.path())).unwrap();
        let loaded: VaultConfig = toml::from_str(&raw).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = VaultConfig::default();
        config
            .apply_env(|key| match key {
                "CONFVAULT_MAX_BACKUPS" => Some("12".to_string()),
                "CONFVAULT_AUTO_COMMIT" => Some("false".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.max_backups, 12);
        assert!(!config.auto_commit);
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = VaultConfig::default();
        let result = config.apply_env(|key| {
            (key == "CONFVAULT_MAX_BACKUPS").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_window_is_invalid() {
        assert!(VaultConfig::default().with_max_backups(0).validate().is_err());
    }
}
