use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Pause between sync passes when watching.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Credentials used to re-authenticate against the target when a push
    /// is rejected. Settings stored in the database take precedence.
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            username: default_username(),
            password: default_password(),
        }
    }
}

fn default_interval_ms() -> u64 {
    5000
}
fn default_username() -> String {
    "admin".to_string()
}
fn default_password() -> String {
    "admin".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.sync.interval_ms == 0 {
        anyhow::bail!("sync.interval_ms must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sync_section() {
        let config: Config = toml::from_str("[db]\npath = \"data/hubgraph.db\"\n").unwrap();
        assert_eq!(config.sync.interval_ms, 5000);
        assert_eq!(config.sync.username, "admin");
        assert_eq!(config.sync.password, "admin");
    }

    #[test]
    fn test_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[db]\npath = \"x.db\"\n[sync]\ninterval_ms = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
