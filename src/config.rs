use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use crate::vault::KdfParams;

pub const DEFAULT_DB_FILE: &str = "ftjournal.db";
pub const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub db_file_name: String,
    pub default_timezone: String,
    pub kdf: KdfParams,
    pub trades_page_default: i64,
    pub trades_page_max: i64,
    pub csv_max_errors: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            db_file_name: DEFAULT_DB_FILE.to_string(),
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            kdf: KdfParams::default(),
            trades_page_default: 200,
            trades_page_max: 1000,
            csv_max_errors: 100,
        }
    }
}

impl EngineConfig {
    pub fn default_at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file_name)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| anyhow::anyhow!("invalid default_timezone: {}", self.default_timezone))?;
        if self.db_file_name.trim().is_empty() {
            anyhow::bail!("db_file_name must not be empty");
        }
        if self.trades_page_default < 1 || self.trades_page_default > self.trades_page_max {
            anyhow::bail!(
                "trades_page_default must be within 1..={}",
                self.trades_page_max
            );
        }
        Ok(())
    }
}

pub fn load_config(config_path: &Path) -> anyhow::Result<Option<EngineConfig>> {
    if !config_path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(config_path)
        .with_context(|| format!("read config {}", config_path.display()))?;
    let cfg: EngineConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parse config {}", config_path.display()))?;
    cfg.validate()?;
    Ok(Some(cfg))
}

pub fn save_config(config_path: &Path, cfg: &EngineConfig) -> anyhow::Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config directory {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(cfg)?;
    fs::write(config_path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg/engine.json");
        let mut cfg = EngineConfig::default_at(dir.path());
        cfg.default_timezone = "Europe/London".to_string();
        save_config(&path, &cfg).unwrap();

        let loaded = load_config(&path).unwrap().unwrap();
        assert_eq!(loaded.default_timezone, "Europe/London");
        assert_eq!(loaded.db_path(), dir.path().join(DEFAULT_DB_FILE));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"csv_max_errors": 5}"#).unwrap();

        let cfg = load_config(&path).unwrap().unwrap();
        assert_eq!(cfg.csv_max_errors, 5);
        assert_eq!(cfg.trades_page_default, 200);
        assert_eq!(cfg.default_timezone, "UTC");
    }

    #[test]
    fn test_rejects_unknown_default_zone() {
        let mut cfg = EngineConfig::default();
        cfg.default_timezone = "Mars/Olympus".to_string();
        assert!(cfg.validate().is_err());
    }
}
