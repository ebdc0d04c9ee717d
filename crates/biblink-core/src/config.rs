use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BiblinkError, Result};

/// Root application configuration, loaded from `~/.config/biblink/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub dedup: DedupConfig,
    pub logging: LoggingConfig,

    /// Per-source settings keyed by source id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Worker threads used by batch deduplication.
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Maps a record format to the format used for matching and indexing.
    pub format_mapping: BTreeMap<String, String>,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("biblink");

        Self {
            database_path: data_dir.join("biblink.db").to_string_lossy().to_string(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/biblink/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("BIBLINK_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("biblink")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.dedup.workers == 0 {
            return Err(BiblinkError::ConfigError(
                "dedup.workers must be at least 1".to_string(),
            ));
        }
        if self.store.database_path.trim().is_empty() {
            return Err(BiblinkError::ConfigError(
                "store.database_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    // ─── Derived values ────────────────────────────────────

    /// Path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.store.database_path)
    }

    pub fn set_database_path(&mut self, path: PathBuf) {
        self.store.database_path = path.to_string_lossy().to_string();
    }

    /// Format mapping tables for every configured source.
    pub fn format_mappings(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.sources
            .iter()
            .filter(|(_, source)| !source.format_mapping.is_empty())
            .map(|(id, source)| (id.clone(), source.format_mapping.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.dedup.workers, 1);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.database_path().to_string_lossy().ends_with("biblink.db"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.dedup.workers = 4;
        cfg.sources.insert(
            "helka".to_string(),
            SourceConfig {
                format_mapping: BTreeMap::from([("BookSection".to_string(), "Book".to_string())]),
            },
        );
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.dedup.workers, 4);
        assert_eq!(loaded.sources, cfg.sources);
        assert_eq!(loaded.store.database_path, cfg.store.database_path);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let cfg = AppConfig::load_from(Path::new("/tmp/nonexistent_biblink_config.toml")).unwrap();
        assert_eq!(cfg.dedup.workers, 1);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[logging]\nlevel = \"debug\"\n\n[sources.fennica.format_mapping]\nJournal = \"Serial\"\n",
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.dedup.workers, 1);
        let mappings = cfg.format_mappings();
        assert_eq!(mappings["fennica"]["Journal"], "Serial");
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dedup]\nworkers = 0\n").unwrap();

        assert!(matches!(
            AppConfig::load_from(&path),
            Err(BiblinkError::ConfigError(_))
        ));
    }
}
