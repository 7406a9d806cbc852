use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::conflict::ConflictStrategy;
use crate::scanner::build_globset;

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
    /// Root of the epic/feature/task tree.
    #[serde(default = "default_docs_root")]
    pub docs_root: PathBuf,
    /// JSON pattern list. Missing file means built-in patterns.
    #[serde(default)]
    pub patterns_file: Option<PathBuf>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub create_missing: bool,
    /// Register epic/feature folders (and `epic-index.md` titles) on sync.
    #[serde(default)]
    pub discover_scopes: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            docs_root: default_docs_root(),
            patterns_file: None,
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_size: default_max_file_size(),
            strategy: default_strategy(),
            create_missing: false,
            discover_scopes: false,
        }
    }
}

fn default_docs_root() -> PathBuf {
    PathBuf::from("./docs/plan")
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_strategy() -> String {
    "file-wins".to_string()
}

impl SyncConfig {
    pub fn conflict_strategy(&self) -> Result<ConflictStrategy> {
        self.strategy
            .parse()
            .with_context(|| "Invalid sync.strategy")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.sync.max_file_size == 0 {
        anyhow::bail!("sync.max_file_size must be > 0");
    }

    config.sync.conflict_strategy()?;

    build_globset(&config.sync.exclude_globs).with_context(|| "Invalid sync.exclude_globs")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(body: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plansync.toml");
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_defaults() {
        let (_tmp, path) = write_config("[db]\npath = \"./data/plansync.sqlite\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.sync.docs_root, PathBuf::from("./docs/plan"));
        assert_eq!(config.sync.max_file_size, 1_048_576);
        assert_eq!(config.sync.conflict_strategy().unwrap(), ConflictStrategy::FileWins);
        assert!(!config.sync.create_missing);
        assert!(!config.sync.discover_scopes);
        assert!(config.sync.patterns_file.is_none());
    }

    #[test]
    fn test_sync_section() {
        let (_tmp, path) = write_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[sync]
docs_root = "/srv/plan"
patterns_file = "/srv/.plansync.json"
exclude_globs = ["**/archive/**"]
strategy = "newer-wins"
create_missing = true
discover_scopes = true
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.sync.docs_root, PathBuf::from("/srv/plan"));
        assert_eq!(config.sync.exclude_globs, vec!["**/archive/**".to_string()]);
        assert_eq!(config.sync.conflict_strategy().unwrap(), ConflictStrategy::NewerWins);
        assert!(config.sync.create_missing);
        assert!(config.sync.discover_scopes);
    }

    #[test]
    fn test_rejects_bad_values() {
        let (_tmp, path) = write_config("[db]\npath = \"x\"\n[sync]\nmax_file_size = 0\n");
        assert!(load_config(&path).is_err());

        let (_tmp, path) = write_config("[db]\npath = \"x\"\n[sync]\nstrategy = \"coin-flip\"\n");
        let err = format!("{:#}", load_config(&path).unwrap_err());
        assert!(err.contains("coin-flip"));

        let (_tmp, path) = write_config("[db]\npath = \"x\"\n[sync]\nexclude_globs = [\"a/{b\"]\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/plansync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
