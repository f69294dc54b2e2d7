//! Configuration surface (§6): every knob a deployment can tune, with the
//! defaults the spec lists. Loaded from an optional TOML file and
//! overridden by the CLI flags in `main`, mirroring the reference node
//! binary's `Args` + config-file split.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use custodian_core::{
    DEFAULT_BATCH_SIZE, DEFAULT_RECOVERY_MAX_ATTEMPTS, DEFAULT_ROLLBACK_SAFETY_MARGIN,
    MAX_BATCH_SIZE, MAX_BLOCK_DATA_LENGTH, MAX_BLOCK_SIZE_BYTES,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub max_size_bytes: usize,
    pub max_data_length: usize,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: MAX_BLOCK_SIZE_BYTES,
            max_data_length: MAX_BLOCK_DATA_LENGTH,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub batch_size: usize,
    pub max_batch_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_attempts: u32,
    pub backup_dir: PathBuf,
    pub rollback_safety_margin: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECOVERY_MAX_ATTEMPTS,
            backup_dir: PathBuf::from("./backups"),
            rollback_safety_margin: DEFAULT_ROLLBACK_SAFETY_MARGIN,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub size_check_interval_secs: u64,
    pub vacuum_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            size_check_interval_secs: 3600,
            vacuum_interval_secs: 7 * 24 * 3600,
            cleanup_interval_secs: 24 * 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub off_chain_dir: PathBuf,
    pub block: BlockConfig,
    pub streaming: StreamingConfig,
    pub recovery: RecoveryConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./custodian.db".to_string(),
            off_chain_dir: PathBuf::from("./off-chain"),
            block: BlockConfig::default(),
            streaming: StreamingConfig::default(),
            recovery: RecoveryConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file if `path` is given and exists; otherwise
    /// fall back to defaults.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&text)?)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// Expand a leading `~` to the user's home directory, matching the
/// reference node binary's own path handling.
pub fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("custodian_node_test_missing_config.toml");
        let _ = std::fs::remove_file(&path);
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.block.max_size_bytes, MAX_BLOCK_SIZE_BYTES);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let path = std::env::temp_dir().join("custodian_node_test_partial_config.toml");
        std::fs::write(&path, "database_url = \"postgres://localhost/custodian\"\n").unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.database_url, "postgres://localhost/custodian");
        assert_eq!(cfg.block.max_data_length, MAX_BLOCK_DATA_LENGTH);

        let _ = std::fs::remove_file(&path);
    }
}
