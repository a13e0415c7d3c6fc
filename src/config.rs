use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngramConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Identifier of the embedding model the host wires in. Recorded for
    /// diagnostics; the store itself only cares about dimensionality.
    pub model: String,
    /// Expected dimensionality of the embedder's output.
    pub dimensions: usize,
}

/// Cluster-index knobs. The index is advisory; these only trade speed for
/// work, never correctness.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Minimum cosine similarity for a new vector to join an existing
    /// centroid instead of seeding its own.
    pub acceptance_threshold: f64,
    /// Cap on centroids per partition. At the cap, the nearest centroid
    /// absorbs new vectors regardless of the threshold.
    pub max_clusters: usize,
    /// Partitions smaller than this are always scanned linearly.
    pub min_partition_for_index: usize,
    /// Query pruning scans centroids until expected members reach
    /// `k × candidate_multiplier`.
    pub candidate_multiplier: usize,
    /// Relative member-count drift beyond which reconciliation recomputes a
    /// centroid from scratch.
    pub drift_ratio: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_engram_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".into(),
            dimensions: 384,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.6,
            max_clusters: 64,
            min_partition_for_index: 256,
            candidate_multiplier: 4,
            drift_ratio: 0.25,
        }
    }
}

/// Returns `~/.engram/`
pub fn default_engram_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engram")
}

/// Returns the default config file path: `~/.engram/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engram_dir().join("config.toml")
}

impl EngramConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngramConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ENGRAM_DB).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ENGRAM_DB") {
            self.storage.db_path = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
