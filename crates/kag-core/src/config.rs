use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{KagError, Result};

/// Top-level configuration for the knowledge-graph builder.
///
/// Each section is optional in the TOML file and falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KagConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
}

impl KagConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KagConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| KagError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the graph snapshot.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "./kag-data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Graph store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Prefix for generated node ids.
    pub node_id_prefix: String,
    /// Prefix for generated edge ids.
    pub edge_id_prefix: String,
    /// Snapshot file name inside `general.data_dir`.
    pub snapshot_file: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            node_id_prefix: "node_".to_string(),
            edge_id_prefix: "edge_".to_string(),
            snapshot_file: "knowledge_graph.json".to_string(),
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// When false the embedding model is treated as not configured.
    pub enabled: bool,
    /// Embedding model name.
    pub model: String,
    /// Embedding dimension.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "hash-embedding".to_string(),
            dimensions: 384,
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// When false the vector store is treated as not configured.
    pub enabled: bool,
    pub collection_name: String,
    /// Total bulk-upsert attempts per batch (1 = no retry).
    pub upsert_attempts: u32,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collection_name: "knowledge_graph_embeddings".to_string(),
            upsert_attempts: 1,
        }
    }
}
