//! Configuration for the ingestion and conflict-detection pipeline.
//!
//! Every tunable named in the component design (chunk size/overlap, conflict
//! thresholds, neighbor count, verifier concurrency, timeouts, storage
//! locations, server bind address) lives here with a `#[serde(default)]`
//! matching the reference configuration, loadable from JSON, TOML, or YAML.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a `ragkeeper` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub conflict: ConflictConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub providers: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            conflict: ConflictConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            providers: ProviderConfig::default(),
        }
    }
}

/// Chunker tunables (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    200
}

fn default_chunk_overlap() -> usize {
    25
}

/// Conflict Engine tunables (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    #[serde(default = "default_k_neighbors")]
    pub k_neighbors: usize,

    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    #[serde(default = "default_contradiction_threshold")]
    pub contradiction_threshold: f32,

    #[serde(default = "default_neutral_threshold")]
    pub neutral_threshold: f32,

    #[serde(default = "default_verifier_permits")]
    pub verifier_permits: usize,

    #[serde(default = "default_verifier_timeout_secs")]
    pub verifier_timeout_secs: u64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            k_neighbors: default_k_neighbors(),
            dedup_threshold: default_dedup_threshold(),
            contradiction_threshold: default_contradiction_threshold(),
            neutral_threshold: default_neutral_threshold(),
            verifier_permits: default_verifier_permits(),
            verifier_timeout_secs: default_verifier_timeout_secs(),
        }
    }
}

fn default_k_neighbors() -> usize {
    10
}
fn default_dedup_threshold() -> f32 {
    0.95
}
fn default_contradiction_threshold() -> f32 {
    0.90
}
fn default_neutral_threshold() -> f32 {
    0.90
}
fn default_verifier_permits() -> usize {
    5
}
fn default_verifier_timeout_secs() -> u64 {
    30
}

/// Object store and relational store locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_object_store_dir")]
    pub object_store_dir: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    #[serde(default = "default_url_fetch_timeout_secs")]
    pub url_fetch_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            object_store_dir: default_object_store_dir(),
            database_url: default_database_url(),
            max_upload_bytes: default_max_upload_bytes(),
            url_fetch_timeout_secs: default_url_fetch_timeout_secs(),
        }
    }
}

fn default_object_store_dir() -> String {
    "./data/objects".to_string()
}
fn default_database_url() -> String {
    "sqlite://./data/ragkeeper.db?mode=rwc".to_string()
}
fn default_max_upload_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_url_fetch_timeout_secs() -> u64 {
    10
}

/// HTTP server bind configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Addresses of the embedding, NLI, and generative verifier providers, and
/// the default timeout applied to each. These are external collaborators;
/// this repository reaches them over HTTP rather than vendoring a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_embedding_url")]
    pub embedding_url: String,

    #[serde(default = "default_nli_url")]
    pub nli_url: String,

    #[serde(default = "default_verifier_url")]
    pub verifier_url: String,

    #[serde(default = "default_provider_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            embedding_url: default_embedding_url(),
            nli_url: default_nli_url(),
            verifier_url: default_verifier_url(),
            request_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:9001/embed".to_string()
}
fn default_nli_url() -> String {
    "http://localhost:9002/predict".to_string()
}
fn default_verifier_url() -> String {
    "http://localhost:9003/verify".to_string()
}
fn default_provider_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from a file (format detected from its extension)
    /// layered under `RAGKEEPER__`-prefixed environment variable overrides,
    /// e.g. `RAGKEEPER__SERVER__BIND_ADDR`.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref().to_path_buf()))
            .add_source(config::Environment::with_prefix("RAGKEEPER").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Save configuration to a file, dispatching on its extension.
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate tunables against the invariants named in the component
    /// design (thresholds in [0,1], positive sizes, non-empty URLs).
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(anyhow::anyhow!("chunk_size must be greater than 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(anyhow::anyhow!(
                "chunk_overlap must be smaller than chunk_size"
            ));
        }
        for (name, value) in [
            ("dedup_threshold", self.conflict.dedup_threshold),
            (
                "contradiction_threshold",
                self.conflict.contradiction_threshold,
            ),
            ("neutral_threshold", self.conflict.neutral_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow::anyhow!("{name} must be between 0.0 and 1.0"));
            }
        }
        if self.conflict.k_neighbors == 0 {
            return Err(anyhow::anyhow!("k_neighbors must be greater than 0"));
        }
        if self.conflict.verifier_permits == 0 {
            return Err(anyhow::anyhow!("verifier_permits must be greater than 0"));
        }
        if self.storage.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("max_upload_bytes must be greater than 0"));
        }
        if self.storage.database_url.is_empty() {
            return Err(anyhow::anyhow!("database_url cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.chunking.chunk_overlap, 25);
        assert_eq!(config.conflict.k_neighbors, 10);
        assert_eq!(config.conflict.verifier_permits, 5);
    }

    #[test]
    fn test_validate_rejects_bad_overlap() {
        let mut config = Config::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.conflict.dedup_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trip_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.chunking.chunk_size, config.chunking.chunk_size);
    }

    /// `serial_test` keeps this alongside any other test that touches
    /// process-wide environment variables from racing each other.
    #[test]
    #[serial_test::serial]
    fn test_from_file_applies_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragkeeper.toml");
        std::fs::write(&path, "[server]\nbind_addr = \"127.0.0.1:9000\"\n").unwrap();

        std::env::set_var("RAGKEEPER__SERVER__BIND_ADDR", "127.0.0.1:9999");
        let config = Config::from_file(&path).unwrap();
        std::env::remove_var("RAGKEEPER__SERVER__BIND_ADDR");

        assert_eq!(config.server.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.chunking.chunk_size, 200);
    }
}
