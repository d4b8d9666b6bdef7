use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Number of worker processes sharing the queue; also the shard count.
    #[serde(default = "default_worker_count")]
    pub count: u32,
    /// Sleep between polls when no job was claimed.
    #[serde(default = "default_idle_sleep_secs")]
    pub idle_sleep_secs: f64,
    /// Sleep between polls right after processing a job (drain mode).
    #[serde(default = "default_busy_sleep_secs")]
    pub busy_sleep_secs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            idle_sleep_secs: default_idle_sleep_secs(),
            busy_sleep_secs: default_busy_sleep_secs(),
        }
    }
}

fn default_worker_count() -> u32 {
    4
}
fn default_idle_sleep_secs() -> f64 {
    3.0
}
fn default_busy_sleep_secs() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Deadline for the parse stage.
    #[serde(default = "default_stage_timeout_secs")]
    pub parse_timeout_secs: u64,
    /// Deadline for each indexing stage (vector and keyword).
    #[serde(default = "default_stage_timeout_secs")]
    pub index_timeout_secs: u64,
    /// Parsed documents above this many characters are rejected.
    #[serde(default = "default_max_chars")]
    pub max_chars: i64,
    /// Chunk size used when an enqueue does not specify one.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parse_timeout_secs: default_stage_timeout_secs(),
            index_timeout_secs: default_stage_timeout_secs(),
            max_chars: default_max_chars(),
            default_chunk_size: default_chunk_size(),
        }
    }
}

fn default_stage_timeout_secs() -> u64 {
    300
}
fn default_max_chars() -> i64 {
    1_000_000
}
fn default_chunk_size() -> i64 {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Whether `retrieve` also fans out to the keyword store by default.
    #[serde(default = "default_hybrid")]
    pub hybrid: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            hybrid: default_hybrid(),
        }
    }
}

fn default_top_k() -> i64 {
    20
}
fn default_hybrid() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hash"` (deterministic local embedder) or `"remote"` (HTTP service).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.worker.count == 0 {
        anyhow::bail!("worker.count must be >= 1");
    }
    if config.worker.idle_sleep_secs <= 0.0 || config.worker.busy_sleep_secs <= 0.0 {
        anyhow::bail!("worker sleep intervals must be > 0");
    }
    if config.pipeline.parse_timeout_secs == 0 || config.pipeline.index_timeout_secs == 0 {
        anyhow::bail!("pipeline stage timeouts must be > 0");
    }
    if config.pipeline.max_chars <= 0 {
        anyhow::bail!("pipeline.max_chars must be > 0");
    }
    if config.pipeline.default_chunk_size <= 0 {
        anyhow::bail!("pipeline.default_chunk_size must be > 0");
    }
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    match config.embedding.provider.as_str() {
        "hash" => {}
        "remote" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set when provider is 'remote'");
            }
            if config.embedding.dims == 0 {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'remote'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or remote.",
            other
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse("[db]\npath = \"/tmp/corpusd.sqlite\"\n").unwrap();
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.worker.idle_sleep_secs, 3.0);
        assert_eq!(config.worker.busy_sleep_secs, 0.1);
        assert_eq!(config.pipeline.parse_timeout_secs, 300);
        assert_eq!(config.pipeline.index_timeout_secs, 300);
        assert!(config.retrieval.hybrid);
        assert_eq!(config.embedding.provider, "hash");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = parse("[db]\npath = \"x\"\n[worker]\ncount = 0\n").unwrap_err();
        assert!(err.to_string().contains("worker.count"));
    }

    #[test]
    fn test_remote_provider_requires_model() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"remote\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}
