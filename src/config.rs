use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docqa server.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the embedding service.
    pub embedding_url: String,
    /// Credential presented to the embedding service. Required at startup.
    pub embedding_api_key: String,
    /// Embedding model identifier passed to the service.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the answer-generating language model service.
    pub generation_url: String,
    /// Credential presented to the language model service. Required at startup.
    pub generation_api_key: String,
    /// Language model identifier used for answer synthesis.
    pub generation_model: String,
    /// Directory holding the vector-index file and metadata file.
    pub data_dir: PathBuf,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Tombstone count that triggers index compaction (`0` compacts on every delete).
    pub compact_threshold: usize,
    /// Drop orphaned vectors/chunks found on load instead of refusing to serve.
    pub auto_repair: bool,
    /// Default number of chunks returned per query.
    pub top_k: usize,
    /// Search oversampling multiplier applied before post-filtering.
    pub oversample_factor: usize,
    /// Optional cap on retrieved chunks per document.
    pub per_document_cap: Option<usize>,
    /// Maximum attempts for transient embedding/generation failures.
    pub retry_max_attempts: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            embedding_url: load_env("DOCQA_EMBEDDING_URL")?,
            embedding_api_key: load_env("DOCQA_EMBEDDING_API_KEY")?,
            embedding_model: load_env("DOCQA_EMBEDDING_MODEL")?,
            embedding_dimension: {
                let raw = load_env("DOCQA_EMBEDDING_DIMENSION")?;
                parse_env("DOCQA_EMBEDDING_DIMENSION", raw)?
            },
            generation_url: load_env("DOCQA_GENERATION_URL")?,
            generation_api_key: load_env("DOCQA_GENERATION_API_KEY")?,
            generation_model: load_env("DOCQA_GENERATION_MODEL")?,
            data_dir: load_env_optional("DOCQA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            chunk_size: parse_env_or("DOCQA_CHUNK_SIZE", 1000)?,
            chunk_overlap: parse_env_or("DOCQA_CHUNK_OVERLAP", 200)?,
            compact_threshold: parse_env_or("DOCQA_COMPACT_THRESHOLD", 64)?,
            auto_repair: parse_env_or("DOCQA_AUTO_REPAIR", true)?,
            top_k: parse_env_or("DOCQA_TOP_K", 5)?,
            oversample_factor: parse_env_or("DOCQA_OVERSAMPLE_FACTOR", 4)?,
            per_document_cap: load_env_optional("DOCQA_PER_DOCUMENT_CAP")
                .map(|value| parse_env("DOCQA_PER_DOCUMENT_CAP", value))
                .transpose()?,
            retry_max_attempts: parse_env_or("DOCQA_RETRY_MAX_ATTEMPTS", 3)?,
            server_port: load_env_optional("DOCQA_SERVER_PORT")
                .map(|value| parse_env("DOCQA_SERVER_PORT", value))
                .transpose()?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => parse_env(key, value),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
///
/// Missing service credentials are a fatal configuration error here, never a
/// per-request failure later.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        embedding_url = %config.embedding_url,
        generation_url = %config.generation_url,
        data_dir = %config.data_dir.display(),
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        compact_threshold = config.compact_threshold,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
