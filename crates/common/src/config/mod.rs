//! Configuration management for docpilot services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Search index backend configuration
    #[serde(default)]
    pub search: SearchBackendConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval engine tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Conversation memory policy
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Checkpoint store configuration
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Capacity of the per-turn event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchBackendConfig {
    /// Backend kind: http, memory
    #[serde(default = "default_search_provider")]
    pub provider: String,

    /// Base URL of the search service
    #[serde(default = "default_search_url")]
    pub url: String,

    /// Index name to query
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_search_deadline")]
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: http, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_embedding_deadline")]
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// LLM provider: http, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key
    pub api_key: Option<String>,

    /// API base URL
    pub api_base: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_llm_deadline")]
    pub deadline_ms: u64,
}

/// A single field boost entry, e.g. `full_text^3.0`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldBoost {
    pub field: String,
    pub boost: f32,
}

impl FieldBoost {
    pub fn new(field: &str, boost: f32) -> Self {
        Self {
            field: field.to_string(),
            boost,
        }
    }
}

/// Retrieval engine tuning
///
/// The boost vectors and the RRF constant are configuration, not law; these
/// are the enumerated presets selected per detected query type.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// RRF smoothing constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Weight applied to the lexical list's reciprocal-rank terms
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,

    /// Weight applied to the vector list's reciprocal-rank terms
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    /// Documents returned per sub-query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Over-fetch multiplier for each ranked list before fusion
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,

    /// Cap on the merged research context, independent of per-query top_k
    #[serde(default = "default_max_context_documents")]
    pub max_context_documents: usize,

    /// Concurrent sub-query limit inside the researcher
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Field boosts for code-type queries
    #[serde(default = "default_code_boosts")]
    pub code_boosts: Vec<FieldBoost>,

    /// Field boosts for API-reference queries
    #[serde(default = "default_api_boosts")]
    pub api_boosts: Vec<FieldBoost>,

    /// Field boosts for conceptual queries (the default weighting)
    #[serde(default = "default_conceptual_boosts")]
    pub conceptual_boosts: Vec<FieldBoost>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Token estimate threshold that triggers summarization
    #[serde(default = "default_token_threshold")]
    pub token_threshold: usize,

    /// Most recent messages retained verbatim through a summarization
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckpointConfig {
    /// Store kind: redis, memory
    #[serde(default = "default_checkpoint_provider")]
    pub provider: String,

    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_event_buffer() -> usize { 64 }
fn default_search_provider() -> String { "http".to_string() }
fn default_search_url() -> String { "http://localhost:9200".to_string() }
fn default_index_name() -> String { "docs_chunks".to_string() }
fn default_search_deadline() -> u64 { 5_000 }
fn default_embedding_provider() -> String { "http".to_string() }
fn default_embedding_model() -> String { "text-embedding-004".to_string() }
fn default_embedding_dimension() -> usize { 768 }
fn default_embedding_deadline() -> u64 { 10_000 }
fn default_llm_provider() -> String { "http".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> usize { 2048 }
fn default_llm_deadline() -> u64 { 60_000 }
fn default_rrf_k() -> f64 { 60.0 }
fn default_lexical_weight() -> f64 { 0.4 }
fn default_vector_weight() -> f64 { 0.6 }
fn default_top_k() -> usize { 5 }
fn default_overfetch() -> usize { 2 }
fn default_max_context_documents() -> usize { 15 }
fn default_max_concurrency() -> usize { 4 }
fn default_token_threshold() -> usize { 1000 }
fn default_keep_recent() -> usize { 3 }
fn default_checkpoint_provider() -> String { "memory".to_string() }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "docpilot".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "docpilot".to_string() }

fn default_code_boosts() -> Vec<FieldBoost> {
    vec![
        FieldBoost::new("code_blocks.code", 3.5),
        FieldBoost::new("full_text", 3.0),
        FieldBoost::new("headings", 2.0),
    ]
}

fn default_api_boosts() -> Vec<FieldBoost> {
    vec![
        FieldBoost::new("headings", 3.5),
        FieldBoost::new("title", 3.0),
        FieldBoost::new("full_text", 2.0),
    ]
}

fn default_conceptual_boosts() -> Vec<FieldBoost> {
    vec![
        FieldBoost::new("headings", 3.0),
        FieldBoost::new("full_text", 2.5),
        FieldBoost::new("title", 2.0),
    ]
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for SearchBackendConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            url: default_search_url(),
            index_name: default_index_name(),
            deadline_ms: default_search_deadline(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            deadline_ms: default_embedding_deadline(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            deadline_ms: default_llm_deadline(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            lexical_weight: default_lexical_weight(),
            vector_weight: default_vector_weight(),
            top_k: default_top_k(),
            overfetch_factor: default_overfetch(),
            max_context_documents: default_max_context_documents(),
            max_concurrency: default_max_concurrency(),
            code_boosts: default_code_boosts(),
            api_boosts: default_api_boosts(),
            conceptual_boosts: default_conceptual_boosts(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            token_threshold: default_token_threshold(),
            keep_recent: default_keep_recent(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            provider: default_checkpoint_provider(),
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            search: SearchBackendConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            memory: MemoryConfig::default(),
            checkpoint: CheckpointConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(config.retrieval.lexical_weight, 0.4);
        assert_eq!(config.retrieval.vector_weight, 0.6);
        assert_eq!(config.memory.token_threshold, 1000);
        assert_eq!(config.memory.keep_recent, 3);
    }

    #[test]
    fn test_default_boost_tables() {
        let config = RetrievalConfig::default();
        assert_eq!(config.code_boosts[0].field, "code_blocks.code");
        assert_eq!(config.api_boosts[0].field, "headings");
        assert_eq!(config.conceptual_boosts[0].field, "headings");
    }
}
