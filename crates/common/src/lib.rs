//! Docpilot Common Library
//!
//! Shared code for the docpilot query-time layer including:
//! - Core data model (documents, messages, plans, stream events)
//! - Error types and handling
//! - Configuration management
//! - Search backend, embedding, LLM, and checkpoint store clients
//! - Metrics and observability

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use types::{Document, Message, ScoredDocument, StreamEvent};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
