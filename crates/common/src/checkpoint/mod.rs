//! Conversation checkpoint persistence
//!
//! Each thread's [`ConversationState`] is checkpointed after every turn so a
//! conversation survives process restarts. Redis backs production; an
//! in-memory store backs tests and single-node development.

use crate::config::CheckpointConfig;
use crate::errors::{AppError, Result};
use crate::types::ConversationState;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Trait for conversation state persistence
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the state for a thread, if any turn has been checkpointed
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>>;

    /// Persist the full state for its thread
    async fn save(&self, state: &ConversationState) -> Result<()>;

    /// Drop a thread's state; returns whether anything existed
    async fn delete(&self, thread_id: &str) -> Result<bool>;
}

/// Build the error and count it
fn checkpoint_error(message: String) -> AppError {
    crate::metrics::record_checkpoint_error();
    AppError::CheckpointError { message }
}

/// Redis-backed checkpoint store
pub struct RedisCheckpointStore {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
}

impl RedisCheckpointStore {
    pub async fn new(config: &CheckpointConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| checkpoint_error(format!("Failed to create Redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| checkpoint_error(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Build a prefixed key
    fn key(&self, thread_id: &str) -> String {
        format!("{}:thread:{}", self.key_prefix, thread_id)
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        let full_key = self.key(thread_id);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| {
            checkpoint_error(format!("Failed to load thread '{}': {}", thread_id, e))
        })?;

        match value {
            Some(json) => {
                let state = serde_json::from_str(&json).map_err(|e| {
                    checkpoint_error(format!("Corrupt checkpoint for thread '{}': {}", thread_id, e))
                })?;
                debug!(key = %full_key, "Checkpoint hit");
                Ok(Some(state))
            }
            None => {
                debug!(key = %full_key, "Checkpoint miss");
                Ok(None)
            }
        }
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let full_key = self.key(&state.thread_id);
        let json = serde_json::to_string(state)
            .map_err(|e| checkpoint_error(format!("Failed to serialize state: {}", e)))?;

        let mut conn = self.connection.write().await;
        conn.set::<_, _, ()>(&full_key, &json).await.map_err(|e| {
            checkpoint_error(format!(
                "Failed to save thread '{}': {}",
                state.thread_id, e
            ))
        })?;

        debug!(key = %full_key, messages = state.messages.len(), "Checkpoint saved");
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let full_key = self.key(thread_id);
        let mut conn = self.connection.write().await;

        let deleted: i32 = conn.del(&full_key).await.map_err(|e| {
            checkpoint_error(format!("Failed to delete thread '{}': {}", thread_id, e))
        })?;

        Ok(deleted > 0)
    }
}

/// In-memory checkpoint store for tests and single-node development
#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        self.threads
            .write()
            .await
            .insert(state.thread_id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        Ok(self.threads.write().await.remove(thread_id).is_some())
    }
}

/// Create a checkpoint store based on configuration
pub async fn create_checkpoint_store(
    config: &CheckpointConfig,
) -> Result<Arc<dyn CheckpointStore>> {
    match config.provider.as_str() {
        "redis" => Ok(Arc::new(RedisCheckpointStore::new(config).await?)),
        "memory" => Ok(Arc::new(MemoryCheckpointStore::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown checkpoint provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();

        assert!(store.load("t1").await.unwrap().is_none());

        let mut state = ConversationState::new("t1");
        state.messages.push(Message::user("hello"));
        store.save(&state).await.unwrap();

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.thread_id, "t1");
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryCheckpointStore::new();
        store.save(&ConversationState::new("t2")).await.unwrap();

        assert!(store.delete("t2").await.unwrap());
        assert!(!store.delete("t2").await.unwrap());
        assert!(store.load("t2").await.unwrap().is_none());
    }
}
