//! Conversation memory
//!
//! Keeps per-thread history bounded: once the token estimate crosses the
//! threshold, the head of the conversation is compacted into an LLM summary
//! and only the most recent messages survive verbatim. Summarization failure
//! leaves the state untouched so the next turn retries.

use crate::prompts::SUMMARIZE_SYSTEM_PROMPT;
use docpilot_common::checkpoint::CheckpointStore;
use docpilot_common::config::MemoryConfig;
use docpilot_common::errors::{AppError, Result};
use docpilot_common::llm::{ChatMessage, LlmClient};
use docpilot_common::types::{ConversationState, Message, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Rough token estimate: English averages about 4 tokens per 3 words
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count() * 4 / 3
}

fn state_estimate(state: &ConversationState) -> usize {
    let summary_tokens = state
        .summary
        .as_ref()
        .map(|s| estimate_tokens(&s.content))
        .unwrap_or(0);
    summary_tokens
        + state
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<usize>()
}

pub struct MemoryManager {
    store: Arc<dyn CheckpointStore>,
    llm: Arc<dyn LlmClient>,
    config: MemoryConfig,
    /// One lock per active thread; turns on the same thread serialize here
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        llm: Arc<dyn LlmClient>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            llm,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lock guarding all state access for one thread
    pub async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Load a thread's state, creating a fresh one for unknown threads
    pub async fn load(&self, thread_id: &str) -> Result<ConversationState> {
        Ok(self
            .store
            .load(thread_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(thread_id)))
    }

    /// Load a thread's state, failing for unknown threads
    pub async fn load_existing(&self, thread_id: &str) -> Result<ConversationState> {
        self.store
            .load(thread_id)
            .await?
            .ok_or_else(|| AppError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })
    }

    /// History in LLM order: the summary first (if any), then the verbatim
    /// tail, chronological
    pub fn history(state: &ConversationState) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(state.messages.len() + 1);
        if let Some(summary) = &state.summary {
            out.push(ChatMessage::system(format!(
                "Summary of the conversation so far:\n{}",
                summary.content
            )));
        }
        for m in &state.messages {
            out.push(match m.role {
                Role::User => ChatMessage::user(&m.content),
                Role::Assistant => ChatMessage::assistant(&m.content),
                Role::System => ChatMessage::system(&m.content),
            });
        }
        out
    }

    /// Append a message and refresh the running token estimate
    pub fn append(state: &mut ConversationState, message: Message) {
        state.messages.push(message);
        state.running_token_estimate = state_estimate(state);
    }

    /// Compact the conversation if it has outgrown the threshold.
    ///
    /// Returns whether a summarization ran. On LLM failure the state is
    /// left exactly as it was.
    pub async fn maybe_summarize(&self, state: &mut ConversationState) -> Result<bool> {
        if state.running_token_estimate < self.config.token_threshold
            || state.messages.len() <= self.config.keep_recent
        {
            return Ok(false);
        }

        let split = state.messages.len() - self.config.keep_recent;
        let to_compact = &state.messages[..split];

        let mut prompt = match &state.summary {
            Some(summary) => format!(
                "This is the existing summary of the conversation:\n{}\n\n\
                 Extend the summary by incorporating the following new messages:\n",
                summary.content
            ),
            None => "Create a summary of the following conversation messages:\n".to_string(),
        };
        for m in to_compact {
            let role = match m.role {
                Role::User => "Human",
                Role::Assistant => "Assistant",
                Role::System => "System",
            };
            prompt.push_str(&format!("{}: {}\n", role, m.content));
        }
        prompt.push_str("\nNew summary:");

        let messages = vec![
            ChatMessage::system(SUMMARIZE_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        let summary_text = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| AppError::SummarizationFailure {
                message: e.to_string(),
            })?
            .trim()
            .to_string();

        state.summary = Some(Message::system(summary_text));
        state.messages.drain(..split);
        state.running_token_estimate = state_estimate(state);

        info!(
            thread_id = %state.thread_id,
            kept = state.messages.len(),
            estimate = state.running_token_estimate,
            "Conversation summarized"
        );
        metrics::counter!(
            format!("{}_summarizations_total", docpilot_common::metrics::METRICS_PREFIX),
            "outcome" => "ok"
        )
        .increment(1);
        Ok(true)
    }

    /// Persist a thread's state
    pub async fn save(&self, state: &ConversationState) -> Result<()> {
        self.store.save(state).await
    }

    /// Remove a thread entirely; returns whether it existed
    pub async fn clear(&self, thread_id: &str) -> Result<bool> {
        let existed = self.store.delete(thread_id).await?;
        self.locks.lock().await.remove(thread_id);
        debug!(thread_id, existed, "Thread cleared");
        Ok(existed)
    }

    /// Log and count a summarization failure; the caller keeps the turn alive
    pub fn note_summarization_failure(state: &ConversationState, error: &AppError) {
        warn!(
            thread_id = %state.thread_id,
            error = %error,
            "Summarization failed, retaining full history for retry"
        );
        metrics::counter!(
            format!("{}_summarizations_total", docpilot_common::metrics::METRICS_PREFIX),
            "outcome" => "failed"
        )
        .increment(1);
    }
}
