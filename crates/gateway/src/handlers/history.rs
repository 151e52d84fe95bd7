//! Conversation history handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use docpilot_common::errors::{AppError, Result};
use docpilot_common::types::Message;
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Return only the most recent N messages
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub thread_id: String,
    /// Compacted head of the conversation, when a summarization has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Message>,
    pub messages: Vec<Message>,
    pub token_estimate: usize,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub thread_id: String,
    pub deleted: bool,
}

/// GET /v1/history/{thread_id}
pub async fn get_history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>> {
    let conversation = state.assistant.memory().load_existing(&thread_id).await?;

    let mut messages = conversation.messages;
    if let Some(limit) = params.limit {
        let skip = messages.len().saturating_sub(limit);
        messages.drain(..skip);
    }

    Ok(Json(HistoryResponse {
        thread_id: conversation.thread_id,
        summary: conversation.summary,
        messages,
        token_estimate: conversation.running_token_estimate,
    }))
}

/// DELETE /v1/history/{thread_id}
pub async fn delete_history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.assistant.memory().clear(&thread_id).await?;
    if !deleted {
        return Err(AppError::ThreadNotFound { thread_id });
    }

    Ok(Json(DeleteResponse {
        thread_id,
        deleted: true,
    }))
}
