//! Chat handlers
//!
//! One turn per request. The non-streaming variant returns the full
//! outcome as JSON; the streaming variant relays the turn's lifecycle
//! events over SSE, one event per [`StreamEvent`].

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use docpilot_common::errors::{AppError, Result};
use docpilot_common::metrics::RequestMetrics;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    /// Conversation to continue; omitted starts a new one
    pub thread_id: Option<String>,

    /// Caller identity, recorded for request tracing only
    pub user_id: Option<String>,

    #[validate(length(min = 1, max = 4000))]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub research_steps: Vec<String>,
    pub route: docpilot_common::types::RouteLabel,
}

fn validate(request: &ChatRequest) -> Result<String> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("message".to_string()),
    })?;
    Ok(request
        .thread_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string()))
}

/// POST /v1/chat - run a turn to completion
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    let timer = RequestMetrics::start("POST", "/v1/chat");
    let thread_id = validate(&request)?;
    tracing::info!(thread_id, user_id = ?request.user_id, "Chat turn requested");

    let outcome = state
        .assistant
        .run_turn_collect(&thread_id, &request.message)
        .await?;

    timer.finish(200);
    Ok(Json(ChatResponse {
        thread_id,
        answer: outcome.answer.content,
        sources: outcome.sources,
        research_steps: outcome.research_steps,
        route: outcome.router_decision.label,
    }))
}

/// POST /v1/chat/stream - run a turn, relaying lifecycle events over SSE
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let timer = RequestMetrics::start("POST", "/v1/chat/stream");
    let thread_id = validate(&request)?;
    tracing::info!(thread_id, user_id = ?request.user_id, "Streaming chat turn requested");

    let rx = state.assistant.run_turn(&thread_id, &request.message);

    // The timer covers the whole stream, not just the handshake
    let stream = futures::stream::unfold((rx, Some(timer)), |(mut rx, mut timer)| async move {
        match rx.recv().await {
            Some(event) => {
                let sse = Event::default()
                    .event(event.kind.as_str())
                    .json_data(&event)
                    .unwrap_or_else(|_| Event::default().data("{}"));
                Some((Ok(sse), (rx, timer)))
            }
            None => {
                if let Some(timer) = timer.take() {
                    timer.finish(200);
                }
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(thread_id: Option<&str>, message: &str) -> ChatRequest {
        ChatRequest {
            thread_id: thread_id.map(str::to_string),
            user_id: None,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_empty_message_rejected() {
        assert!(validate(&request(None, "")).is_err());
    }

    #[test]
    fn test_missing_thread_id_generates_one() {
        let thread_id = validate(&request(None, "hello")).unwrap();
        assert!(Uuid::parse_str(&thread_id).is_ok());
    }

    #[test]
    fn test_existing_thread_id_preserved() {
        assert_eq!(validate(&request(Some("t-1"), "hello")).unwrap(), "t-1");
    }
}
