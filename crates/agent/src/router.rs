//! Query routing
//!
//! One structured LLM call classifies the turn into a route label. The
//! router fails open: if classification is unavailable the turn proceeds
//! down the research path so the user still gets an answer.

use crate::prompts::ROUTER_SYSTEM_PROMPT;
use docpilot_common::errors::{AppError, Result};
use docpilot_common::llm::{ChatMessage, LlmClient};
use docpilot_common::metrics::record_route;
use docpilot_common::types::{RouteLabel, RouterDecision};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Router {
    llm: Arc<dyn LlmClient>,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Classify the conversation's latest inquiry
    pub async fn classify(&self, conversation: &[ChatMessage]) -> RouterDecision {
        let decision = match self.try_classify(conversation).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Defaulting to the research route");
                RouterDecision {
                    label: RouteLabel::ResearchRequired,
                    logic: "classification unavailable".to_string(),
                    degraded: true,
                }
            }
        };

        debug!(label = ?decision.label, degraded = decision.degraded, "Query routed");
        record_route(label_str(decision.label));
        decision
    }

    async fn try_classify(&self, conversation: &[ChatMessage]) -> Result<RouterDecision> {
        let mut messages = vec![ChatMessage::system(ROUTER_SYSTEM_PROMPT)];
        messages.extend_from_slice(conversation);

        let value = self
            .llm
            .complete_json(&messages)
            .await
            .map_err(|e| AppError::ClassificationFailure {
                message: e.to_string(),
            })?;
        parse_decision(&value)
    }
}

fn parse_decision(value: &serde_json::Value) -> Result<RouterDecision> {
    let label = match value.get("type").and_then(|t| t.as_str()) {
        Some("more-info") => RouteLabel::NeedsClarification,
        Some("documentation") => RouteLabel::ResearchRequired,
        Some("general") => RouteLabel::General,
        other => {
            return Err(AppError::ClassificationFailure {
                message: format!("unknown route label: {:?}", other),
            })
        }
    };
    let logic = value
        .get("logic")
        .and_then(|l| l.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(RouterDecision {
        label,
        logic,
        degraded: false,
    })
}

fn label_str(label: RouteLabel) -> &'static str {
    match label {
        RouteLabel::NeedsClarification => "needs_clarification",
        RouteLabel::General => "general",
        RouteLabel::ResearchRequired => "research_required",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpilot_common::llm::{ScriptedLlm, ScriptedReply};
    use serde_json::json;

    #[tokio::test]
    async fn test_documentation_label_routes_to_research() {
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedReply::Json(json!({
            "type": "documentation",
            "logic": "asks about an API"
        }))]));

        let decision = Router::new(llm)
            .classify(&[ChatMessage::user("how do I save a model?")])
            .await;

        assert_eq!(decision.label, RouteLabel::ResearchRequired);
        assert_eq!(decision.logic, "asks about an API");
        assert!(!decision.degraded);
    }

    #[tokio::test]
    async fn test_router_failure_fails_open() {
        let llm = Arc::new(ScriptedLlm::failing());

        let decision = Router::new(llm)
            .classify(&[ChatMessage::user("anything")])
            .await;

        assert_eq!(decision.label, RouteLabel::ResearchRequired);
        assert!(decision.degraded);
    }

    #[tokio::test]
    async fn test_unknown_label_fails_open() {
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedReply::Json(json!({
            "type": "banana",
            "logic": "?"
        }))]));

        let decision = Router::new(llm).classify(&[ChatMessage::user("hi")]).await;
        assert_eq!(decision.label, RouteLabel::ResearchRequired);
        assert!(decision.degraded);
    }
}
