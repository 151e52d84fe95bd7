//! Research planning
//!
//! Two structured LLM stages: first the plan steps, then the sub-queries
//! for each step. Either stage failing falls back to a single-step plan
//! built from the raw user query, so planning never kills a turn.

use crate::prompts::{GENERATE_QUERIES_SYSTEM_PROMPT, RESEARCH_PLAN_SYSTEM_PROMPT};
use docpilot_common::errors::{AppError, Result};
use docpilot_common::llm::{ChatMessage, LlmClient};
use docpilot_common::types::{ResearchPlan, ResearchStep, MAX_PLAN_STEPS};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct PlanReply {
    steps: Vec<String>,
}

#[derive(Deserialize)]
struct QueriesReply {
    queries: Vec<String>,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Build a normalized research plan for the conversation's latest query
    pub async fn create_plan(&self, conversation: &[ChatMessage], query: &str) -> ResearchPlan {
        let plan = match self.generate(conversation, query).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Planning failed, falling back to single-step plan");
                ResearchPlan::single_step(query)
            }
        };

        let plan = plan.normalize(query);
        debug!(
            steps = plan.steps.len(),
            sub_queries = plan.sub_queries().len(),
            "Research plan ready"
        );
        plan
    }

    async fn generate(
        &self,
        conversation: &[ChatMessage],
        query: &str,
    ) -> Result<ResearchPlan> {
        let mut messages = vec![ChatMessage::system(RESEARCH_PLAN_SYSTEM_PROMPT)];
        messages.extend_from_slice(conversation);

        let value = self.llm.complete_json(&messages).await.map_err(planning)?;
        let reply: PlanReply = serde_json::from_value(value).map_err(planning)?;

        let mut steps = Vec::new();
        for (id, objective) in reply.steps.into_iter().take(MAX_PLAN_STEPS).enumerate() {
            let sub_queries = self.generate_queries(&objective, query).await?;
            steps.push(ResearchStep {
                id,
                objective,
                sub_queries,
            });
        }

        Ok(ResearchPlan { steps })
    }

    /// Expand one plan step into concrete search queries
    async fn generate_queries(&self, objective: &str, query: &str) -> Result<Vec<String>> {
        let messages = vec![
            ChatMessage::system(GENERATE_QUERIES_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Research step: {}\n\nOriginal question: {}",
                objective, query
            )),
        ];

        let value = self.llm.complete_json(&messages).await.map_err(planning)?;
        let reply: QueriesReply = serde_json::from_value(value).map_err(planning)?;
        Ok(reply.queries)
    }
}

fn planning(e: impl std::fmt::Display) -> AppError {
    AppError::PlanningFailure {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpilot_common::llm::{ScriptedLlm, ScriptedReply};
    use serde_json::json;

    #[tokio::test]
    async fn test_two_stage_plan_assembly() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedReply::Json(json!({ "steps": ["find the save API", "find examples"] })),
            ScriptedReply::Json(json!({ "queries": ["model save api", "save weights format"] })),
            ScriptedReply::Json(json!({ "queries": ["saved model example"] })),
        ]));

        let plan = Planner::new(llm)
            .create_plan(&[ChatMessage::user("how do I save a model?")], "how do I save a model?")
            .await;

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].objective, "find the save API");
        assert_eq!(
            plan.sub_queries(),
            vec!["model save api", "save weights format", "saved model example"]
        );
    }

    #[tokio::test]
    async fn test_plan_failure_falls_back_to_single_step() {
        let plan = Planner::new(Arc::new(ScriptedLlm::failing()))
            .create_plan(&[], "why is my loss NaN?")
            .await;

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.sub_queries(), vec!["why is my loss NaN?"]);
    }

    #[tokio::test]
    async fn test_query_stage_failure_falls_back() {
        // First stage succeeds, second fails
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedReply::Json(
            json!({ "steps": ["step one"] }),
        )]));

        let plan = Planner::new(llm).create_plan(&[], "original question").await;
        assert_eq!(plan.sub_queries(), vec!["original question"]);
    }

    #[tokio::test]
    async fn test_overlong_plan_is_capped() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedReply::Json(json!({ "steps": ["a", "b", "c", "d", "e"] })),
            ScriptedReply::Json(json!({ "queries": ["q1"] })),
            ScriptedReply::Json(json!({ "queries": ["q2"] })),
            ScriptedReply::Json(json!({ "queries": ["q3"] })),
        ]));

        let plan = Planner::new(llm).create_plan(&[], "q").await;
        assert_eq!(plan.steps.len(), 3);
    }
}
