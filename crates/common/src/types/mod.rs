//! Core data model for the query-time layer
//!
//! Everything here is serializable: documents come out of the search index,
//! conversation state round-trips through the checkpoint store, and stream
//! events go over the wire to the transport layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A fenced code block extracted from a documentation page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeBlock {
    /// The code itself
    pub code: String,

    /// Surrounding prose, if the indexer captured any
    #[serde(default)]
    pub context: String,
}

/// Kind of documentation page a chunk came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Tutorial,
    ApiReference,
    Guide,
    Example,
}

/// An indexed documentation chunk
///
/// Immutable once indexed; the query-time layer only reads these. The
/// embedding vector stays inside the search index and is never fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Chunk ID (unique within the index)
    pub id: String,

    /// Page title
    pub title: String,

    /// Full chunk text, code included
    pub full_text: String,

    /// Section headings on the page
    #[serde(default)]
    pub headings: Vec<String>,

    /// Code blocks within the chunk
    #[serde(default)]
    pub code_blocks: Vec<CodeBlock>,

    /// Breadcrumb path from the site root
    #[serde(default)]
    pub breadcrumbs: Vec<String>,

    /// Page classification
    pub page_type: PageType,

    /// Canonical source URL, used for citations
    pub url: String,
}

/// A document scored by the hybrid retrieval engine
///
/// Uniqueness key is `document.id`; discarded after context assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,

    /// 1-based rank in the lexical result list, if present there
    pub lexical_rank: Option<usize>,

    /// 1-based rank in the vector result list, if present there
    pub vector_rank: Option<usize>,

    /// Weighted reciprocal-rank-fusion score
    pub fused_score: f64,

    /// Field responsible for the top scoring signal, for citation context
    pub matched_field: Option<String>,
}

/// One step of a research plan. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchStep {
    pub id: usize,
    pub objective: String,
    pub sub_queries: Vec<String>,
}

/// Ordered research plan, 1-3 steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub steps: Vec<ResearchStep>,
}

/// Maximum number of steps a plan may carry
pub const MAX_PLAN_STEPS: usize = 3;

impl ResearchPlan {
    /// Fallback plan: a single step whose sole sub-query is the raw user query
    pub fn single_step(query: &str) -> Self {
        Self {
            steps: vec![ResearchStep {
                id: 0,
                objective: query.to_string(),
                sub_queries: vec![query.to_string()],
            }],
        }
    }

    /// Enforce plan invariants after generation:
    /// - at most [`MAX_PLAN_STEPS`] steps, kept in declared priority order
    /// - sub-queries deduplicated across the whole plan (case-insensitive,
    ///   whitespace-normalized)
    /// - steps left with no sub-queries are dropped
    /// - an empty plan falls back to [`ResearchPlan::single_step`]
    pub fn normalize(mut self, original_query: &str) -> Self {
        self.steps.truncate(MAX_PLAN_STEPS);

        let mut seen: HashSet<String> = HashSet::new();
        for step in &mut self.steps {
            step.sub_queries.retain(|q| {
                let key = normalize_query(q);
                !key.is_empty() && seen.insert(key)
            });
        }
        self.steps.retain(|s| !s.sub_queries.is_empty());

        if self.steps.is_empty() {
            return Self::single_step(original_query);
        }
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.id = i;
        }
        self
    }

    /// All sub-queries across all steps, in plan order
    pub fn sub_queries(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|s| s.sub_queries.iter().map(String::as_str))
            .collect()
    }

    pub fn objectives(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.objective.clone()).collect()
    }
}

/// Lowercased, whitespace-collapsed form used as the dedup key
fn normalize_query(q: &str) -> String {
    q.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Message role within a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single conversation message. Append-only within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,

    /// Canonical URLs of cited documents (assistant messages only)
    #[serde(default)]
    pub citations: Vec<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
            citations: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_citations(mut self, citations: Vec<String>) -> Self {
        self.citations = citations;
        self
    }
}

/// Per-thread conversation state, owned by the memory manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,

    /// Verbatim messages, chronological. After a summarization pass this
    /// holds only the retained tail.
    pub messages: Vec<Message>,

    /// Approximate token count over `summary + messages`
    pub running_token_estimate: usize,

    /// Compacted head of the conversation, if a summarization has run
    pub summary: Option<Message>,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            running_token_estimate: 0,
            summary: None,
        }
    }
}

/// Router classification label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteLabel {
    /// More information needed before research can help
    NeedsClarification,
    /// General / off-topic question
    General,
    /// Answerable by researching the documentation corpus
    ResearchRequired,
}

/// Router output for a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterDecision {
    pub label: RouteLabel,

    /// Model's stated reasoning, reused by downstream prompts
    pub logic: String,

    /// True when classification failed and we defaulted to research
    #[serde(default)]
    pub degraded: bool,
}

/// Lifecycle event kinds emitted during a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Node,
    ResponseChunk,
    End,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Node => "node",
            EventKind::ResponseChunk => "response_chunk",
            EventKind::End => "end",
            EventKind::Error => "error",
        }
    }
}

/// A lifecycle event streamed to the client
///
/// Ephemeral; delivery order must match emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,

    /// Name of the state-machine node that produced the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    pub fn node(name: &str, payload: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Node,
            node: Some(name.to_string()),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn chunk(node: &str, text: &str) -> Self {
        Self {
            kind: EventKind::ResponseChunk,
            node: Some(node.to_string()),
            payload: serde_json::Value::String(text.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn end(payload: serde_json::Value) -> Self {
        Self {
            kind: EventKind::End,
            node: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            kind: EventKind::Error,
            node: None,
            payload: serde_json::json!({ "error": message }),
            timestamp: Utc::now(),
        }
    }
}

/// Final result of a non-streaming turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub answer: Message,
    pub sources: Vec<String>,
    pub research_steps: Vec<String>,
    pub router_decision: RouterDecision,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: usize, queries: &[&str]) -> ResearchStep {
        ResearchStep {
            id,
            objective: format!("step {}", id),
            sub_queries: queries.iter().map(|q| q.to_string()).collect(),
        }
    }

    #[test]
    fn test_plan_dedupes_across_steps() {
        let plan = ResearchPlan {
            steps: vec![
                step(0, &["CNN layers", "conv2d usage"]),
                step(1, &["cnn   LAYERS", "pooling"]),
            ],
        }
        .normalize("how to build a cnn");

        let queries = plan.sub_queries();
        assert_eq!(queries, vec!["CNN layers", "conv2d usage", "pooling"]);
    }

    #[test]
    fn test_plan_caps_at_three_steps() {
        let plan = ResearchPlan {
            steps: vec![
                step(0, &["a"]),
                step(1, &["b"]),
                step(2, &["c"]),
                step(3, &["d"]),
            ],
        }
        .normalize("q");

        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.sub_queries(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_plan_falls_back_to_raw_query() {
        let plan = ResearchPlan { steps: vec![] }.normalize("How to build a CNN model?");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.sub_queries(), vec!["How to build a CNN model?"]);
    }

    #[test]
    fn test_step_with_only_duplicates_is_dropped() {
        let plan = ResearchPlan {
            steps: vec![step(0, &["dense layer"]), step(1, &["Dense  Layer"])],
        }
        .normalize("q");

        assert_eq!(plan.steps.len(), 1);
        // Surviving step ids are reassigned contiguously
        assert_eq!(plan.steps[0].id, 0);
    }
}
