//! Turn orchestration
//!
//! Drives one conversation turn through an explicit phase machine:
//! route, then clarify / decline / research, then a streamed answer,
//! then optional summarization. Progress is reported as [`StreamEvent`]s
//! over a bounded channel; every stream terminates with exactly one
//! `End` or `Error` event. A dropped receiver stops the turn at the
//! next send.

use crate::generator::Generator;
use crate::memory::MemoryManager;
use crate::planner::Planner;
use crate::prompts::{general_prompt, more_info_prompt};
use crate::router::Router;
use docpilot_common::errors::{AppError, Result};
use docpilot_common::llm::{ChatMessage, LlmClient};
use docpilot_common::metrics::{record_research_steps, record_turn};
use docpilot_common::types::{
    Message, ResearchPlan, RouteLabel, RouterDecision, ScoredDocument, StreamEvent, TurnOutcome,
};
use docpilot_retrieval::Researcher;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, instrument};

/// Phases of one turn. Transitions only move forward.
enum TurnPhase {
    Route,
    Clarify(RouterDecision),
    General(RouterDecision),
    Plan(RouterDecision),
    Research(RouterDecision, ResearchPlan),
    Respond(RouterDecision, Option<ResearchPlan>, Vec<ScoredDocument>),
}

pub struct Assistant {
    llm: Arc<dyn LlmClient>,
    router: Router,
    planner: Planner,
    generator: Generator,
    researcher: Arc<Researcher>,
    memory: Arc<MemoryManager>,
    event_buffer: usize,
}

fn cancelled() -> AppError {
    AppError::Internal {
        message: "client disconnected".to_string(),
    }
}

fn is_cancelled(e: &AppError) -> bool {
    matches!(e, AppError::Internal { message } if message == "client disconnected")
}

/// Forward an event; false means the receiver is gone
async fn emit(tx: Option<&mpsc::Sender<StreamEvent>>, event: StreamEvent) -> bool {
    match tx {
        Some(tx) => tx.send(event).await.is_ok(),
        None => true,
    }
}

impl Assistant {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        researcher: Arc<Researcher>,
        memory: Arc<MemoryManager>,
        event_buffer: usize,
    ) -> Self {
        Self {
            router: Router::new(Arc::clone(&llm)),
            planner: Planner::new(Arc::clone(&llm)),
            generator: Generator::new(Arc::clone(&llm)),
            llm,
            researcher,
            memory,
            event_buffer: event_buffer.max(1),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Run a turn, streaming progress. The returned receiver yields node
    /// and chunk events and ends with exactly one `End` or `Error`.
    pub fn run_turn(self: &Arc<Self>, thread_id: &str, query: &str) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let this = Arc::clone(self);
        let thread_id = thread_id.to_string();
        let query = query.to_string();

        tokio::spawn(async move {
            let start = Instant::now();
            match this.drive(&thread_id, &query, Some(&tx)).await {
                Ok(outcome) => {
                    record_turn(start.elapsed().as_secs_f64(), "success");
                    let _ = tx
                        .send(StreamEvent::end(json!({
                            "status": "success",
                            "metadata": outcome,
                        })))
                        .await;
                }
                Err(e) if is_cancelled(&e) => {
                    record_turn(start.elapsed().as_secs_f64(), "cancelled");
                    info!(thread_id = %thread_id, "Turn cancelled by client");
                }
                Err(e) => {
                    record_turn(start.elapsed().as_secs_f64(), "error");
                    let _ = tx.send(StreamEvent::error(&e.to_string())).await;
                }
            }
        });

        rx
    }

    /// Run a turn to completion without streaming
    pub async fn run_turn_collect(&self, thread_id: &str, query: &str) -> Result<TurnOutcome> {
        let start = Instant::now();
        let result = self.drive(thread_id, query, None).await;
        record_turn(
            start.elapsed().as_secs_f64(),
            if result.is_ok() { "success" } else { "error" },
        );
        result
    }

    #[instrument(skip(self, tx, query))]
    async fn drive(
        &self,
        thread_id: &str,
        query: &str,
        tx: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<TurnOutcome> {
        // Turns on the same thread are serialized for the whole turn
        let lock = self.memory.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        let mut state = self.memory.load(thread_id).await?;
        MemoryManager::append(&mut state, Message::user(query));
        let history = MemoryManager::history(&state);

        let mut phase = TurnPhase::Route;
        let (decision, plan, documents, answer) = loop {
            phase = match phase {
                TurnPhase::Route => {
                    if !emit(tx, StreamEvent::node("analyze_and_route_query", json!({}))).await {
                        return Err(cancelled());
                    }
                    let decision = self.router.classify(&history).await;
                    if !emit(
                        tx,
                        StreamEvent::node(
                            "analyze_and_route_query",
                            json!({ "router": decision }),
                        ),
                    )
                    .await
                    {
                        return Err(cancelled());
                    }
                    match decision.label {
                        RouteLabel::NeedsClarification => TurnPhase::Clarify(decision),
                        RouteLabel::General => TurnPhase::General(decision),
                        RouteLabel::ResearchRequired => TurnPhase::Plan(decision),
                    }
                }

                TurnPhase::Clarify(decision) => {
                    let answer = self
                        .direct_reply("ask_for_more_info", &more_info_prompt(&decision.logic), &history, tx)
                        .await?;
                    break (decision, None, Vec::new(), answer);
                }

                TurnPhase::General(decision) => {
                    let answer = self
                        .direct_reply(
                            "respond_to_general_query",
                            &general_prompt(&decision.logic),
                            &history,
                            tx,
                        )
                        .await?;
                    break (decision, None, Vec::new(), answer);
                }

                TurnPhase::Plan(decision) => {
                    if !emit(tx, StreamEvent::node("create_research_plan", json!({}))).await {
                        return Err(cancelled());
                    }
                    let plan = self.planner.create_plan(&history, query).await;
                    if !emit(
                        tx,
                        StreamEvent::node(
                            "create_research_plan",
                            json!({
                                "steps": plan.objectives(),
                                "sub_queries": plan.sub_queries().len(),
                            }),
                        ),
                    )
                    .await
                    {
                        return Err(cancelled());
                    }
                    TurnPhase::Research(decision, plan)
                }

                TurnPhase::Research(decision, plan) => {
                    record_research_steps(plan.steps.len());
                    let context = self.researcher.conduct(&plan).await?;
                    if !emit(
                        tx,
                        StreamEvent::node(
                            "conduct_research",
                            json!({
                                "documents_count": context.documents.len(),
                                "sub_queries_failed": context.failed,
                            }),
                        ),
                    )
                    .await
                    {
                        return Err(cancelled());
                    }
                    TurnPhase::Respond(decision, Some(plan), context.documents)
                }

                TurnPhase::Respond(decision, plan, documents) => {
                    if !emit(
                        tx,
                        StreamEvent::node("respond", json!({ "documents_count": documents.len() })),
                    )
                    .await
                    {
                        return Err(cancelled());
                    }

                    let mut stream = self.generator.stream(&history, &documents).await?;
                    let mut full = String::new();
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk.map_err(|e| AppError::GenerationFailure {
                            message: e.to_string(),
                        })?;
                        if !emit(tx, StreamEvent::chunk("respond", &chunk)).await {
                            return Err(cancelled());
                        }
                        full.push_str(&chunk);
                    }

                    let answer = self.generator.finalize(&full, &documents);
                    break (decision, plan, documents, answer);
                }
            };
        };

        MemoryManager::append(&mut state, answer.clone());

        match self.memory.maybe_summarize(&mut state).await {
            Ok(true) => {
                if !emit(
                    tx,
                    StreamEvent::node(
                        "summarize_conversation",
                        json!({ "message_count": state.messages.len() }),
                    ),
                )
                .await
                {
                    return Err(cancelled());
                }
            }
            Ok(false) => {}
            Err(e) => MemoryManager::note_summarization_failure(&state, &e),
        }

        self.memory.save(&state).await?;

        info!(
            thread_id,
            route = ?decision.label,
            documents = documents.len(),
            "Turn complete"
        );

        Ok(TurnOutcome {
            sources: answer.citations.clone(),
            research_steps: plan.map(|p| p.objectives()).unwrap_or_default(),
            router_decision: decision,
            answer,
        })
    }

    /// Single-shot reply path used by clarification and general queries:
    /// the whole reply arrives as one chunk
    async fn direct_reply(
        &self,
        node: &str,
        system_prompt: &str,
        history: &[ChatMessage],
        tx: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<Message> {
        if !emit(tx, StreamEvent::node(node, json!({}))).await {
            return Err(cancelled());
        }

        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend_from_slice(history);

        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| AppError::GenerationFailure {
                message: e.to_string(),
            })?;

        if !emit(tx, StreamEvent::chunk(node, &reply)).await {
            return Err(cancelled());
        }

        Ok(Message::assistant(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpilot_common::backend::{StaticIndex, UnreachableBackend};
    use docpilot_common::checkpoint::MemoryCheckpointStore;
    use docpilot_common::config::{MemoryConfig, RetrievalConfig};
    use docpilot_common::embeddings::{Embedder, MockEmbedder};
    use docpilot_common::llm::{ScriptedLlm, ScriptedReply};
    use docpilot_common::types::{Document, EventKind, PageType};
    use docpilot_retrieval::HybridRetriever;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            title: format!("Doc {}", id),
            full_text: text.to_string(),
            headings: vec![],
            code_blocks: vec![],
            breadcrumbs: vec![],
            page_type: PageType::Guide,
            url: format!("https://docs.example.com/{}", id),
        }
    }

    fn assistant(replies: Vec<ScriptedReply>, corpus: &[(&str, &str)]) -> Arc<Assistant> {
        assistant_with_buffer(replies, corpus, 32)
    }

    fn assistant_with_buffer(
        replies: Vec<ScriptedReply>,
        corpus: &[(&str, &str)],
        event_buffer: usize,
    ) -> Arc<Assistant> {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new(replies));
        let embedder = Arc::new(MockEmbedder::new(64));
        let entries = corpus
            .iter()
            .map(|(id, text)| {
                let v = futures::executor::block_on(embedder.embed(text)).unwrap();
                (doc(id, text), v)
            })
            .collect();
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(StaticIndex::new(entries)),
            embedder,
            RetrievalConfig::default(),
            2_000,
        ));
        assistant_over(llm, retriever, event_buffer)
    }

    fn assistant_over(
        llm: Arc<dyn LlmClient>,
        retriever: Arc<HybridRetriever>,
        event_buffer: usize,
    ) -> Arc<Assistant> {
        let researcher = Arc::new(Researcher::new(retriever, 4, 15));
        let memory = Arc::new(MemoryManager::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::clone(&llm),
            MemoryConfig::default(),
        ));
        Arc::new(Assistant::new(llm, researcher, memory, event_buffer))
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_research_turn_streams_and_cites() {
        let a = assistant(
            vec![
                ScriptedReply::Json(serde_json::json!({
                    "type": "documentation",
                    "logic": "asks about saving"
                })),
                ScriptedReply::Json(serde_json::json!({ "steps": ["find the save API"] })),
                ScriptedReply::Json(serde_json::json!({ "queries": ["saving models disk"] })),
                ScriptedReply::Text(
                    "Call save() on the model [https://docs.example.com/a].".to_string(),
                ),
            ],
            &[("a", "saving models to disk with the save method")],
        );

        let events = drain(a.run_turn("t1", "how do I save a model?")).await;

        let terminals: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::End | EventKind::Error))
            .collect();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].kind, EventKind::End);
        assert!(matches!(events.last().unwrap().kind, EventKind::End));

        let nodes: Vec<&str> = events
            .iter()
            .filter(|e| e.kind == EventKind::Node)
            .filter_map(|e| e.node.as_deref())
            .collect();
        assert!(nodes.contains(&"analyze_and_route_query"));
        assert!(nodes.contains(&"create_research_plan"));
        assert!(nodes.contains(&"conduct_research"));
        assert!(nodes.contains(&"respond"));

        let answer: String = events
            .iter()
            .filter(|e| e.kind == EventKind::ResponseChunk)
            .filter_map(|e| e.payload.as_str())
            .collect();
        assert!(answer.contains("save()"));

        let metadata = &terminals[0].payload["metadata"];
        assert_eq!(metadata["sources"][0], "https://docs.example.com/a");
    }

    #[tokio::test]
    async fn test_clarification_turn_skips_research() {
        let a = assistant(
            vec![
                ScriptedReply::Json(serde_json::json!({
                    "type": "more-info",
                    "logic": "no error message provided"
                })),
                ScriptedReply::Text("What error message are you seeing?".to_string()),
            ],
            &[],
        );

        let events = drain(a.run_turn("t1", "it doesn't work")).await;

        let nodes: Vec<&str> = events
            .iter()
            .filter_map(|e| e.node.as_deref())
            .collect();
        assert!(nodes.contains(&"ask_for_more_info"));
        assert!(!nodes.contains(&"conduct_research"));
        assert!(matches!(events.last().unwrap().kind, EventKind::End));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_yields_single_error() {
        let a = assistant(
            vec![
                ScriptedReply::Json(serde_json::json!({
                    "type": "documentation",
                    "logic": "docs question"
                })),
                ScriptedReply::Json(serde_json::json!({ "steps": ["look it up"] })),
                ScriptedReply::Json(serde_json::json!({ "queries": ["tensors"] })),
                ScriptedReply::StreamThenFail {
                    prefix: "The answer is ".to_string(),
                    error: "connection reset".to_string(),
                },
            ],
            &[("a", "tensors explained")],
        );

        let events = drain(a.run_turn("t1", "what is a tensor?")).await;

        let terminals: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::End | EventKind::Error))
            .collect();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].kind, EventKind::Error);
    }

    #[tokio::test]
    async fn test_unreachable_index_yields_error_event() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new(vec![
            ScriptedReply::Json(serde_json::json!({
                "type": "documentation",
                "logic": "docs question"
            })),
            ScriptedReply::Json(serde_json::json!({ "steps": ["look it up"] })),
            ScriptedReply::Json(serde_json::json!({ "queries": ["tensors"] })),
        ]));
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(UnreachableBackend),
            Arc::new(MockEmbedder::new(64)),
            RetrievalConfig::default(),
            200,
        ));
        let a = assistant_over(llm, retriever, 32);

        let events = drain(a.run_turn("t1", "what is a tensor?")).await;

        let terminals: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::End | EventKind::Error))
            .collect();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].kind, EventKind::Error);
        assert!(matches!(events.last().unwrap().kind, EventKind::Error));
    }

    #[tokio::test]
    async fn test_small_event_buffer_still_completes() {
        let a = assistant_with_buffer(
            vec![
                ScriptedReply::Json(serde_json::json!({
                    "type": "documentation",
                    "logic": "asks about saving"
                })),
                ScriptedReply::Json(serde_json::json!({ "steps": ["find the save API"] })),
                ScriptedReply::Json(serde_json::json!({ "queries": ["saving models disk"] })),
                ScriptedReply::Text(
                    "Call save() on the model [https://docs.example.com/a].".to_string(),
                ),
            ],
            &[("a", "saving models to disk with the save method")],
            1,
        );

        let events = drain(a.run_turn("t1", "how do I save a model?")).await;
        assert!(matches!(events.last().unwrap().kind, EventKind::End));
    }

    #[tokio::test]
    async fn test_collect_returns_outcome() {
        let a = assistant(
            vec![
                ScriptedReply::Json(serde_json::json!({
                    "type": "general",
                    "logic": "greeting"
                })),
                ScriptedReply::Text("Hello! I can only answer product questions.".to_string()),
            ],
            &[],
        );

        let outcome = a.run_turn_collect("t1", "hi there").await.unwrap();
        assert_eq!(outcome.router_decision.label, RouteLabel::General);
        assert!(outcome.sources.is_empty());
        assert!(outcome.answer.content.contains("Hello"));
    }

    #[tokio::test]
    async fn test_state_persists_across_turns() {
        let a = assistant(
            vec![
                ScriptedReply::Json(serde_json::json!({ "type": "general", "logic": "hi" })),
                ScriptedReply::Text("Hello!".to_string()),
                ScriptedReply::Json(serde_json::json!({ "type": "general", "logic": "hi again" })),
                ScriptedReply::Text("Hello again!".to_string()),
            ],
            &[],
        );

        a.run_turn_collect("t1", "hi").await.unwrap();
        a.run_turn_collect("t1", "hi again").await.unwrap();

        let state = a.memory().load("t1").await.unwrap();
        // Two user messages and two assistant replies
        assert_eq!(state.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_turn() {
        let a = assistant(
            vec![
                ScriptedReply::Json(serde_json::json!({ "type": "general", "logic": "hi" })),
                ScriptedReply::Text("Hello!".to_string()),
            ],
            &[],
        );

        let rx = a.run_turn("t1", "hi");
        drop(rx);

        // The drive task notices the closed channel and bails without
        // panicking; give it a beat to run
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
