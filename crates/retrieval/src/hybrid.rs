//! Hybrid retrieval engine
//!
//! One call runs both legs of a search: a lexical query with type-dependent
//! field boosts and a vector query over the query embedding, fused with
//! weighted RRF. Either leg may fail without failing the call; only both
//! legs dead is an error.

use crate::fusion::RrfFusion;
use crate::query_type::{detect_query_type, QueryType};
use docpilot_common::backend::SearchBackend;
use docpilot_common::config::RetrievalConfig;
use docpilot_common::embeddings::Embedder;
use docpilot_common::errors::{AppError, Result};
use docpilot_common::metrics::record_retrieval;
use docpilot_common::types::ScoredDocument;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backoff before the single retry of a failed external call
const RETRY_BACKOFF: Duration = Duration::from_millis(150);

/// The outcome of one hybrid retrieval
#[derive(Debug, Clone)]
pub struct RetrievedSet {
    pub query_type: QueryType,
    pub documents: Vec<ScoredDocument>,
    /// True when one leg failed and the other carried the result alone
    pub degraded: bool,
}

/// Query-time hybrid search over the documentation index
pub struct HybridRetriever {
    backend: Arc<dyn SearchBackend>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    call_deadline: Duration,
}

impl HybridRetriever {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
        deadline_ms: u64,
    ) -> Self {
        Self {
            backend,
            embedder,
            config,
            call_deadline: Duration::from_millis(deadline_ms),
        }
    }

    /// Run one external call under the deadline, retrying once after a
    /// short backoff
    async fn attempt<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_deadline, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => warn!(operation, error = %e, "Call failed, retrying"),
            Err(_) => warn!(operation, "Call timed out, retrying"),
        }

        tokio::time::sleep(RETRY_BACKOFF).await;

        match tokio::time::timeout(self.call_deadline, call()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::TimeoutExceeded {
                operation,
                deadline_ms: self.call_deadline.as_millis() as u64,
            }),
        }
    }

    /// Retrieve the top documents for one query string
    pub async fn retrieve(&self, query: &str) -> Result<RetrievedSet> {
        let start = Instant::now();
        let query_type = detect_query_type(query);
        let boosts = query_type.boosts(&self.config);
        let overfetch = self.config.top_k * self.config.overfetch_factor;

        let lexical_leg = self.attempt("lexical_query", || {
            self.backend.lexical_query(query, boosts, overfetch)
        });
        let vector_leg = async {
            let embedding = self.attempt("embed", || self.embedder.embed(query)).await?;
            self.attempt("vector_query", || {
                self.backend.vector_query(&embedding, overfetch)
            })
            .await
        };

        let (lexical_result, vector_result) = tokio::join!(lexical_leg, vector_leg);

        let (lexical, vector, degraded) = match (lexical_result, vector_result) {
            (Ok(l), Ok(v)) => (l, v, false),
            (Ok(l), Err(e)) => {
                warn!(error = %e, "Vector leg failed, serving lexical-only");
                (l, Vec::new(), true)
            }
            (Err(e), Ok(v)) => {
                warn!(error = %e, "Lexical leg failed, serving vector-only");
                (Vec::new(), v, true)
            }
            (Err(le), Err(ve)) => {
                return Err(AppError::RetrievalUnavailable {
                    message: format!("both legs failed: {}; {}", le, ve),
                });
            }
        };

        let fusion = RrfFusion::new(
            self.config.rrf_k,
            self.config.lexical_weight,
            self.config.vector_weight,
        );
        let mut fused = fusion.fuse(&lexical, &vector);
        fused.truncate(self.config.top_k);

        // Hydrate in one fetch, then restore fusion order
        let ids: Vec<String> = fused.iter().map(|h| h.id.clone()).collect();
        let mut by_id: HashMap<String, _> = self
            .backend
            .fetch(&ids)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        let top_field = boosts
            .first()
            .map(|b| b.field.clone())
            .unwrap_or_else(|| "full_text".to_string());

        let documents: Vec<ScoredDocument> = fused
            .into_iter()
            .filter_map(|hit| {
                let document = by_id.remove(&hit.id)?;
                let matched_field = if hit.lexical_rank.is_some() {
                    Some(top_field.clone())
                } else {
                    Some("embedding".to_string())
                };
                Some(ScoredDocument {
                    document,
                    lexical_rank: hit.lexical_rank,
                    vector_rank: hit.vector_rank,
                    fused_score: hit.score,
                    matched_field,
                })
            })
            .collect();

        debug!(
            query_type = query_type.as_str(),
            returned = documents.len(),
            degraded,
            "Hybrid retrieval complete"
        );
        record_retrieval(
            start.elapsed().as_secs_f64(),
            query_type.as_str(),
            documents.len(),
            degraded,
        );

        Ok(RetrievedSet {
            query_type,
            documents,
            degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docpilot_common::backend::{StaticIndex, UnreachableBackend};
    use docpilot_common::embeddings::MockEmbedder;
    use docpilot_common::types::{CodeBlock, Document, PageType};

    fn doc(id: &str, text: &str, code: &str) -> Document {
        Document {
            id: id.to_string(),
            title: format!("Doc {}", id),
            full_text: text.to_string(),
            headings: vec![],
            code_blocks: if code.is_empty() {
                vec![]
            } else {
                vec![CodeBlock {
                    code: code.to_string(),
                    context: String::new(),
                }]
            },
            breadcrumbs: vec![],
            page_type: PageType::Guide,
            url: format!("https://docs.example.com/{}", id),
        }
    }

    fn index_with(embedder: &MockEmbedder, texts: &[(&str, &str)]) -> Arc<StaticIndex> {
        let entries = texts
            .iter()
            .map(|(id, text)| {
                let d = doc(id, text, "");
                let v = futures::executor::block_on(embedder.embed(text)).unwrap();
                (d, v)
            })
            .collect();
        Arc::new(StaticIndex::new(entries))
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingFailure {
                message: "provider down".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "broken"
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    fn retriever(
        backend: Arc<dyn SearchBackend>,
        embedder: Arc<dyn Embedder>,
    ) -> HybridRetriever {
        HybridRetriever::new(backend, embedder, RetrievalConfig::default(), 2_000)
    }

    #[tokio::test]
    async fn test_retrieval_returns_hydrated_documents() {
        let embedder = Arc::new(MockEmbedder::new(64));
        let index = index_with(
            &embedder,
            &[
                ("a", "convolutional layers stride padding"),
                ("b", "recurrent networks sequence models"),
            ],
        );

        let result = retriever(index, embedder)
            .retrieve("convolutional layers")
            .await
            .unwrap();

        assert!(!result.degraded);
        assert!(!result.documents.is_empty());
        assert_eq!(result.documents[0].document.id, "a");
        assert!(result.documents[0].fused_score > 0.0);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_lexical() {
        let probe = MockEmbedder::new(64);
        let index = index_with(&probe, &[("a", "dropout regularization explained")]);

        let result = retriever(index, Arc::new(BrokenEmbedder))
            .retrieve("dropout regularization")
            .await
            .unwrap();

        assert!(result.degraded);
        assert_eq!(result.documents.len(), 1);
        assert!(result.documents[0].lexical_rank.is_some());
        assert!(result.documents[0].vector_rank.is_none());
    }

    #[tokio::test]
    async fn test_both_legs_dead_is_unavailable() {
        let result = retriever(Arc::new(UnreachableBackend), Arc::new(MockEmbedder::new(8)))
            .retrieve("anything")
            .await;

        assert!(matches!(
            result,
            Err(AppError::RetrievalUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_matched_field_tracks_contributing_leg() {
        let embedder = Arc::new(MockEmbedder::new(64));
        let index = index_with(&embedder, &[("a", "tensors and shapes")]);

        let result = retriever(index, embedder)
            .retrieve("tensors and shapes")
            .await
            .unwrap();

        // Lexical leg matched, so the top boosted field is reported
        let matched = result.documents[0].matched_field.as_deref().unwrap();
        assert_ne!(matched, "embedding");
    }
}
