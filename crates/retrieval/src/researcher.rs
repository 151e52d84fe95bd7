//! Research fan-out
//!
//! Executes every sub-query of a research plan against the hybrid retriever
//! with bounded concurrency, waits for all of them, and merges the results
//! into one deduplicated context set. A failed sub-query costs coverage,
//! not the turn; only every sub-query failing is an error.

use crate::hybrid::HybridRetriever;
use docpilot_common::errors::{AppError, Result};
use docpilot_common::types::{ResearchPlan, ScoredDocument};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Merged output of one research phase
#[derive(Debug, Clone)]
pub struct ResearchContext {
    /// Deduplicated documents, best first
    pub documents: Vec<ScoredDocument>,
    /// Sub-queries that completed
    pub completed: usize,
    /// Sub-queries that failed and were absorbed
    pub failed: usize,
}

/// Parallel researcher over a shared retriever
pub struct Researcher {
    retriever: Arc<HybridRetriever>,
    max_concurrency: usize,
    max_context_documents: usize,
}

impl Researcher {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        max_concurrency: usize,
        max_context_documents: usize,
    ) -> Self {
        Self {
            retriever,
            max_concurrency: max_concurrency.max(1),
            max_context_documents,
        }
    }

    /// Run every sub-query of the plan and merge the results.
    ///
    /// All sub-queries are awaited before merging, so the output never
    /// depends on completion order.
    pub async fn conduct(&self, plan: &ResearchPlan) -> Result<ResearchContext> {
        let sub_queries = plan.sub_queries();
        let attempted = sub_queries.len();

        let sub_queries: Vec<String> = sub_queries.iter().map(|q| q.to_string()).collect();
        let results: Vec<Result<Vec<ScoredDocument>>> = stream::iter(sub_queries)
            .map(|query| {
                let retriever = Arc::clone(&self.retriever);
                async move {
                    match retriever.retrieve(&query).await {
                        Ok(set) => Ok(set.documents),
                        Err(e) => {
                            warn!(query = %query, error = %e, "Sub-query failed");
                            Err(e)
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if attempted > 0 && failed == attempted {
            return Err(AppError::ResearchExhausted { attempted });
        }

        // Merge on document id, keeping the best score seen for each
        let mut merged: HashMap<String, ScoredDocument> = HashMap::new();
        for documents in results.into_iter().flatten() {
            for scored in documents {
                match merged.get_mut(&scored.document.id) {
                    Some(existing) if existing.fused_score >= scored.fused_score => {}
                    Some(existing) => *existing = scored,
                    None => {
                        merged.insert(scored.document.id.clone(), scored);
                    }
                }
            }
        }

        let mut documents: Vec<ScoredDocument> = merged.into_values().collect();
        documents.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        documents.truncate(self.max_context_documents);

        info!(
            attempted,
            failed,
            context_size = documents.len(),
            "Research phase complete"
        );

        Ok(ResearchContext {
            documents,
            completed: attempted - failed,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpilot_common::backend::{StaticIndex, UnreachableBackend};
    use docpilot_common::config::RetrievalConfig;
    use docpilot_common::embeddings::{Embedder, MockEmbedder};
    use docpilot_common::types::{Document, PageType, ResearchStep};

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

    fn plan(queries: &[&str]) -> ResearchPlan {
        ResearchPlan {
            steps: vec![ResearchStep {
                id: 0,
                objective: "investigate".to_string(),
                sub_queries: queries.iter().map(|q| q.to_string()).collect(),
            }],
        }
    }

    fn researcher(texts: &[(&str, &str)]) -> Researcher {
        let embedder = Arc::new(MockEmbedder::new(64));
        let entries = texts
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
        Researcher::new(retriever, 4, 15)
    }

    #[tokio::test]
    async fn test_merge_deduplicates_across_sub_queries() {
        let r = researcher(&[
            ("a", "saving models to disk checkpoint format"),
            ("b", "loading saved models from disk"),
        ]);

        // Both sub-queries hit both documents
        let context = r
            .conduct(&plan(&["saving models disk", "loading models disk"]))
            .await
            .unwrap();

        assert_eq!(context.completed, 2);
        assert_eq!(context.failed, 0);
        let ids: Vec<&str> = context
            .documents
            .iter()
            .map(|d| d.document.id.as_str())
            .collect();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids, deduped);
        assert_eq!(context.documents.len(), 2);
    }

    #[tokio::test]
    async fn test_result_is_independent_of_completion_order() {
        let r = researcher(&[
            ("a", "gradient descent optimizers momentum"),
            ("b", "learning rate schedules decay"),
            ("c", "batch normalization layers"),
        ]);
        let p = plan(&[
            "gradient descent momentum",
            "learning rate decay",
            "batch normalization",
        ]);

        let first = r.conduct(&p).await.unwrap();
        for _ in 0..5 {
            let again = r.conduct(&p).await.unwrap();
            let ids: Vec<&str> = again.documents.iter().map(|d| d.document.id.as_str()).collect();
            let expected: Vec<&str> =
                first.documents.iter().map(|d| d.document.id.as_str()).collect();
            assert_eq!(ids, expected);
        }
    }

    #[tokio::test]
    async fn test_all_sub_queries_failing_is_exhausted() {
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(UnreachableBackend),
            Arc::new(MockEmbedder::new(8)),
            RetrievalConfig::default(),
            500,
        ));
        let r = Researcher::new(retriever, 2, 15);

        let result = r.conduct(&plan(&["q1", "q2"])).await;
        assert!(matches!(
            result,
            Err(AppError::ResearchExhausted { attempted: 2 })
        ));
    }

    #[tokio::test]
    async fn test_empty_plan_yields_empty_context() {
        let r = researcher(&[("a", "anything")]);
        let context = r
            .conduct(&ResearchPlan { steps: vec![] })
            .await
            .unwrap();
        assert!(context.documents.is_empty());
        assert_eq!(context.completed, 0);
    }
}
