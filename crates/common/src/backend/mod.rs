//! Search backend abstraction
//!
//! The search index is an external service populated by a separate ingestion
//! pipeline; the query-time layer consumes it through three primitives:
//! - lexical (BM25-style) queries over boosted text fields
//! - nearest-neighbor vector queries over the document embedding
//! - fetch by id
//!
//! Provides an OpenSearch-compatible HTTP implementation and an in-memory
//! index for tests and local development.

use crate::config::{FieldBoost, SearchBackendConfig};
use crate::errors::{AppError, Result};
use crate::types::Document;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// One entry of a ranked result list: ordering carries the signal, the raw
/// score is only kept for diagnostics.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub id: String,
    pub score: f64,
}

/// Service boundary to the search index
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// BM25-style query over the given boosted fields, best first
    async fn lexical_query(
        &self,
        text: &str,
        boosted_fields: &[FieldBoost],
        top_n: usize,
    ) -> Result<Vec<RankedHit>>;

    /// Nearest-neighbor query over the document embedding, best first
    async fn vector_query(&self, embedding: &[f32], top_n: usize) -> Result<Vec<RankedHit>>;

    /// Fetch documents by id; unknown ids are skipped, not errors
    async fn fetch(&self, ids: &[String]) -> Result<Vec<Document>>;
}

/// OpenSearch-compatible HTTP backend
pub struct HttpSearchBackend {
    client: reqwest::Client,
    base_url: String,
    index_name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: Option<Document>,
}

#[derive(Deserialize)]
struct MgetResponse {
    docs: Vec<MgetDoc>,
}

#[derive(Deserialize)]
struct MgetDoc {
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Document>,
}

impl HttpSearchBackend {
    pub fn new(config: &SearchBackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.deadline_ms))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
        })
    }

    async fn search(&self, body: serde_json::Value) -> Result<Vec<SearchHit>> {
        let url = format!("{}/{}/_search", self.base_url, self.index_name);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::RetrievalUnavailable {
                message: format!("Search request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::RetrievalUnavailable {
                message: format!("Search API error {}: {}", status, body),
            });
        }

        let parsed: SearchResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::RetrievalUnavailable {
                    message: format!("Failed to parse search response: {}", e),
                })?;

        Ok(parsed.hits.hits)
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn lexical_query(
        &self,
        text: &str,
        boosted_fields: &[FieldBoost],
        top_n: usize,
    ) -> Result<Vec<RankedHit>> {
        let fields: Vec<String> = boosted_fields
            .iter()
            .map(|b| format!("{}^{}", b.field, b.boost))
            .collect();

        let body = json!({
            "size": top_n,
            "query": {
                "multi_match": {
                    "query": text,
                    "fields": fields,
                    "type": "best_fields",
                    "operator": "or",
                    "fuzziness": "AUTO"
                }
            },
            "_source": false
        });

        let hits = self.search(body).await?;
        Ok(hits
            .into_iter()
            .map(|h| RankedHit {
                id: h.id,
                score: h.score.unwrap_or(0.0),
            })
            .collect())
    }

    async fn vector_query(&self, embedding: &[f32], top_n: usize) -> Result<Vec<RankedHit>> {
        let body = json!({
            "size": top_n,
            "query": {
                "knn": {
                    "embedding": {
                        "vector": embedding,
                        "k": top_n
                    }
                }
            },
            "_source": false
        });

        let hits = self.search(body).await?;
        Ok(hits
            .into_iter()
            .map(|h| RankedHit {
                id: h.id,
                score: h.score.unwrap_or(0.0),
            })
            .collect())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/{}/_mget", self.base_url, self.index_name);
        let body = json!({
            "ids": ids,
            // Embeddings never leave the index
            "_source": { "excludes": ["embedding"] }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::RetrievalUnavailable {
                message: format!("Fetch request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::RetrievalUnavailable {
                message: format!("Fetch API error {}", status),
            });
        }

        let parsed: MgetResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::RetrievalUnavailable {
                    message: format!("Failed to parse fetch response: {}", e),
                })?;

        Ok(parsed
            .docs
            .into_iter()
            .filter(|d| d.found)
            .filter_map(|d| d.source)
            .collect())
    }
}

/// In-memory index for tests and local runs
///
/// Lexical scoring is a boosted term-overlap count; vector scoring is cosine
/// similarity over stored embeddings. Both are deterministic.
pub struct StaticIndex {
    entries: Vec<(Document, Vec<f32>)>,
}

impl StaticIndex {
    pub fn new(entries: Vec<(Document, Vec<f32>)>) -> Self {
        Self { entries }
    }

    fn field_text(doc: &Document, field: &str) -> String {
        match field {
            "title" => doc.title.clone(),
            "full_text" => doc.full_text.clone(),
            "headings" => doc.headings.join(" "),
            "code_blocks.code" => doc
                .code_blocks
                .iter()
                .map(|b| b.code.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        }
    }

    fn lexical_score(doc: &Document, terms: &[String], boosted_fields: &[FieldBoost]) -> f64 {
        let mut score = 0.0;
        for fb in boosted_fields {
            let text = Self::field_text(doc, &fb.field).to_lowercase();
            for term in terms {
                if text.contains(term.as_str()) {
                    score += fb.boost as f64;
                }
            }
        }
        score
    }

    fn cosine(a: &[f32], b: &[f32]) -> f64 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        (dot / (na * nb)) as f64
    }

    fn ranked(mut scored: Vec<RankedHit>, top_n: usize) -> Vec<RankedHit> {
        // Ties resolved by id so results are stable across runs
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_n);
        scored
    }
}

#[async_trait]
impl SearchBackend for StaticIndex {
    async fn lexical_query(
        &self,
        text: &str,
        boosted_fields: &[FieldBoost],
        top_n: usize,
    ) -> Result<Vec<RankedHit>> {
        let terms: Vec<String> = text.split_whitespace().map(|t| t.to_lowercase()).collect();
        let scored: Vec<RankedHit> = self
            .entries
            .iter()
            .map(|(doc, _)| RankedHit {
                id: doc.id.clone(),
                score: Self::lexical_score(doc, &terms, boosted_fields),
            })
            .filter(|h| h.score > 0.0)
            .collect();
        Ok(Self::ranked(scored, top_n))
    }

    async fn vector_query(&self, embedding: &[f32], top_n: usize) -> Result<Vec<RankedHit>> {
        let scored: Vec<RankedHit> = self
            .entries
            .iter()
            .map(|(doc, vec)| RankedHit {
                id: doc.id.clone(),
                score: Self::cosine(embedding, vec),
            })
            .filter(|h| h.score > 0.0)
            .collect();
        Ok(Self::ranked(scored, top_n))
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<Document>> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.entries
                    .iter()
                    .find(|(doc, _)| &doc.id == id)
                    .map(|(doc, _)| doc.clone())
            })
            .collect())
    }
}

/// A backend that always fails, for exercising degraded paths in tests
pub struct UnreachableBackend;

#[async_trait]
impl SearchBackend for UnreachableBackend {
    async fn lexical_query(
        &self,
        _text: &str,
        _boosted_fields: &[FieldBoost],
        _top_n: usize,
    ) -> Result<Vec<RankedHit>> {
        Err(AppError::RetrievalUnavailable {
            message: "index unreachable".to_string(),
        })
    }

    async fn vector_query(&self, _embedding: &[f32], _top_n: usize) -> Result<Vec<RankedHit>> {
        Err(AppError::RetrievalUnavailable {
            message: "index unreachable".to_string(),
        })
    }

    async fn fetch(&self, _ids: &[String]) -> Result<Vec<Document>> {
        Err(AppError::RetrievalUnavailable {
            message: "index unreachable".to_string(),
        })
    }
}

/// Create a search backend based on configuration
pub fn create_backend(config: &SearchBackendConfig) -> Result<Arc<dyn SearchBackend>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpSearchBackend::new(config)?)),
        "memory" => Ok(Arc::new(StaticIndex::new(Vec::new()))),
        other => Err(AppError::Configuration {
            message: format!("Unknown search backend provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CodeBlock, PageType};

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

    #[tokio::test]
    async fn test_static_index_lexical_ranking() {
        let index = StaticIndex::new(vec![
            (doc("a", "convolution layers explained", ""), vec![1.0, 0.0]),
            (doc("b", "pooling layers", ""), vec![0.0, 1.0]),
        ]);

        let boosts = vec![FieldBoost::new("full_text", 2.0)];
        let hits = index
            .lexical_query("convolution layers", &boosts, 10)
            .await
            .unwrap();

        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_static_index_vector_ranking() {
        let index = StaticIndex::new(vec![
            (doc("a", "x", ""), vec![1.0, 0.0]),
            (doc("b", "y", ""), vec![0.0, 1.0]),
        ]);

        let hits = index.vector_query(&[0.9, 0.1], 10).await.unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_fetch_skips_unknown_ids() {
        let index = StaticIndex::new(vec![(doc("a", "x", ""), vec![1.0])]);
        let docs = index
            .fetch(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a");
    }
}
