//! Answer generation
//!
//! Streams the final answer from the LLM over the merged research context
//! and extracts the inline `[URL]` citations afterwards. Only URLs that
//! actually appear in the context survive; a citation the model invented
//! is dropped before the client ever sees it.

use crate::prompts::response_prompt;
use docpilot_common::errors::{AppError, Result};
use docpilot_common::llm::{ChatMessage, LlmClient, TextStream};
use docpilot_common::types::{Message, ScoredDocument};
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Generator {
    llm: Arc<dyn LlmClient>,
    citation_re: Regex,
}

impl Generator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            // Inline citations look like [https://docs.example.com/page]
            citation_re: Regex::new(r"\[(https?://[^\]\s]+)\]").expect("citation regex"),
        }
    }

    /// Format the retrieved documents into the prompt context
    pub fn build_context(documents: &[ScoredDocument]) -> String {
        documents
            .iter()
            .map(|d| format!("[URL: {}\n{}]", d.document.url, d.document.full_text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Open the answer stream for a conversation plus research context
    pub async fn stream(
        &self,
        conversation: &[ChatMessage],
        documents: &[ScoredDocument],
    ) -> Result<TextStream> {
        let context = Self::build_context(documents);
        let mut messages = vec![ChatMessage::system(response_prompt(&context))];
        messages.extend_from_slice(conversation);

        self.llm
            .complete_stream(&messages)
            .await
            .map_err(|e| AppError::GenerationFailure {
                message: e.to_string(),
            })
    }

    /// Build the final assistant message from the accumulated stream text
    pub fn finalize(&self, text: &str, documents: &[ScoredDocument]) -> Message {
        let known: HashSet<&str> = documents.iter().map(|d| d.document.url.as_str()).collect();

        let mut seen = HashSet::new();
        let mut citations = Vec::new();
        let mut fabricated = 0usize;
        for capture in self.citation_re.captures_iter(text) {
            let url = capture.get(1).map(|m| m.as_str()).unwrap_or_default();
            if !known.contains(url) {
                fabricated += 1;
                continue;
            }
            if seen.insert(url.to_string()) {
                citations.push(url.to_string());
            }
        }

        if fabricated > 0 {
            warn!(fabricated, "Dropped citations not present in the research context");
        }
        debug!(citations = citations.len(), "Answer finalized");

        Message::assistant(text).with_citations(citations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpilot_common::llm::{ScriptedLlm, ScriptedReply};
    use docpilot_common::types::{Document, PageType};
    use futures::StreamExt;

    fn scored(id: &str, url: &str) -> ScoredDocument {
        ScoredDocument {
            document: Document {
                id: id.to_string(),
                title: id.to_string(),
                full_text: format!("content of {}", id),
                headings: vec![],
                code_blocks: vec![],
                breadcrumbs: vec![],
                page_type: PageType::Guide,
                url: url.to_string(),
            },
            lexical_rank: Some(1),
            vector_rank: None,
            fused_score: 0.1,
            matched_field: None,
        }
    }

    #[test]
    fn test_context_block_format() {
        let context = Generator::build_context(&[scored("a", "https://docs.example.com/a")]);
        assert_eq!(context, "[URL: https://docs.example.com/a\ncontent of a]");
    }

    #[test]
    fn test_fabricated_citations_are_dropped() {
        let generator = Generator::new(Arc::new(ScriptedLlm::failing()));
        let docs = vec![scored("a", "https://docs.example.com/a")];

        let message = generator.finalize(
            "See [https://docs.example.com/a] and also [https://evil.example.com/fake].",
            &docs,
        );

        assert_eq!(message.citations, vec!["https://docs.example.com/a"]);
    }

    #[test]
    fn test_citations_are_deduplicated_in_order() {
        let generator = Generator::new(Arc::new(ScriptedLlm::failing()));
        let docs = vec![
            scored("a", "https://d/a"),
            scored("b", "https://d/b"),
        ];

        let message = generator.finalize(
            "First [https://d/b], then [https://d/a], again [https://d/b].",
            &docs,
        );

        assert_eq!(message.citations, vec!["https://d/b", "https://d/a"]);
    }

    #[tokio::test]
    async fn test_stream_yields_full_answer() {
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedReply::Text(
            "Use model.save to persist weights.".to_string(),
        )]));
        let generator = Generator::new(llm);

        let mut stream = generator
            .stream(&[ChatMessage::user("how do I save?")], &[])
            .await
            .unwrap();

        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            full.push_str(&chunk.unwrap());
        }
        assert_eq!(full, "Use model.save to persist weights.");
    }
}
