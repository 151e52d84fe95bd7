//! Query-type detection
//!
//! A fast heuristic classification that runs before any retrieval call and
//! selects the field-boost preset for the lexical leg. Deliberately cheap:
//! no LLM involvement, just token shape and keyword checks.

use docpilot_common::config::{FieldBoost, RetrievalConfig};

/// Detected query category, each mapping to one boost preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// Wants code: an identifier, a snippet, "how to" phrasing
    Code,
    /// Wants reference material: parameters, signatures, return values
    Api,
    /// Everything else; the balanced default weighting
    Conceptual,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Code => "code",
            QueryType::Api => "api",
            QueryType::Conceptual => "conceptual",
        }
    }

    /// Boost preset for this query type
    pub fn boosts<'a>(&self, config: &'a RetrievalConfig) -> &'a [FieldBoost] {
        match self {
            QueryType::Code => &config.code_boosts,
            QueryType::Api => &config.api_boosts,
            QueryType::Conceptual => &config.conceptual_boosts,
        }
    }
}

const CODE_KEYWORDS: &[&str] = &["code", "example", "how to", "implement", "syntax", "usage"];

const API_KEYWORDS: &[&str] = &[
    "parameters",
    "arguments",
    "returns",
    "attributes",
    "methods",
    "class",
    "function",
];

/// Patterns that signal a reference question even when an identifier is present
const API_PATTERNS: &[&str] = &["parameters of", "arguments to", "signature of", "return type"];

/// Classify a query string
pub fn detect_query_type(query: &str) -> QueryType {
    let lower = query.to_lowercase();

    // "parameters of tf.keras.layers.Dense" is a reference question, not a
    // code request, so the phrase patterns win over the identifier check
    if API_PATTERNS.iter().any(|p| lower.contains(p)) {
        return QueryType::Api;
    }

    if has_identifier_token(query) || lower.contains('`') {
        return QueryType::Code;
    }

    if CODE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return QueryType::Code;
    }

    if API_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return QueryType::Api;
    }

    QueryType::Conceptual
}

/// Dotted identifier such as `tf.keras.layers.Dense` or `np.argmax`:
/// word characters joined by dots, no spaces, at least one dot with word
/// characters on both sides.
fn has_identifier_token(query: &str) -> bool {
    query.split_whitespace().any(|token| {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '_');
        let mut saw_dot = false;
        let mut prev_word = false;
        for c in token.chars() {
            if c == '.' {
                if !prev_word {
                    return false;
                }
                saw_dot = true;
                prev_word = false;
            } else if c.is_alphanumeric() || c == '_' {
                prev_word = true;
            } else {
                return false;
            }
        }
        saw_dot && prev_word
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_queries_are_code() {
        assert_eq!(detect_query_type("what does tf.keras.layers.Dense do"), QueryType::Code);
        assert_eq!(detect_query_type("use `model.fit` with callbacks"), QueryType::Code);
    }

    #[test]
    fn test_parameter_patterns_win_over_identifiers() {
        assert_eq!(
            detect_query_type("parameters of tf.keras.layers.Conv2D"),
            QueryType::Api
        );
        assert_eq!(detect_query_type("arguments to model.compile"), QueryType::Api);
    }

    #[test]
    fn test_keyword_classification() {
        assert_eq!(detect_query_type("how to implement a custom layer"), QueryType::Code);
        assert_eq!(detect_query_type("what methods does a Model have"), QueryType::Api);
    }

    #[test]
    fn test_conceptual_default() {
        assert_eq!(
            detect_query_type("why is my training loss not decreasing"),
            QueryType::Conceptual
        );
        assert_eq!(detect_query_type(""), QueryType::Conceptual);
    }

    #[test]
    fn test_plain_sentences_have_no_identifier() {
        assert!(!has_identifier_token("end of sentence. Next one"));
        assert!(has_identifier_token("tf.nn.softmax"));
        assert!(!has_identifier_token("version 2."));
    }
}
