//! Weighted Reciprocal Rank Fusion
//!
//! Combines the lexical and vector ranked lists into one ordering. Only the
//! positions in each list matter; the raw backend scores are incomparable
//! across legs and are ignored here.

use docpilot_common::backend::RankedHit;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A document after fusion, before hydration
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub id: String,
    /// 1-based rank in the lexical list, if present there
    pub lexical_rank: Option<usize>,
    /// 1-based rank in the vector list, if present there
    pub vector_rank: Option<usize>,
    pub score: f64,
}

/// Weighted RRF scorer
///
/// Each appearance contributes `weight / (k + rank)` with 1-based ranks.
/// A document in both lists sums both contributions.
pub struct RrfFusion {
    k: f64,
    lexical_weight: f64,
    vector_weight: f64,
}

impl RrfFusion {
    pub fn new(k: f64, lexical_weight: f64, vector_weight: f64) -> Self {
        Self {
            k,
            lexical_weight,
            vector_weight,
        }
    }

    /// Fuse two ranked lists into a single ordering, best first.
    ///
    /// Ordering is fully deterministic: fused score descending, then
    /// documents with a lexical rank before those without (lower rank
    /// first), then document id ascending.
    pub fn fuse(&self, lexical: &[RankedHit], vector: &[RankedHit]) -> Vec<FusedHit> {
        let mut merged: HashMap<&str, FusedHit> = HashMap::new();

        for (i, hit) in lexical.iter().enumerate() {
            let rank = i + 1;
            let entry = merged.entry(&hit.id).or_insert_with(|| FusedHit {
                id: hit.id.clone(),
                lexical_rank: None,
                vector_rank: None,
                score: 0.0,
            });
            entry.lexical_rank = Some(rank);
            entry.score += self.lexical_weight / (self.k + rank as f64);
        }

        for (i, hit) in vector.iter().enumerate() {
            let rank = i + 1;
            let entry = merged.entry(&hit.id).or_insert_with(|| FusedHit {
                id: hit.id.clone(),
                lexical_rank: None,
                vector_rank: None,
                score: 0.0,
            });
            entry.vector_rank = Some(rank);
            entry.score += self.vector_weight / (self.k + rank as f64);
        }

        let mut fused: Vec<FusedHit> = merged.into_values().collect();
        fused.sort_by(compare_fused);
        fused
    }
}

fn compare_fused(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| match (a.lexical_rank, b.lexical_rank) {
            (Some(ra), Some(rb)) => ra.cmp(&rb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[&str]) -> Vec<RankedHit> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RankedHit {
                id: id.to_string(),
                score: 10.0 - i as f64,
            })
            .collect()
    }

    fn fusion() -> RrfFusion {
        RrfFusion::new(60.0, 0.4, 0.6)
    }

    #[test]
    fn test_document_in_both_lists_outranks_single_list() {
        // "b" is ranked second in both lists; "a" and "c" lead one list each
        let fused = fusion().fuse(&hits(&["a", "b"]), &hits(&["c", "b"]));

        assert_eq!(fused[0].id, "b");
        let b = &fused[0];
        let expected = 0.4 / 62.0 + 0.6 / 62.0;
        assert!((b.score - expected).abs() < 1e-12);
        assert_eq!(b.lexical_rank, Some(2));
        assert_eq!(b.vector_rank, Some(2));
    }

    #[test]
    fn test_single_list_contribution() {
        let fused = fusion().fuse(&hits(&["a"]), &[]);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.4 / 61.0).abs() < 1e-12);
        assert_eq!(fused[0].vector_rank, None);
    }

    #[test]
    fn test_tie_break_prefers_lexical_presence() {
        // Symmetric weights make "a" (lexical only) and "b" (vector only)
        // score identically; the lexical document must come first
        let fused = RrfFusion::new(60.0, 0.5, 0.5).fuse(&hits(&["a"]), &hits(&["b"]));
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[1].id, "b");
    }

    #[test]
    fn test_tie_break_by_id_when_ranks_match() {
        // Equal score, neither has a lexical rank: id decides
        let a = FusedHit {
            id: "x".to_string(),
            lexical_rank: None,
            vector_rank: Some(1),
            score: 0.5,
        };
        let b = FusedHit {
            id: "y".to_string(),
            lexical_rank: None,
            vector_rank: Some(1),
            score: 0.5,
        };
        assert_eq!(compare_fused(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let lexical = hits(&["a", "b", "c", "d"]);
        let vector = hits(&["d", "c", "b", "a"]);

        let first = fusion().fuse(&lexical, &vector);
        for _ in 0..10 {
            let again = fusion().fuse(&lexical, &vector);
            let ids: Vec<&str> = again.iter().map(|h| h.id.as_str()).collect();
            let expected: Vec<&str> = first.iter().map(|h| h.id.as_str()).collect();
            assert_eq!(ids, expected);
        }
    }
}
