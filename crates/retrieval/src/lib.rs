//! DocPilot retrieval engine
//!
//! Query-time hybrid search over the documentation index: query typing,
//! lexical+vector retrieval with RRF fusion, and the parallel research
//! fan-out used by the agent.

pub mod fusion;
pub mod hybrid;
pub mod query_type;
pub mod researcher;

pub use fusion::{FusedHit, RrfFusion};
pub use hybrid::{HybridRetriever, RetrievedSet};
pub use query_type::{detect_query_type, QueryType};
pub use researcher::{ResearchContext, Researcher};
