//! DocPilot agent
//!
//! The LLM-driven turn pipeline: query routing, research planning, answer
//! generation with citations, bounded conversation memory, and the phase
//! machine that streams a turn's progress to the transport layer.

pub mod generator;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod router;

pub use generator::Generator;
pub use memory::MemoryManager;
pub use orchestrator::Assistant;
pub use planner::Planner;
pub use router::Router;
