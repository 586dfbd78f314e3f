//! UCI engine integration
//!
//! Process supervision, the command vocabulary, and parsing of the engine's
//! `info` output into per-depth batches.

pub mod aggregator;
pub mod analysis;
pub mod info;
pub mod protocol;
pub mod supervisor;

// Re-export main types for convenience
pub use aggregator::DepthAggregator;
pub use analysis::{AnalysisLine, Evaluation};
pub use protocol::{ProtocolWriter, SearchMode, UciCommand};
pub use supervisor::{EngineSession, OutputSink, Supervisor};
