//! Analysis Bridge Core Library
//!
//! Drives a UCI engine in multipv analysis mode and turns its output into
//! one SAN-annotated batch of ranked lines per completed search depth.

pub mod board;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod notation;

pub use board::{san_to_uci, Board, NotationError};
pub use bridge::{AnalysisEvent, EngineBridge, EngineStatus, Publisher};
pub use config::EngineConfig;
pub use engine::{AnalysisLine, Evaluation, SearchMode};
pub use error::{Error, Result};
