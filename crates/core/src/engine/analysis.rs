//! Types for representing engine analysis results

use std::fmt;

use serde::Serialize;

/// Score reported by the engine, from the side to move's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Evaluation {
    /// Centipawn score (positive = side to move is better)
    Centipawns(i32),
    /// Forced mate in N moves (negative = side to move gets mated)
    Mate(i32),
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluation::Centipawns(cp) => {
                let score = *cp as f32 / 100.0;
                if score >= 0.0 {
                    write!(f, "+{:.2}", score)
                } else {
                    write!(f, "{:.2}", score)
                }
            }
            Evaluation::Mate(moves) => write!(f, "M{}", moves),
        }
    }
}

/// One ranked variation of a completed depth.
///
/// `text` is the engine's own `info` line with the pv rewritten to SAN.
/// When the pv could not be rendered the line is kept exactly as received
/// and `moves` holds the raw coordinate tokens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisLine {
    depth: u32,
    rank: u32,
    score: Option<Evaluation>,
    moves: Vec<String>,
    text: String,
}

impl AnalysisLine {
    pub fn new(
        depth: u32,
        rank: u32,
        score: Option<Evaluation>,
        moves: Vec<String>,
        text: String,
    ) -> Self {
        Self {
            depth,
            rank,
            score,
            moves,
            text,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// 1-based multipv rank
    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn score(&self) -> Option<Evaluation> {
        self.score
    }

    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns a brief summary of the line
    pub fn summary(&self) -> String {
        let score = self
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!(
            "Depth: {} | #{} | Eval: {} | PV: {}",
            self.depth,
            self.rank,
            score,
            self.moves.iter().take(5).cloned().collect::<Vec<_>>().join(" ")
        )
    }
}
