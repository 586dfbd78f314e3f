//! Groups multipv `info` lines into one batch per search depth
//!
//! The engine reports up to N ranked variations for every depth it
//! finishes, interleaved with plenty of unrelated chatter. The aggregator
//! keeps the variations of the current depth only and hands back an ordered
//! batch the first time every expected rank has been seen.

use std::collections::BTreeMap;

use shakmaty::Chess;

use super::analysis::AnalysisLine;
use super::info::InfoLine;
use crate::notation::rewrite_pv;

/// Depth-keyed buffer of ranked variations
#[derive(Debug, Clone)]
pub struct DepthAggregator {
    expected: u32,
    depth: Option<u32>,
    lines: BTreeMap<u32, AnalysisLine>,
    completed: bool,
}

impl DepthAggregator {
    /// `expected` is the number of ranks that make a depth complete; values
    /// below 1 are treated as 1.
    pub fn new(expected: u32) -> Self {
        Self {
            expected: expected.max(1),
            depth: None,
            lines: BTreeMap::new(),
            completed: false,
        }
    }

    /// Forgets the depth in progress. Called whenever the analysed position
    /// changes.
    pub fn reset(&mut self, expected: u32) {
        self.expected = expected.max(1);
        self.depth = None;
        self.lines.clear();
        self.completed = false;
    }

    /// Depth currently being accumulated, `None` while idle
    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    /// Feeds one raw engine line. `position` is the position being analysed;
    /// it is only read, pv translation works on a copy.
    ///
    /// Returns the ordered batch (rank 1 first) exactly once per depth, on
    /// the line that completes it.
    pub fn push(&mut self, line: &str, position: &Chess) -> Option<Vec<AnalysisLine>> {
        let info = InfoLine::parse(line)?;
        if !info.is_multipv() {
            return None;
        }

        let depth = info.depth.filter(|d| *d > 0)?;
        let rank = info.multipv.filter(|r| *r > 0)?;

        if self.depth != Some(depth) {
            self.depth = Some(depth);
            self.lines.clear();
            self.completed = false;
        }

        let rewritten = rewrite_pv(line, &info, position);
        self.lines.insert(
            rank,
            AnalysisLine::new(depth, rank, info.score, rewritten.moves, rewritten.text),
        );

        if self.completed || !self.is_complete() {
            return None;
        }

        self.completed = true;
        Some(self.batch())
    }

    fn is_complete(&self) -> bool {
        (1..=self.expected).all(|rank| self.lines.contains_key(&rank))
    }

    /// Ranks `1..=expected` in order, skipping any the engine never sent.
    fn batch(&self) -> Vec<AnalysisLine> {
        self.lines.range(1..=self.expected).map(|(_, line)| line.clone()).collect()
    }
}

impl Default for DepthAggregator {
    fn default() -> Self {
        Self::new(1)
    }
}
