//! Tokenizer for UCI `info` lines

use std::ops::Range;

use super::analysis::Evaluation;

/// Fields that may follow a pv on the same line. Anything else after
/// `pv` is taken to be part of the move list.
const INFO_KEYWORDS: &[&str] = &[
    "depth", "seldepth", "time", "nodes", "multipv", "score", "currmove",
    "currmovenumber", "hashfull", "nps", "tbhits", "sbhits", "cpuload",
    "string", "refutation", "currline", "wdl", "bmc",
];

/// The parts of an `info` line the aggregator cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoLine<'a> {
    pub depth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Evaluation>,
    /// Raw pv tokens, still in coordinate notation
    pub pv: Vec<&'a str>,
    /// Byte range of the pv tokens inside the original line
    pub pv_span: Option<Range<usize>>,
}

impl<'a> InfoLine<'a> {
    /// Parses an engine output line. Returns `None` unless it is an `info`
    /// line; the individual fields stay `None` when absent or unparsable.
    pub fn parse(line: &'a str) -> Option<Self> {
        let parts = tokens(line);
        if parts.first().map(|(_, t)| *t) != Some("info") {
            return None;
        }

        let mut info = InfoLine::default();
        let mut i = 1;

        while i < parts.len() {
            match parts[i].1 {
                "depth" => {
                    info.depth = parts.get(i + 1).and_then(|(_, t)| t.parse().ok());
                    i += 2;
                }
                "multipv" => {
                    info.multipv = parts.get(i + 1).and_then(|(_, t)| t.parse().ok());
                    i += 2;
                }
                "score" => {
                    let value = parts.get(i + 2).and_then(|(_, t)| t.parse::<i32>().ok());
                    info.score = match (parts.get(i + 1).map(|(_, t)| *t), value) {
                        (Some("cp"), Some(cp)) => Some(Evaluation::Centipawns(cp)),
                        (Some("mate"), Some(m)) => Some(Evaluation::Mate(m)),
                        _ => info.score,
                    };
                    i += 3;
                }
                "string" => break,
                "pv" => {
                    let start = i + 1;
                    let mut end = start;
                    while end < parts.len() && !is_keyword(parts[end].1) {
                        end += 1;
                    }
                    if end > start {
                        let (first, _) = parts[start];
                        let (last, token) = parts[end - 1];
                        info.pv = parts[start..end].iter().map(|(_, t)| *t).collect();
                        info.pv_span = Some(first..last + token.len());
                    }
                    i = end;
                }
                _ => {
                    i += 1;
                }
            }
        }

        Some(info)
    }

    /// True for lines reporting one ranked variation of a multipv search
    pub fn is_multipv(&self) -> bool {
        self.multipv.is_some()
    }
}

fn is_keyword(token: &str) -> bool {
    INFO_KEYWORDS.iter().any(|k| *k == token)
}

/// Splits on whitespace, keeping each token's byte offset.
fn tokens(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;

    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push((s, &line[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push((s, &line[s..]));
    }

    out
}
