//! Coordinate -> SAN translation of engine variations
//!
//! A pv is a hypothetical continuation, so it is always walked on a copy
//! of the position. Failures are reported as [`NotationError`] and, when
//! rewriting a whole engine line, logged and replaced by the raw text.

use shakmaty::Chess;
use tracing::debug;

use crate::board::Board;
use crate::engine::info::InfoLine;

pub use crate::board::NotationError;

/// Renders a sequence of coordinate moves as SAN, starting at `position`.
pub fn pv_to_san<S: AsRef<str>>(
    position: &Chess,
    uci_moves: &[S],
) -> Result<Vec<String>, NotationError> {
    let mut walked = position.clone();
    let mut san = Vec::with_capacity(uci_moves.len());

    for uci in uci_moves {
        let (rendered, next) = Board::san_of(walked, uci.as_ref())?;
        san.push(rendered);
        walked = next;
    }

    Ok(san)
}

/// An engine line after pv translation
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenLine {
    pub text: String,
    /// SAN moves, or the raw coordinate tokens when translation failed
    pub moves: Vec<String>,
}

/// Replaces the pv section of `line` with SAN and keeps every other byte of
/// the line as it was. Lines whose pv cannot be rendered come back verbatim.
pub fn rewrite_pv(line: &str, info: &InfoLine<'_>, position: &Chess) -> RewrittenLine {
    let raw = || RewrittenLine {
        text: line.to_string(),
        moves: info.pv.iter().map(|m| m.to_string()).collect(),
    };

    let Some(span) = info.pv_span.clone() else {
        return raw();
    };

    match pv_to_san(position, &info.pv) {
        Ok(moves) => {
            let mut text = String::with_capacity(line.len());
            text.push_str(&line[..span.start]);
            text.push_str(&moves.join(" "));
            text.push_str(&line[span.end..]);
            RewrittenLine { text, moves }
        }
        Err(e) => {
            debug!(error = %e, line, "Keeping untranslated pv");
            raw()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pv_to_san_from_start() {
        let san = pv_to_san(&Chess::default(), &["e2e4", "e7e5", "g1f3"]).unwrap();
        assert_eq!(san, vec!["e4", "e5", "Nf3"]);
    }

    #[test]
    fn test_pv_walk_does_not_touch_input_position() {
        let mut board = Board::new();
        board.apply_san(&["e4", "e5"]).unwrap();
        let before = board.fen();

        let san = pv_to_san(board.position(), &["g1f3", "b8c6", "f1b5"]).unwrap();
        assert_eq!(san, vec!["Nf3", "Nc6", "Bb5"]);
        assert_eq!(board.fen(), before);
    }

    #[test]
    fn test_pv_errors() {
        let start = Chess::default();
        assert!(matches!(
            pv_to_san(&start, &["e2e4", "zz"]),
            Err(NotationError::Malformed(_))
        ));
        assert!(matches!(
            pv_to_san(&start, &["e2e4", "e2e4"]),
            Err(NotationError::IllegalContinuation { .. })
        ));
    }

    #[test]
    fn test_rewrite_keeps_surrounding_text() {
        let line = "info depth 9 multipv 1 score cp 35 pv e2e4 e7e5 g1f3 bmc 0.12";
        let info = InfoLine::parse(line).unwrap();
        let rewritten = rewrite_pv(line, &info, &Chess::default());

        assert_eq!(
            rewritten.text,
            "info depth 9 multipv 1 score cp 35 pv e4 e5 Nf3 bmc 0.12"
        );
        assert_eq!(rewritten.moves, vec!["e4", "e5", "Nf3"]);
    }

    #[test]
    fn test_rewrite_falls_back_to_raw_line() {
        let mut board = Board::new();
        board.apply_san(&["d4"]).unwrap();

        // pv computed for the starting position, stale after d4
        let line = "info depth 4 multipv 1 score cp 10 pv e2e4 e7e5";
        let info = InfoLine::parse(line).unwrap();
        let rewritten = rewrite_pv(line, &info, board.position());

        assert_eq!(rewritten.text, line);
        assert_eq!(rewritten.moves, vec!["e2e4", "e7e5"]);
    }

    #[test]
    fn test_rewrite_without_pv() {
        let line = "info depth 1 multipv 1 score cp 0";
        let info = InfoLine::parse(line).unwrap();
        let rewritten = rewrite_pv(line, &info, &Chess::default());
        assert_eq!(rewritten.text, line);
        assert!(rewritten.moves.is_empty());
    }
}
