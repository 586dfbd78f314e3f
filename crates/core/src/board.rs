//! Authoritative game position and SAN <-> UCI conversion

use shakmaty::{
    fen::Fen,
    san::SanPlus,
    uci::UciMove,
    CastlingMode, Chess, EnPassantMode, Move, Position,
};
use thiserror::Error;

use crate::error::{Error, Result};

/// Failure to render a single coordinate move against a position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotationError {
    /// The token is not a coordinate move at all
    #[error("malformed coordinate move '{0}'")]
    Malformed(String),
    /// The token parses, but cannot be played in the walked position
    #[error("illegal continuation '{uci}' in position {fen}")]
    IllegalContinuation { uci: String, fen: String },
}

/// The game as accepted from the caller: a position plus the moves that
/// led to it from the standard starting position.
#[derive(Debug, Clone, Default)]
pub struct Board {
    position: Chess,
    history: Vec<Move>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to the starting position with an empty move history.
    pub fn reset(&mut self) {
        self.position = Chess::default();
        self.history.clear();
    }

    /// Replaces the game with `moves` (SAN, played from the starting
    /// position).
    ///
    /// The moves are validated on a scratch position first, so on error the
    /// board keeps whatever it held before the call.
    pub fn apply_san<S: AsRef<str>>(&mut self, moves: &[S]) -> Result<()> {
        let mut scratch = Chess::default();
        let mut history = Vec::with_capacity(moves.len());

        for (index, text) in moves.iter().enumerate() {
            let text = text.as_ref().trim();
            let invalid = |reason: String| Error::InvalidMove {
                san: text.to_string(),
                index,
                reason,
            };

            let san = text
                .parse::<SanPlus>()
                .map_err(|e| invalid(e.to_string()))?;
            let mv = san.san.to_move(&scratch).map_err(|e| invalid(e.to_string()))?;

            history.push(mv.clone());
            scratch = scratch.play(mv).map_err(|e| invalid(e.to_string()))?;
        }

        self.position = scratch;
        self.history = history;
        Ok(())
    }

    /// Current position
    pub fn position(&self) -> &Chess {
        &self.position
    }

    /// The accepted moves in coordinate notation, as sent with
    /// `position startpos moves ...`.
    pub fn uci_moves(&self) -> Vec<String> {
        self.history
            .iter()
            .map(|mv| mv.to_uci(CastlingMode::Standard).to_string())
            .collect()
    }

    /// The accepted moves re-rendered as SAN from the starting position.
    pub fn san_moves(&self) -> Vec<String> {
        let mut position = Chess::default();
        self.history
            .iter()
            .map(|mv| {
                SanPlus::from_move_and_play_unchecked(&mut position, mv.clone()).to_string()
            })
            .collect()
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    pub fn legal_move_count(&self) -> usize {
        self.position.legal_moves().len()
    }

    pub fn ply(&self) -> usize {
        self.history.len()
    }

    /// Renders one coordinate move as SAN (with `+`/`#` suffix) and returns
    /// the position after it. Works on a snapshot, never on the board itself.
    pub fn san_of(
        mut position: Chess,
        uci: &str,
    ) -> std::result::Result<(String, Chess), NotationError> {
        let parsed = uci
            .parse::<UciMove>()
            .map_err(|_| NotationError::Malformed(uci.to_string()))?;

        let mv = parsed
            .to_move(&position)
            .map_err(|_| NotationError::IllegalContinuation {
                uci: uci.to_string(),
                fen: Fen::from_position(&position, EnPassantMode::Legal).to_string(),
            })?;

        let san = SanPlus::from_move_and_play_unchecked(&mut position, mv);
        Ok((san.to_string(), position))
    }
}

/// Converts a SAN game from the starting position to coordinate notation.
pub fn san_to_uci<S: AsRef<str>>(moves: &[S]) -> Result<Vec<String>> {
    let mut board = Board::new();
    board.apply_san(moves)?;
    Ok(board.uci_moves())
}
