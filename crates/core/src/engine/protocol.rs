//! UCI command vocabulary and the writer that serializes commands to the
//! engine's stdin

use std::fmt;
use std::io::{self, Write};

/// Option name for the number of reported variations
pub const MULTIPV_OPTION: &str = "MultiPV";
/// Option name for the transposition table size, in MB
pub const HASH_OPTION: &str = "Hash";

/// How long a `go` runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Search until `stop`
    #[default]
    Infinite,
    /// Search to a fixed depth
    Depth(u32),
}

/// Commands the bridge sends to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciCommand {
    Uci,
    IsReady,
    SetOption { name: String, value: String },
    UciNewGame,
    /// `position startpos` followed by the game in coordinate notation
    Position { moves: Vec<String> },
    Go(SearchMode),
    Stop,
    Quit,
    /// Passed through untouched
    Raw(String),
}

impl UciCommand {
    pub fn set_option(name: &str, value: impl fmt::Display) -> Self {
        UciCommand::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UciCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UciCommand::Uci => write!(f, "uci"),
            UciCommand::IsReady => write!(f, "isready"),
            UciCommand::SetOption { name, value } => {
                write!(f, "setoption name {} value {}", name, value)
            }
            UciCommand::UciNewGame => write!(f, "ucinewgame"),
            UciCommand::Position { moves } if moves.is_empty() => write!(f, "position startpos"),
            UciCommand::Position { moves } => {
                write!(f, "position startpos moves {}", moves.join(" "))
            }
            UciCommand::Go(SearchMode::Infinite) => write!(f, "go infinite"),
            UciCommand::Go(SearchMode::Depth(depth)) => write!(f, "go depth {}", depth),
            UciCommand::Stop => write!(f, "stop"),
            UciCommand::Quit => write!(f, "quit"),
            UciCommand::Raw(line) => write!(f, "{}", line.trim_end()),
        }
    }
}

/// Line-oriented command writer. Each command is written with its
/// terminator and flushed before `send` returns.
#[derive(Debug)]
pub struct ProtocolWriter<W: Write> {
    inner: W,
}

impl<W: Write> ProtocolWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn send(&mut self, cmd: &UciCommand) -> io::Result<()> {
        writeln!(self.inner, "{}", cmd)?;
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
