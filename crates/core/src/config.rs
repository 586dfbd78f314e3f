//! Engine configuration
//!
//! Loaded from an optional JSON file and overridden from the environment.
//! `ENGINES_PATH` and `ENGINE` together name the binary, the way engine
//! collections are usually laid out on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::SearchMode;
use crate::error::{Error, Result};

pub const DEFAULT_MULTIPV: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine binary (or a name resolved through PATH)
    pub path: String,
    /// Extra command-line arguments for the engine
    pub args: Vec<String>,
    /// Number of ranked variations per depth
    pub multipv: u32,
    /// Transposition table size in MB; the engine default when unset
    pub hash_mb: Option<u32>,
    /// Additional `setoption` pairs sent after MultiPV and Hash
    pub options: BTreeMap<String, String>,
    /// Fixed search depth; infinite analysis when unset
    pub depth: Option<u32>,
    /// How long to wait for the engine to honour `quit` before killing it
    pub quit_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: "stockfish".to_string(),
            args: Vec::new(),
            multipv: DEFAULT_MULTIPV,
            hash_mb: None,
            options: BTreeMap::new(),
            depth: None,
            quit_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `ENGINES_PATH`/`ENGINE`, `ENGINE_MULTIPV`, `ENGINE_HASH_MB`
    /// and `ENGINE_DEPTH` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an
    /// explicit variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(engine) = lookup("ENGINE").filter(|e| !e.trim().is_empty()) {
            self.path = match lookup("ENGINES_PATH").filter(|p| !p.trim().is_empty()) {
                Some(dir) => PathBuf::from(dir).join(engine.trim()).to_string_lossy().into_owned(),
                None => engine.trim().to_string(),
            };
        }
        if let Some(multipv) = lookup("ENGINE_MULTIPV") {
            self.multipv = parse_var("ENGINE_MULTIPV", &multipv)?;
        }
        if let Some(hash) = lookup("ENGINE_HASH_MB") {
            self.hash_mb = Some(parse_var("ENGINE_HASH_MB", &hash)?);
        }
        if let Some(depth) = lookup("ENGINE_DEPTH") {
            self.depth = Some(parse_var("ENGINE_DEPTH", &depth)?);
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(Error::Config("engine path is empty".into()));
        }
        if self.multipv == 0 {
            return Err(Error::Config("multipv must be at least 1".into()));
        }
        if self.depth == Some(0) {
            return Err(Error::Config("depth must be at least 1".into()));
        }
        Ok(())
    }

    pub fn search_mode(&self) -> SearchMode {
        match self.depth {
            Some(depth) => SearchMode::Depth(depth),
            None => SearchMode::Infinite,
        }
    }

    pub fn quit_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_timeout_ms)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value '{}'", name, value)))
}
