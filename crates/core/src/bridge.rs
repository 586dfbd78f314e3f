//! Engine bridge: the facade the web layer talks to
//!
//! Board, aggregator and supervisor live behind a single lock. Caller
//! operations take it on their own thread; the engine's reader thread takes
//! it once per output line. Completed depths are published while the lock
//! is still held, so subscribers see batches and `clear_output` in the same
//! order the bridge produced them.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use shakmaty::{Chess, Position};
use tracing::{debug, info, trace, warn};

use crate::board::Board;
use crate::config::EngineConfig;
use crate::engine::protocol::{HASH_OPTION, MULTIPV_OPTION};
use crate::engine::{AnalysisLine, DepthAggregator, OutputSink, Supervisor, UciCommand};
use crate::error::{Error, Result};

/// Events pushed to subscribers. The serialized form uses the event names
/// front ends already listen for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum AnalysisEvent {
    /// Every ranked line of a completed depth, rank 1 first
    #[serde(rename = "engine_output")]
    Batch(Vec<AnalysisLine>),
    /// Rank 1 of the same depth
    #[serde(rename = "engine_output_single")]
    BestLine(AnalysisLine),
    /// The analysed position changed; drop previously shown lines
    #[serde(rename = "clear_output")]
    Cleared,
}

impl AnalysisEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisEvent::Batch(_) => "engine_output",
            AnalysisEvent::BestLine(_) => "engine_output_single",
            AnalysisEvent::Cleared => "clear_output",
        }
    }
}

/// Fire-and-forget event sink.
///
/// Called with the bridge lock held, so implementations must not block and
/// must not call back into the bridge.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, event: AnalysisEvent);
}

impl<F> Publisher for F
where
    F: Fn(AnalysisEvent) + Send + Sync + 'static,
{
    fn publish(&self, event: AnalysisEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    /// The accepted game, in SAN
    pub moves: Vec<String>,
    pub fen: String,
    /// Depth currently being collected, if any
    pub depth: Option<u32>,
}

/// Which position the engine's output currently describes.
///
/// After `stop` + `position` + `go`, the engine keeps printing lines for the
/// old search until it answers with `bestmove`. Those lines must be read
/// against the old position, so repositions queue up here until the engine
/// acknowledges them.
#[derive(Debug, Default)]
struct SearchView {
    analysed: Chess,
    pending: VecDeque<Chess>,
    searching: bool,
}

impl SearchView {
    fn restart(&mut self, position: Chess, searching: bool) {
        self.analysed = position;
        self.pending.clear();
        self.searching = searching;
    }

    /// A new search was issued for `position`. It takes effect at once
    /// unless an earlier search still has to be acknowledged.
    fn reposition(&mut self, position: Chess, running: bool) {
        if running && self.searching {
            self.pending.push_back(position);
        } else {
            self.analysed = position;
            self.searching = running;
        }
    }

    /// Handles `bestmove`. Returns true when the analysed position changed.
    fn on_bestmove(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(next) => {
                self.analysed = next;
                true
            }
            None => {
                self.searching = false;
                false
            }
        }
    }
}

struct BridgeState {
    board: Board,
    view: SearchView,
    aggregator: DepthAggregator,
    supervisor: Supervisor,
}

struct Shared<P> {
    state: Mutex<BridgeState>,
    publisher: P,
    multipv: u32,
}

/// Ranks that make a depth complete: the configured multiplicity, but never
/// more than the position has legal moves.
fn expected_ranks(multipv: u32, position: &Chess) -> u32 {
    let legal = u32::try_from(position.legal_moves().len()).unwrap_or(u32::MAX);
    multipv.min(legal).max(1)
}

impl<P: Publisher> Shared<P> {
    fn handle_line(&self, session: u64, line: &str) {
        let mut state = self.state.lock();
        if state.supervisor.session_id() != Some(session) || !state.supervisor.is_running() {
            return;
        }
        trace!(line, "<- engine");

        let BridgeState {
            view, aggregator, ..
        } = &mut *state;

        if line.starts_with("bestmove") {
            if view.on_bestmove() {
                aggregator.reset(expected_ranks(self.multipv, &view.analysed));
            }
            return;
        }

        if let Some(batch) = aggregator.push(line, &view.analysed) {
            self.publish_batch(batch);
        }
    }

    fn handle_close(&self, session: u64) {
        let detached = {
            let mut state = self.state.lock();
            if state.supervisor.session_id() != Some(session) {
                return;
            }
            let start = Chess::default();
            state.aggregator.reset(expected_ranks(self.multipv, &start));
            state.view.restart(start, false);
            state.supervisor.take()
        };
        warn!(session, "Engine exited, analysis stopped");
        drop(detached);
    }

    fn publish_batch(&self, batch: Vec<AnalysisLine>) {
        let Some(best) = batch.first().cloned() else {
            return;
        };
        debug!(lines = batch.len(), best = %best.summary(), "Depth complete");
        self.publisher.publish(AnalysisEvent::Batch(batch));
        self.publisher.publish(AnalysisEvent::BestLine(best));
    }
}

/// Routes reader-thread callbacks to the bridge that owns the session.
struct BridgeSink<P> {
    shared: Weak<Shared<P>>,
    session: u64,
}

impl<P: Publisher> OutputSink for BridgeSink<P> {
    fn on_line(&mut self, line: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_line(self.session, line);
        }
    }

    fn on_close(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_close(self.session);
        }
    }
}

/// Drives one UCI engine on behalf of the web layer.
///
/// At most one engine runs at a time; `start` while running is rejected
/// with [`Error::AlreadyRunning`].
pub struct EngineBridge<P: Publisher> {
    config: EngineConfig,
    shared: Arc<Shared<P>>,
}

impl<P: Publisher> EngineBridge<P> {
    pub fn new(config: EngineConfig, publisher: P) -> Self {
        let multipv = config.multipv.max(1);
        let state = BridgeState {
            board: Board::new(),
            view: SearchView::default(),
            aggregator: DepthAggregator::new(expected_ranks(multipv, &Chess::default())),
            supervisor: Supervisor::new(),
        };

        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                publisher,
                multipv,
            }),
        }
    }

    /// Spawns the engine and starts infinite (or depth-bounded) analysis of
    /// the starting position.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.supervisor.is_running() {
            return Err(Error::AlreadyRunning);
        }

        let shared = Arc::downgrade(&self.shared);
        let session = state
            .supervisor
            .start(&self.config.path, &self.config.args, |session| BridgeSink { shared, session })?;

        state.board.reset();
        let start = state.board.position().clone();
        state.aggregator.reset(expected_ranks(self.shared.multipv, &start));
        state.view.restart(start, true);

        for cmd in self.setup_commands() {
            state.supervisor.send(&cmd);
        }

        info!(session, path = %self.config.path, multipv = self.shared.multipv, "Analysis started");
        Ok(())
    }

    fn setup_commands(&self) -> Vec<UciCommand> {
        let mut commands = vec![
            UciCommand::Uci,
            UciCommand::IsReady,
            UciCommand::set_option(MULTIPV_OPTION, self.shared.multipv),
        ];
        if let Some(hash) = self.config.hash_mb {
            commands.push(UciCommand::set_option(HASH_OPTION, hash));
        }
        for (name, value) in &self.config.options {
            commands.push(UciCommand::set_option(name, value));
        }
        commands.push(UciCommand::UciNewGame);
        commands.push(UciCommand::Position { moves: Vec::new() });
        commands.push(UciCommand::Go(self.config.search_mode()));
        commands
    }

    /// Stops the engine and clears the board and any partial depth. A no-op
    /// when nothing is running.
    pub fn stop(&self) -> Result<()> {
        let session = {
            let mut state = self.shared.state.lock();
            let session = state.supervisor.take();
            state.board.reset();
            let start = state.board.position().clone();
            state.aggregator.reset(expected_ranks(self.shared.multipv, &start));
            state.view.restart(start, false);
            session
        };

        if let Some(session) = session {
            session.shutdown(self.config.quit_timeout())?;
            info!("Analysis stopped");
        }
        Ok(())
    }

    /// Replaces the game with `moves` (SAN from the starting position) and
    /// restarts analysis there. Returns the moves as submitted.
    ///
    /// An invalid move rejects the whole list: nothing is sent and the
    /// board keeps the previous game.
    pub fn apply_moves<S: AsRef<str>>(&self, moves: &[S]) -> Result<Vec<String>> {
        let mut state = self.shared.state.lock();

        if let Err(e) = state.board.apply_san(moves) {
            warn!(error = %e, "Rejected move list");
            return Err(e);
        }

        let running = state.supervisor.is_running();
        let position = state.board.position().clone();
        let uci_moves = state.board.uci_moves();

        let BridgeState {
            view, aggregator, ..
        } = &mut *state;
        view.reposition(position, running);
        aggregator.reset(expected_ranks(self.shared.multipv, &view.analysed));

        state.supervisor.send(&UciCommand::Stop);
        state.supervisor.send(&UciCommand::Position { moves: uci_moves });
        state.supervisor.send(&UciCommand::Go(self.config.search_mode()));

        self.shared.publisher.publish(AnalysisEvent::Cleared);
        info!(ply = state.board.ply(), running, "Position updated");

        Ok(moves.iter().map(|m| m.as_ref().to_string()).collect())
    }

    /// Forwards a raw command to the engine. Does not update the bridge's
    /// view of the search.
    pub fn send_command(&self, command: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.supervisor.is_running() {
            return Err(Error::NotRunning);
        }
        state.supervisor.send(&UciCommand::Raw(command.to_string()));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().supervisor.is_running()
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.shared.state.lock();
        EngineStatus {
            running: state.supervisor.is_running(),
            moves: state.board.san_moves(),
            fen: state.board.fen(),
            depth: state.aggregator.depth(),
        }
    }
}

impl<P: Publisher> Drop for EngineBridge<P> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to stop engine cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    fn bridge(
        path: &str,
        multipv: u32,
    ) -> (EngineBridge<impl Publisher>, mpsc::Receiver<AnalysisEvent>) {
        bridge_with(EngineConfig {
            path: path.to_string(),
            multipv,
            quit_timeout_ms: 500,
            ..EngineConfig::default()
        })
    }

    fn bridge_with(
        config: EngineConfig,
    ) -> (EngineBridge<impl Publisher>, mpsc::Receiver<AnalysisEvent>) {
        let (tx, rx) = mpsc::channel();
        let bridge = EngineBridge::new(config, move |event: AnalysisEvent| {
            let _ = tx.send(event);
        });
        (bridge, rx)
    }

    fn next_best(rx: &mpsc::Receiver<AnalysisEvent>) -> AnalysisLine {
        loop {
            match rx.recv_timeout(WAIT).unwrap() {
                AnalysisEvent::BestLine(line) => return line,
                _ => continue,
            }
        }
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(AnalysisEvent::Cleared).unwrap();
        assert_eq!(json["event"], "clear_output");

        let text = "info depth 3 multipv 1 pv e4".to_string();
        let line = AnalysisLine::new(3, 1, None, vec!["e4".into()], text);
        let json = serde_json::to_value(AnalysisEvent::BestLine(line)).unwrap();
        assert_eq!(json["event"], "engine_output_single");
        assert_eq!(json["data"]["text"], "info depth 3 multipv 1 pv e4");
        assert_eq!(AnalysisEvent::Batch(vec![]).name(), "engine_output");
    }

    #[test]
    fn test_expected_ranks_capped_by_legal_moves() {
        let mut board = Board::new();
        assert_eq!(expected_ranks(5, board.position()), 5);

        board.apply_san(&["e4", "f5", "Qh5+"]).unwrap();
        assert_eq!(board.legal_move_count(), 1);
        assert_eq!(expected_ranks(5, board.position()), 1);

        board.apply_san(&["f3", "e5", "g4", "Qh4#"]).unwrap();
        assert_eq!(expected_ranks(3, board.position()), 1);
    }

    #[test]
    fn test_stop_when_idle_is_ok() {
        let (bridge, rx) = bridge("stockfish", 1);
        bridge.stop().unwrap();
        bridge.stop().unwrap();
        assert!(!bridge.status().running);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_apply_moves_without_engine() {
        let (bridge, rx) = bridge("stockfish", 3);

        let echoed = bridge.apply_moves(&["e4", "c5"]).unwrap();
        assert_eq!(echoed, vec!["e4", "c5"]);
        assert_eq!(rx.try_recv().unwrap(), AnalysisEvent::Cleared);

        let err = bridge.apply_moves(&["d4", "d5", "Ke3"]).unwrap_err();
        assert!(matches!(err, Error::InvalidMove { index: 2, .. }));
        assert!(rx.try_recv().is_err());

        let status = bridge.status();
        assert_eq!(status.moves, vec!["e4", "c5"]);
        assert!(!status.running);
    }

    #[test]
    fn test_send_command_requires_engine() {
        let (bridge, _rx) = bridge("stockfish", 1);
        assert!(matches!(bridge.send_command("isready"), Err(Error::NotRunning)));
    }

    #[test]
    fn test_unavailable_engine() {
        let (bridge, _rx) = bridge("/nonexistent/engine-binary", 1);
        assert!(matches!(bridge.start(), Err(Error::EngineUnavailable(_))));
        assert!(!bridge.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_double_start_rejected() {
        let (bridge, _rx) = bridge("cat", 1);
        bridge.start().unwrap();
        assert!(matches!(bridge.start(), Err(Error::AlreadyRunning)));
        bridge.stop().unwrap();
        assert!(!bridge.is_running());
    }

    // `cat` echoes every command back, so injected lines come out of the
    // engine's stdout exactly like real analysis output.
    #[cfg(unix)]
    #[test]
    fn test_published_lines_use_san() {
        let (bridge, rx) = bridge("cat", 1);
        bridge.start().unwrap();
        bridge.apply_moves(&["e4", "e5"]).unwrap();

        // still the search of the starting position
        bridge
            .send_command("info depth 10 multipv 1 score cp 20 pv e2e4 e7e5 g1f3 b8c6")
            .unwrap();
        let best = next_best(&rx);
        assert!(best.text().contains("e4 e5 Nf3 Nc6"), "{}", best.text());
        assert!(!best.text().contains("g1f3"));

        // engine acknowledges the stop, output now refers to 1. e4 e5
        bridge.send_command("bestmove e2e4 ponder e7e5").unwrap();
        bridge
            .send_command("info depth 1 multipv 1 score cp 31 pv g1f3 b8c6 f1b5")
            .unwrap();
        let best = next_best(&rx);
        assert_eq!(best.moves(), &["Nf3".to_string(), "Nc6".to_string(), "Bb5".to_string()]);
        assert_eq!(best.depth(), 1);

        bridge.stop().unwrap();
        let status = bridge.status();
        assert!(!status.running);
        assert!(status.moves.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_batch_published_before_best_line() {
        let (bridge, rx) = bridge("cat", 2);
        bridge.start().unwrap();

        bridge.send_command("info depth 4 multipv 2 score cp 10 pv d2d4").unwrap();
        bridge.send_command("info depth 4 multipv 1 score cp 25 pv e2e4").unwrap();

        match rx.recv_timeout(WAIT).unwrap() {
            AnalysisEvent::Batch(lines) => {
                assert_eq!(lines.len(), 2);
                assert_eq!(lines[0].moves(), &["e4".to_string()]);
                assert_eq!(lines[1].moves(), &["d4".to_string()]);
            }
            other => panic!("expected a batch, got {:?}", other),
        }
        assert_eq!(next_best(&rx).rank(), 1);
        bridge.stop().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_engine_exit_reflected_in_status() {
        let (bridge, _rx) = bridge("true", 1);
        bridge.start().unwrap();

        let deadline = Instant::now() + WAIT;
        while bridge.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!bridge.status().running);
        assert!(matches!(bridge.send_command("isready"), Err(Error::NotRunning)));

        // no automatic restart, but a manual one is accepted
        bridge.start().unwrap();
        bridge.stop().unwrap();
    }

    #[cfg(unix)]
    fn stop_in_background<P: Publisher>(
        bridge: &Arc<EngineBridge<P>>,
    ) -> mpsc::Receiver<Result<()>> {
        let (tx, rx) = mpsc::channel();
        let bridge = Arc::clone(bridge);
        thread::spawn(move || {
            let _ = tx.send(bridge.stop());
        });
        rx
    }

    // `sleep` never reads stdin, so the pipe fills up after a few hundred
    // position commands.
    #[cfg(unix)]
    #[test]
    fn test_stop_not_blocked_by_engine_ignoring_input() {
        let (bridge, _rx) = bridge_with(EngineConfig {
            path: "sleep".to_string(),
            args: vec!["20".to_string()],
            multipv: 1,
            quit_timeout_ms: 200,
            ..EngineConfig::default()
        });
        let bridge = Arc::new(bridge);
        bridge.start().unwrap();

        let game: Vec<&str> = ["Nf3", "Nf6", "Ng1", "Ng8"]
            .iter()
            .copied()
            .cycle()
            .take(200)
            .collect();
        let feeder = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for _ in 0..200 {
                    bridge.apply_moves(&game).unwrap();
                }
            })
        };
        thread::sleep(Duration::from_millis(200));

        let stopped = stop_in_background(&bridge);
        assert!(matches!(stopped.recv_timeout(WAIT), Ok(Ok(()))));
        feeder.join().unwrap();
        assert!(!bridge.is_running());
    }

    // the shell is killed but its background child keeps stdout and stderr
    // open
    #[cfg(unix)]
    #[test]
    fn test_stop_returns_when_engine_child_keeps_pipes() {
        let (bridge, _rx) = bridge_with(EngineConfig {
            path: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 20 & wait".to_string()],
            multipv: 1,
            quit_timeout_ms: 200,
            ..EngineConfig::default()
        });
        let bridge = Arc::new(bridge);
        bridge.start().unwrap();

        let stopped = stop_in_background(&bridge);
        assert!(matches!(stopped.recv_timeout(WAIT), Ok(Ok(()))));
        assert!(!bridge.is_running());
    }
}
