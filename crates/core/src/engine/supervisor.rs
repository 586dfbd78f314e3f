//! UCI engine process supervision
//!
//! Spawns the engine as a subprocess with all three standard streams piped.
//! A dedicated reader thread owns stdout and hands every line to an
//! [`OutputSink`]; stderr is drained by a second thread so the engine never
//! blocks on a full pipe. Commands are queued to a writer thread that owns
//! stdin, so a caller never blocks on an engine that stopped reading.

use std::convert::Infallible;
use std::io::{self, BufRead, BufReader, ErrorKind};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::protocol::{ProtocolWriter, UciCommand};
use crate::error::{Error, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Consumer of engine output, driven from the reader thread.
pub trait OutputSink: Send + 'static {
    /// One trimmed, non-empty line of stdout
    fn on_line(&mut self, line: &str);

    /// stdout closed while the session was still running, i.e. the engine
    /// went away on its own
    fn on_close(&mut self);
}

/// One running engine process and its I/O threads
pub struct EngineSession {
    id: u64,
    process: Child,
    commands: Option<mpsc::Sender<UciCommand>>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    /// Disconnects once every I/O thread has returned
    finished: mpsc::Receiver<Infallible>,
}

impl EngineSession {
    /// Spawns `path` and starts the writer, reader and stderr threads.
    ///
    /// # Example
    /// ```ignore
    /// let session = EngineSession::spawn("stockfish", &[], 1, sink)?;
    /// ```
    pub fn spawn<S: OutputSink>(path: &str, args: &[String], id: u64, sink: S) -> Result<Self> {
        let mut process = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::EngineUnavailable(format!("{}: {}", path, e)))?;

        let (stdin, stdout, stderr) = match (
            process.stdin.take(),
            process.stdout.take(),
            process.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                reap(&mut process);
                return Err(Error::EngineUnavailable("Failed to open engine pipes".into()));
            }
        };

        let (done, finished) = mpsc::channel();
        let (commands, queue) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::with_capacity(3);

        match spawn_io("engine-writer", &done, move || write_loop(stdin, queue)) {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                reap(&mut process);
                return Err(Error::EngineUnavailable(format!("Failed to start writer: {}", e)));
            }
        }

        let flag = Arc::clone(&running);
        match spawn_io("engine-reader", &done, move || read_loop(stdout, flag, sink)) {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                reap(&mut process);
                return Err(Error::EngineUnavailable(format!("Failed to start reader: {}", e)));
            }
        }

        match spawn_io("engine-stderr", &done, move || drain_stderr(stderr)) {
            Ok(handle) => threads.push(handle),
            Err(e) => warn!(error = %e, "Could not start stderr drain"),
        }

        info!(id, path, pid = process.id(), "Engine started");

        Ok(Self {
            id,
            process,
            commands: Some(commands),
            running,
            threads,
            finished,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once stopped or once the engine closed its output
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queues one command for the writer thread. Fails only once the writer
    /// has given up on a closed stdin.
    pub fn send(&mut self, cmd: &UciCommand) -> io::Result<()> {
        match self.commands.as_ref() {
            Some(commands) => commands
                .send(cmd.clone())
                .map_err(|_| ErrorKind::BrokenPipe.into()),
            None => Err(ErrorKind::BrokenPipe.into()),
        }
    }

    /// Stops the engine: clears the running flag, queues `quit`, closes the
    /// command queue and waits up to `timeout` for the process to exit
    /// before killing it. The I/O threads get another `timeout` to finish;
    /// threads still blocked on a pipe held open by a descendant of the
    /// engine are detached.
    pub fn shutdown(mut self, timeout: Duration) -> Result<ExitStatus> {
        self.running.store(false, Ordering::Release);

        if let Some(commands) = self.commands.take() {
            if commands.send(UciCommand::Quit).is_err() {
                debug!(id = self.id, "Engine stdin already closed");
            }
        }

        let status = self.wait_or_kill(timeout)?;
        self.join_threads(timeout);

        info!(id = self.id, %status, "Engine stopped");
        Ok(status)
    }

    fn wait_or_kill(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.process.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(id = self.id, "Engine ignored quit, killing it");
                let _ = self.process.kill();
                return Ok(self.process.wait()?);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    fn join_threads(&mut self, timeout: Duration) {
        match self.finished.recv_timeout(timeout) {
            Ok(never) => match never {},
            Err(RecvTimeoutError::Disconnected) => {
                for handle in self.threads.drain(..) {
                    let _ = handle.join();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(id = self.id, "Engine pipes still open after exit, detaching I/O threads");
                self.threads.clear();
            }
        }
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.commands = None;
        reap(&mut self.process);
    }
}

/// Kills the process unless it already exited, and collects its status.
fn reap(process: &mut Child) {
    if let Ok(None) = process.try_wait() {
        let _ = process.kill();
        let _ = process.wait();
    }
}

/// Spawns a named I/O thread holding a clone of `done` until it returns.
fn spawn_io<F>(name: &str, done: &mpsc::Sender<Infallible>, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let done = done.clone();
    thread::Builder::new().name(name.into()).spawn(move || {
        let _done = done;
        f();
    })
}

fn write_loop(stdin: ChildStdin, queue: mpsc::Receiver<UciCommand>) {
    let mut writer = ProtocolWriter::new(stdin);

    for cmd in queue {
        debug!(command = %cmd, "-> engine");
        if let Err(e) = writer.send(&cmd) {
            if cmd != UciCommand::Quit {
                warn!(error = %e, command = %cmd, "Failed to write to engine");
            }
            break;
        }
    }

    debug!("Engine writer finished");
}

fn read_loop<S: OutputSink>(stdout: ChildStdout, running: Arc<AtomicBool>, mut sink: S) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    while running.load(Ordering::Acquire) {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                if running.swap(false, Ordering::AcqRel) {
                    warn!("Engine closed its output unexpectedly");
                    sink.on_close();
                }
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if !line.is_empty() {
                    sink.on_line(line);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "Failed to read engine output");
                if running.swap(false, Ordering::AcqRel) {
                    sink.on_close();
                }
                break;
            }
        }
    }

    debug!("Engine reader finished");
}

fn drain_stderr(stderr: ChildStderr) {
    for line in BufReader::new(stderr).lines() {
        match line {
            Ok(line) => debug!(target: "engine_stderr", "{}", line),
            Err(_) => break,
        }
    }
}

/// Owns at most one [`EngineSession`] at a time.
#[derive(Default)]
pub struct Supervisor {
    session: Option<EngineSession>,
    last_id: u64,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a new session. `make_sink` receives the id the session will
    /// carry, so callbacks can tell their own session from a later one.
    ///
    /// Fails with [`Error::AlreadyRunning`] while a session is alive.
    pub fn start<S, F>(&mut self, path: &str, args: &[String], make_sink: F) -> Result<u64>
    where
        S: OutputSink,
        F: FnOnce(u64) -> S,
    {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        // a session whose engine died on its own is just reaped
        self.session = None;

        let id = self.last_id + 1;
        let session = EngineSession::spawn(path, args, id, make_sink(id))?;
        self.last_id = id;
        self.session = Some(session);
        Ok(id)
    }

    /// Queues a command for the running engine. Without one the command is
    /// dropped; this races benignly with shutdown so it is not an error.
    pub fn send(&mut self, cmd: &UciCommand) {
        match self.session.as_mut() {
            Some(session) if session.is_running() => {
                if let Err(e) = session.send(cmd) {
                    warn!(error = %e, command = %cmd, "Engine no longer accepts commands");
                }
            }
            _ => debug!(command = %cmd, "No engine running, command dropped"),
        }
    }

    /// Detaches the current session so it can be shut down without holding
    /// whatever lock guards the supervisor.
    pub fn take(&mut self) -> Option<EngineSession> {
        self.session.take()
    }

    /// Shuts the current session down, if any. Calling it with nothing
    /// running is a no-op.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if let Some(session) = self.take() {
            session.shutdown(timeout)?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(EngineSession::is_running)
    }

    /// Id of the current session, running or not
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(EngineSession::id)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Line(u64, String),
        Closed(u64),
    }

    struct ChannelSink {
        id: u64,
        tx: mpsc::Sender<Seen>,
    }

    impl OutputSink for ChannelSink {
        fn on_line(&mut self, line: &str) {
            let _ = self.tx.send(Seen::Line(self.id, line.to_string()));
        }

        fn on_close(&mut self) {
            let _ = self.tx.send(Seen::Closed(self.id));
        }
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn start(
        supervisor: &mut Supervisor,
        path: &str,
        args: &[String],
    ) -> (Result<u64>, mpsc::Receiver<Seen>) {
        let (tx, rx) = mpsc::channel();
        let result = supervisor.start(path, args, |id| ChannelSink { id, tx });
        (result, rx)
    }

    #[test]
    fn test_echo_engine_round_trip() {
        let mut supervisor = Supervisor::new();
        let (id, rx) = start(&mut supervisor, "cat", &[]);
        let id = id.unwrap();
        assert!(supervisor.is_running());

        supervisor.send(&UciCommand::Raw("info depth 1 multipv 1 pv e2e4".into()));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Seen::Line(id, "info depth 1 multipv 1 pv e2e4".into())
        );

        supervisor.stop(Duration::from_secs(2)).unwrap();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.session_id(), None);
    }

    #[test]
    fn test_second_start_rejected() {
        let mut supervisor = Supervisor::new();
        let (first, _rx) = start(&mut supervisor, "cat", &[]);
        first.unwrap();

        let (second, _rx2) = start(&mut supervisor, "cat", &[]);
        assert!(matches!(second, Err(Error::AlreadyRunning)));

        supervisor.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_missing_binary_leaves_no_session() {
        let mut supervisor = Supervisor::new();
        let (result, _rx) = start(&mut supervisor, "/nonexistent/engine-binary", &[]);
        assert!(matches!(result, Err(Error::EngineUnavailable(_))));
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.session_id(), None);
    }

    #[test]
    fn test_stop_without_session_is_noop() {
        let mut supervisor = Supervisor::new();
        supervisor.stop(Duration::from_millis(10)).unwrap();
        supervisor.send(&UciCommand::Stop);
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_engine_exit_is_reported() {
        let mut supervisor = Supervisor::new();
        let (id, rx) = start(&mut supervisor, "true", &[]);
        let id = id.unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Seen::Closed(id));
        assert!(!supervisor.is_running());
        supervisor.send(&UciCommand::IsReady);

        // a dead session does not block a fresh start
        let (restarted, _rx) = start(&mut supervisor, "cat", &[]);
        assert_eq!(restarted.unwrap(), id + 1);
        supervisor.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_unresponsive_engine_is_killed() {
        let mut supervisor = Supervisor::new();
        let (id, _rx) = start(&mut supervisor, "sleep", &["30".to_string()]);
        id.unwrap();

        let began = Instant::now();
        supervisor.stop(Duration::from_millis(100)).unwrap();
        assert!(began.elapsed() < Duration::from_secs(10));
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_send_does_not_block_on_engine_ignoring_input() {
        let mut supervisor = Supervisor::new();
        let (id, _rx) = start(&mut supervisor, "sleep", &["30".to_string()]);
        id.unwrap();

        let moves = vec!["g1f3".to_string(); 200];
        let began = Instant::now();
        for _ in 0..500 {
            supervisor.send(&UciCommand::Position {
                moves: moves.clone(),
            });
        }
        assert!(began.elapsed() < WAIT);

        supervisor.stop(Duration::from_millis(100)).unwrap();
        assert!(began.elapsed() < WAIT * 2);
    }

    #[test]
    fn test_stop_bounded_when_descendant_holds_pipes() {
        let mut supervisor = Supervisor::new();
        let args = vec!["-c".to_string(), "sleep 20 & wait".to_string()];
        let (id, rx) = start(&mut supervisor, "sh", &args);
        id.unwrap();

        let began = Instant::now();
        supervisor.stop(Duration::from_millis(200)).unwrap();
        assert!(began.elapsed() < WAIT);
        assert!(!supervisor.is_running());
        // the detached reader must not report the exit as unexpected
        assert!(rx.try_recv().is_err());
    }
}
