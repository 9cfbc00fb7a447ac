//! Engine subprocess adapter.
//!
//! An [`EngineAdapter`] owns one engine process for the duration of one game.
//! Commands go out through [`EngineAdapter::send`]; output comes back as raw
//! lines through a [`LineSink`] and must be passed through
//! [`EngineAdapter::accept_line`], which keeps the `isready`/`go` counters in
//! step with the engine and drops output that belongs to an older request.
//!
//! Process plumbing sits behind the [`EngineLauncher`] and
//! [`EngineTransport`] traits so the protocol logic can be driven without
//! real subprocesses.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};
use uci::{EngineMessage, GuiCommand};

/// How long an engine gets to exit after `quit` before it is killed.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(2000);

/// Errors that can occur when starting an engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine process could not be spawned.
    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The adapter already owns (or owned) a process.
    #[error("Engine adapter {0} was already launched")]
    AlreadyLaunched(EngineId),
}

/// Identifies one adapter instance. Never reused within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(pub u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which output pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Callback invoked for every line an engine writes.
pub type LineCallback = Arc<dyn Fn(Stream, String) + Send + Sync>;

/// Delivers engine output to the adapter's owner until muted.
#[derive(Clone)]
pub struct LineSink {
    muted: Arc<AtomicBool>,
    callback: LineCallback,
}

impl LineSink {
    pub fn new(callback: LineCallback) -> Self {
        Self {
            muted: Arc::new(AtomicBool::new(false)),
            callback,
        }
    }

    /// Forwards the line unless the sink has been muted. Returns whether the
    /// line was delivered.
    pub fn deliver(&self, stream: Stream, line: String) -> bool {
        if self.is_muted() {
            return false;
        }
        (self.callback)(stream, line);
        true
    }

    /// Stops all further deliveries, including lines already read but not yet
    /// delivered.
    pub fn mute(&self) {
        self.muted.store(true, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }
}

/// A running engine process, as seen by its adapter.
pub trait EngineTransport: Send {
    /// Writes one line (a newline is appended).
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Makes sure the process is gone: it gets `grace` to exit on its own
    /// and is killed afterwards. Cannot be cancelled.
    fn terminate(self: Box<Self>, grace: Duration);
}

/// Starts engine processes.
pub trait EngineLauncher: Send + Sync {
    /// Spawns `path` with `args`, delivering every stdout and stderr line to
    /// `sink`.
    fn launch(
        &self,
        path: &Path,
        args: &[String],
        sink: LineSink,
    ) -> Result<Box<dyn EngineTransport>, EngineError>;
}

/// Launches engines as local subprocesses.
///
/// The working directory is the executable's own directory, and each output
/// pipe is drained by a dedicated reader thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl EngineLauncher for ProcessLauncher {
    fn launch(
        &self,
        path: &Path,
        args: &[String],
        sink: LineSink,
    ) -> Result<Box<dyn EngineTransport>, EngineError> {
        let spawn_error = |source: io::Error| EngineError::Spawn {
            path: path.display().to_string(),
            source,
        };

        let program = resolve_program(path);
        let mut command = Command::new(&program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = program.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(spawn_error)?;
        let missing = |name: &str| {
            spawn_error(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("no {} pipe", name),
            ))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engine".to_string());
        spawn_reader(format!("{}-stdout", label), Stream::Stdout, stdout, sink.clone())
            .map_err(spawn_error)?;
        spawn_reader(format!("{}-stderr", label), Stream::Stderr, stderr, sink)
            .map_err(spawn_error)?;

        Ok(Box::new(ProcessTransport {
            child: Some(child),
            stdin: Some(stdin),
        }))
    }
}

/// Anchors a relative `path` at the current directory when a file exists
/// there. Symlinks are left alone so the engine runs from the directory it
/// was configured in. Anything else is left to the `PATH` lookup.
fn resolve_program(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) if cwd.join(path).exists() => cwd.join(path),
        _ => path.to_path_buf(),
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    name: String,
    stream: Stream,
    reader: R,
    sink: LineSink,
) -> io::Result<()> {
    thread::Builder::new().name(name).spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => {
                    // Keep draining after mute so the engine never blocks on a full pipe.
                    sink.deliver(stream, line.trim_end_matches('\r').to_string());
                }
                Err(e) => {
                    trace!("engine {:?} closed: {}", stream, e);
                    break;
                }
            }
        }
    })?;
    Ok(())
}

struct ProcessTransport {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl EngineTransport for ProcessTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))?;
        writeln!(stdin, "{}", line)?;
        stdin.flush()
    }

    fn terminate(mut self: Box<Self>, grace: Duration) {
        self.stdin.take();
        let Some(mut child) = self.child.take() else {
            return;
        };

        let reaper = thread::Builder::new()
            .name("engine-reaper".to_string())
            .spawn(move || {
                thread::sleep(grace);
                if !matches!(child.try_wait(), Ok(Some(_))) {
                    debug!("engine pid {} ignored quit, killing", child.id());
                    let _ = child.kill();
                }
                let _ = child.wait();
            });
        if let Err(e) = reaper {
            warn!("could not schedule engine kill: {}", e);
        }
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Lifecycle of an [`EngineAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Constructed, no process yet.
    Created,
    /// Process running and attached.
    Active,
    /// `quit` sent and kill scheduled. The adapter is finished.
    ShutdownRequested,
}

/// One engine process plus the protocol bookkeeping that keeps its output
/// in step with the requests sent to it.
///
/// The adapter counts the `isready` and `go` requests still waiting for
/// their `readyok` and `bestmove`. Output that belongs to an older request
/// is dropped by [`accept_line`](Self::accept_line), so the owner only ever
/// acts on replies to the latest request.
///
/// # Lifecycle
///
/// 1. Create with [`EngineAdapter::new`]
/// 2. Start the process with [`EngineAdapter::launch`]
/// 3. Talk to it with [`send`](Self::send) and feed every stdout line to
///    [`accept_line`](Self::accept_line)
/// 4. Stop it with [`shutdown`](Self::shutdown) (or rely on [`Drop`])
///
/// # Example
///
/// ```no_run
/// use engine_match::engine::{EngineAdapter, EngineId, ProcessLauncher, Stream};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// let mut adapter = EngineAdapter::new(EngineId(1));
/// adapter.launch(
///     &ProcessLauncher,
///     Path::new("/usr/bin/stockfish"),
///     &[],
///     Arc::new(|stream: Stream, line: String| println!("{:?}: {}", stream, line)),
/// )?;
/// adapter.send("uci");
/// # Ok::<(), engine_match::engine::EngineError>(())
/// ```
pub struct EngineAdapter {
    id: EngineId,
    name: String,
    readyok_required: u32,
    bestmove_required: u32,
    ever_sent: bool,
    ever_received_uciok: bool,
    state: AdapterState,
    sink: Option<LineSink>,
    transport: Option<Box<dyn EngineTransport>>,
}

impl EngineAdapter {
    /// Creates an adapter with no process. Its name is `"??"` until
    /// [`launch`](Self::launch).
    pub fn new(id: EngineId) -> Self {
        Self {
            id,
            name: "??".to_string(),
            readyok_required: 0,
            bestmove_required: 0,
            ever_sent: false,
            ever_received_uciok: false,
            state: AdapterState::Created,
            sink: None,
            transport: None,
        }
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    /// Executable basename until the engine reports `id name`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `isready` requests whose `readyok` has not arrived yet.
    pub fn readyok_required(&self) -> u32 {
        self.readyok_required
    }

    /// `go` requests whose `bestmove` has not arrived yet.
    pub fn bestmove_required(&self) -> u32 {
        self.bestmove_required
    }

    /// True once any line has been written to the engine.
    pub fn ever_sent(&self) -> bool {
        self.ever_sent
    }

    pub fn ever_received_uciok(&self) -> bool {
        self.ever_received_uciok
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// True while a process is attached.
    pub fn is_live(&self) -> bool {
        self.transport.is_some()
    }

    /// Starts the engine process.
    ///
    /// Resets both counters and names the adapter after the executable.
    /// Every line the engine writes is passed to `on_line` from a reader
    /// thread until the adapter is shut down. On failure the adapter stays
    /// inert: every later [`send`](Self::send) is a no-op.
    ///
    /// # Arguments
    ///
    /// * `launcher` - Starts the process, normally [`ProcessLauncher`].
    /// * `path` - Engine executable.
    /// * `args` - Command-line arguments for the engine.
    /// * `on_line` - Receives each output line with the pipe it came from.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyLaunched`] if the adapter was launched
    /// before, and [`EngineError::Spawn`] if the process cannot be started.
    pub fn launch(
        &mut self,
        launcher: &dyn EngineLauncher,
        path: &Path,
        args: &[String],
        on_line: LineCallback,
    ) -> Result<(), EngineError> {
        if self.state != AdapterState::Created {
            return Err(EngineError::AlreadyLaunched(self.id));
        }

        self.readyok_required = 0;
        self.bestmove_required = 0;
        self.name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let sink = LineSink::new(on_line);
        let transport = launcher.launch(path, args, sink.clone())?;

        debug!("engine {} launched: {}", self.id, path.display());
        self.sink = Some(sink);
        self.transport = Some(transport);
        self.state = AdapterState::Active;
        Ok(())
    }

    /// Sends one protocol line.
    ///
    /// `go` raises the pending `bestmove` count and `isready` the pending
    /// `readyok` count, even when the write fails. Write failures are
    /// logged and swallowed. Does nothing before launch or after shutdown.
    pub fn send(&mut self, message: &str) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let message = message.trim();

        if message.starts_with("go") {
            self.bestmove_required += 1;
        }
        if message == "isready" {
            self.readyok_required += 1;
        }

        match transport.write_line(message) {
            Ok(()) => {
                debug!("{} --> {}", self.name, message);
                self.ever_sent = true;
            }
            Err(e) => warn!("{} (failed: {}) --> {}", self.name, e, message),
        }
    }

    /// Sends a typed command through [`send`](Self::send).
    pub fn send_command(&mut self, command: &GuiCommand) {
        self.send(&command.to_uci());
    }

    /// Sends `setoption name <name> value <value>`.
    pub fn set_option(&mut self, name: &str, value: impl fmt::Display) {
        self.send_command(&GuiCommand::set_option(name, value));
    }

    /// Updates the synchronization counters from one stdout line and decides
    /// whether the line is current. Returns the line if the owner should act
    /// on it.
    ///
    /// A line is dropped while a `readyok` is outstanding, while more than
    /// one `bestmove` is outstanding, and when it is a `bestmove` that
    /// answers an older `go`. `uciok` and `id name` are recorded either way.
    pub fn accept_line(&mut self, line: &str) -> Option<String> {
        // Counters first, unconditionally: a line can resolve a counter and
        // still be stale.
        if line.contains("bestmove") && self.bestmove_required > 0 {
            self.bestmove_required -= 1;
        }
        if line.contains("readyok") && self.readyok_required > 0 {
            self.readyok_required -= 1;
        }

        if line.contains("uciok") {
            self.ever_received_uciok = true;
        }
        if let EngineMessage::Id {
            name: Some(name), ..
        } = EngineMessage::parse(line)
        {
            if !name.is_empty() {
                self.name = name;
            }
        }

        if self.bestmove_required > 1 || (line.contains("bestmove") && self.bestmove_required > 0)
        {
            trace!("{} (bestmove desync) <-- {}", self.name, line);
            return None;
        }
        if self.readyok_required > 0 {
            trace!("{} (readyok desync) <-- {}", self.name, line);
            return None;
        }

        debug!("{} <-- {}", self.name, line);
        Some(line.to_string())
    }

    /// Mutes output, sends `quit`, and schedules a forced kill after `grace`.
    /// The adapter must not be reused afterwards.
    ///
    /// Lines the reader threads have already read are dropped, so the owner
    /// never hears from this engine again.
    pub fn shutdown(&mut self, grace: Duration) {
        if let Some(sink) = &self.sink {
            sink.mute();
        }
        self.send_command(&GuiCommand::Quit);
        if let Some(transport) = self.transport.take() {
            transport.terminate(grace);
        }
        self.state = AdapterState::ShutdownRequested;
    }
}

impl Drop for EngineAdapter {
    fn drop(&mut self) {
        if self.transport.is_some() {
            self.shutdown(DEFAULT_KILL_GRACE);
        }
    }
}

impl fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("readyok_required", &self.readyok_required)
            .field("bestmove_required", &self.bestmove_required)
            .field("state", &self.state)
            .finish()
    }
}
