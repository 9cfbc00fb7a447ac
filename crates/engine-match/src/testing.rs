//! In-memory engine doubles for unit tests.

use crate::engine::{EngineError, EngineLauncher, EngineTransport, LineSink, Stream};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedEngine {
    path: PathBuf,
    args: Vec<String>,
    sent: Vec<String>,
    sink: LineSink,
    terminated: bool,
}

#[derive(Default)]
struct Shared {
    engines: Vec<ScriptedEngine>,
    failing: bool,
    broken: bool,
}

/// Records every launch and every line written; engine output is injected
/// with [`ScriptedLauncher::emit`]. Engines are addressed by launch order.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedLauncher {
    pub fn failing() -> Self {
        let launcher = Self::default();
        launcher.set_failing(true);
        launcher
    }

    pub fn set_failing(&self, failing: bool) {
        self.shared.lock().unwrap().failing = failing;
    }

    pub fn break_pipes(&self) {
        self.shared.lock().unwrap().broken = true;
    }

    pub fn launches(&self) -> usize {
        self.shared.lock().unwrap().engines.len()
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.shared.lock().unwrap().engines[index].path.clone()
    }

    pub fn args(&self, index: usize) -> Vec<String> {
        self.shared.lock().unwrap().engines[index].args.clone()
    }

    pub fn sent(&self, index: usize) -> Vec<String> {
        self.shared.lock().unwrap().engines[index].sent.clone()
    }

    pub fn terminated(&self, index: usize) -> bool {
        self.shared.lock().unwrap().engines[index].terminated
    }

    /// Pushes a line through the engine's sink. Returns false when muted.
    pub fn emit(&self, index: usize, stream: Stream, line: &str) -> bool {
        let sink = self.shared.lock().unwrap().engines[index].sink.clone();
        sink.deliver(stream, line.to_string())
    }
}

impl EngineLauncher for ScriptedLauncher {
    fn launch(
        &self,
        path: &Path,
        args: &[String],
        sink: LineSink,
    ) -> Result<Box<dyn EngineTransport>, EngineError> {
        let mut shared = self.shared.lock().unwrap();
        if shared.failing {
            return Err(EngineError::Spawn {
                path: path.display().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            });
        }
        shared.engines.push(ScriptedEngine {
            path: path.to_path_buf(),
            args: args.to_vec(),
            sent: Vec::new(),
            sink,
            terminated: false,
        });
        Ok(Box::new(ScriptedTransport {
            shared: self.shared.clone(),
            index: shared.engines.len() - 1,
        }))
    }
}

struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
    index: usize,
}

impl EngineTransport for ScriptedTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        shared.engines[self.index].sent.push(line.to_string());
        Ok(())
    }

    fn terminate(self: Box<Self>, _grace: Duration) {
        self.shared.lock().unwrap().engines[self.index].terminated = true;
    }
}
