//! Process supervision: spawns one backend process, watches it, respawns it
//! on demand after a crash, and tears it down on dispose.
//!
//! State lives in one place, [`ProcessState`], and moves
//! `NotStarted → Starting → Started`, back to `NotStarted` when the process
//! dies unexpectedly or a start fails, and to `Disposed` exactly once.
//! Concurrent `ensure_started` callers share the in-flight start future.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Notify, mpsc, watch};

use crate::codec::{Framing, MessageReader, MessageWriter};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch a backend process.
#[derive(Debug, Clone)]
pub(crate) struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub framing: Framing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Ended by `dispose`.
    Disposed,
    /// Crashed, killed, or closed on its own.
    Unexpected,
}

/// Callbacks from the supervisor's reader and exit-watcher tasks.
pub(crate) trait ProcessEvents: Send + Sync {
    fn on_message(&self, message: Value, channel: &ProcessChannel);
    fn on_exit(&self, exit: ProcessExit);
}

/// Runs after spawn, before the channel is published to other callers.
pub(crate) type Handshake =
    Arc<dyn Fn(ProcessChannel) -> BoxFuture<'static, Result<(), StartError>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum StartError {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("{name} handshake failed: {message}")]
    Handshake { name: String, message: String },
    #[error("{0} has been disposed")]
    Disposed(String),
}

enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Cloneable handle to one running process generation.
#[derive(Clone)]
pub(crate) struct ProcessChannel {
    generation: u64,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    kill: Arc<Notify>,
    exited: watch::Receiver<bool>,
}

impl ProcessChannel {
    /// Queue a message. `false` when the process is gone.
    pub fn send(&self, message: Value) -> bool {
        self.is_alive() && self.writer_tx.send(WriterCommand::Send(message)).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn kill(&self) {
        self.kill.notify_one();
    }

    async fn wait_exit(&self) {
        let mut exited = self.exited.clone();
        let _ = exited.wait_for(|exited| *exited).await;
    }

    /// Close stdin, give the process `grace` to exit, then kill it.
    async fn shutdown(&self, grace: Duration) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        if tokio::time::timeout(grace, self.wait_exit()).await.is_err() {
            tracing::debug!(generation = self.generation, "backend didn't exit in time, killing");
            self.kill();
            self.wait_exit().await;
        }
    }
}

type SharedStart = Shared<BoxFuture<'static, Result<ProcessChannel, StartError>>>;

enum ProcessState {
    NotStarted,
    Starting(SharedStart),
    Started(ProcessChannel),
    Disposed,
}

struct SupervisorInner {
    name: String,
    spec: LaunchSpec,
    events: Arc<dyn ProcessEvents>,
    handshake: Option<Handshake>,
    state: Mutex<ProcessState>,
    generation: AtomicU64,
    disposing: AtomicBool,
}

impl SupervisorInner {
    fn lock_state(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SupervisorInner {
    fn drop(&mut self) {
        if let ProcessState::Started(channel) = &*self.lock_state() {
            channel.kill();
        }
    }
}

pub(crate) struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ProcessSupervisor {
    pub fn new(
        name: impl Into<String>,
        spec: LaunchSpec,
        events: Arc<dyn ProcessEvents>,
        handshake: Option<Handshake>,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                name: name.into(),
                spec,
                events,
                handshake,
                state: Mutex::new(ProcessState::NotStarted),
                generation: AtomicU64::new(0),
                disposing: AtomicBool::new(false),
            }),
        }
    }

    /// The running channel, starting the process if needed.
    pub async fn ensure_started(&self) -> Result<ProcessChannel, StartError> {
        let start = {
            let mut state = self.inner.lock_state();
            match &*state {
                ProcessState::Started(channel) if channel.is_alive() => {
                    return Ok(channel.clone());
                }
                ProcessState::Disposed => {
                    return Err(StartError::Disposed(self.inner.name.clone()));
                }
                ProcessState::Starting(start) => start.clone(),
                // A dead `Started` is an exit the watcher has not recorded yet.
                ProcessState::NotStarted | ProcessState::Started(_) => {
                    let start = self.start_future().shared();
                    *state = ProcessState::Starting(start.clone());
                    start
                }
            }
        };

        let result = start.clone().await;

        let mut state = self.inner.lock_state();
        match &*state {
            ProcessState::Starting(current) if current.ptr_eq(&start) => {
                *state = match &result {
                    Ok(channel) if channel.is_alive() => ProcessState::Started(channel.clone()),
                    _ => ProcessState::NotStarted,
                };
            }
            ProcessState::Disposed => {
                if let Ok(channel) = &result {
                    channel.kill();
                }
                return Err(StartError::Disposed(self.inner.name.clone()));
            }
            _ => {}
        }
        drop(state);

        match result {
            Ok(channel) if !channel.is_alive() => Err(StartError::Spawn {
                program: self.inner.spec.program.display().to_string(),
                message: "process exited during startup".to_string(),
            }),
            other => other,
        }
    }

    fn start_future(&self) -> BoxFuture<'static, Result<ProcessChannel, StartError>> {
        let name = self.inner.name.clone();
        let spec = self.inner.spec.clone();
        let events = self.inner.events.clone();
        let handshake = self.inner.handshake.clone();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let supervisor = Arc::downgrade(&self.inner);

        async move {
            let channel = spawn_process(&name, &spec, events, generation, supervisor)?;
            if let Some(handshake) = handshake
                && let Err(e) = handshake(channel.clone()).await
            {
                tracing::warn!(backend = %name, "{e}");
                channel.kill();
                return Err(e);
            }
            Ok(channel)
        }
        .boxed()
    }

    /// Kill the current process without disposing. The exit is reported as
    /// unexpected and the next `ensure_started` respawns.
    pub fn kill(&self) {
        if let ProcessState::Started(channel) = &*self.inner.lock_state() {
            channel.kill();
        }
    }

    /// The running channel, if any, without starting.
    pub fn current(&self) -> Option<ProcessChannel> {
        match &*self.inner.lock_state() {
            ProcessState::Started(channel) => Some(channel.clone()),
            _ => None,
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(&*self.inner.lock_state(), ProcessState::Disposed)
    }

    /// Stop the process for good. Safe to call repeatedly.
    pub async fn dispose(&self) {
        self.inner.disposing.store(true, Ordering::Release);
        let previous = std::mem::replace(&mut *self.inner.lock_state(), ProcessState::Disposed);

        let channel = match previous {
            ProcessState::Started(channel) => Some(channel),
            // Let the in-flight start settle so its process can be reaped.
            ProcessState::Starting(start) => start.await.ok(),
            ProcessState::NotStarted | ProcessState::Disposed => None,
        };

        if let Some(channel) = channel {
            tracing::debug!(backend = %self.inner.name, "stopping backend process");
            channel.shutdown(SHUTDOWN_GRACE).await;
        }
    }
}

fn spawn_process(
    name: &str,
    spec: &LaunchSpec,
    events: Arc<dyn ProcessEvents>,
    generation: u64,
    supervisor: Weak<SupervisorInner>,
) -> Result<ProcessChannel, StartError> {
    let spawn_error = |message: String| StartError::Spawn {
        program: spec.program.display().to_string(),
        message,
    };

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(|e| spawn_error(e.to_string()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_error("no stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_error("no stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| spawn_error("no stderr".into()))?;

    tracing::info!(backend = %name, pid = ?child.id(), generation, "backend process started");

    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let (exited_tx, exited_rx) = watch::channel(false);
    let kill = Arc::new(Notify::new());
    let channel = ProcessChannel {
        generation,
        writer_tx,
        kill: kill.clone(),
        exited: exited_rx,
    };

    tokio::spawn(write_loop(
        stdin,
        spec.framing,
        writer_rx,
        name.to_string(),
    ));
    tokio::spawn(read_loop(
        stdout,
        events.clone(),
        channel.clone(),
        name.to_string(),
    ));
    tokio::spawn(forward_stderr(stderr, name.to_string()));
    tokio::spawn(watch_exit(
        child,
        kill,
        exited_tx,
        supervisor,
        events,
        generation,
        name.to_string(),
    ));

    Ok(channel)
}

async fn write_loop(
    stdin: ChildStdin,
    framing: Framing,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    name: String,
) {
    let mut writer = MessageWriter::new(stdin, framing);
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCommand::Send(message) => {
                if let Err(e) = writer.write_message(&message).await {
                    tracing::warn!(backend = %name, "write error: {e:#}");
                    return;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
    let _ = writer.close().await;
}

async fn read_loop(
    stdout: ChildStdout,
    events: Arc<dyn ProcessEvents>,
    channel: ProcessChannel,
    name: String,
) {
    let mut reader = MessageReader::new(stdout);
    loop {
        match reader.read_message().await {
            Ok(Some(message)) => events.on_message(message, &channel),
            Ok(None) => {
                tracing::debug!(backend = %name, "backend closed stdout");
                break;
            }
            Err(e) => {
                // A desynchronized stream cannot be recovered; restart instead.
                tracing::warn!(backend = %name, "unreadable backend output: {e:#}");
                channel.kill();
                break;
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr, name: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::info!(backend = %name, "{line}");
        }
    }
}

async fn watch_exit(
    mut child: Child,
    kill: Arc<Notify>,
    exited: watch::Sender<bool>,
    supervisor: Weak<SupervisorInner>,
    events: Arc<dyn ProcessEvents>,
    generation: u64,
    name: String,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.notified() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    // Publish the exit before touching supervisor state; ensure_started
    // checks liveness under the state lock.
    let _ = exited.send(true);

    let deliberate = match supervisor.upgrade() {
        Some(inner) => {
            let mut state = inner.lock_state();
            if let ProcessState::Started(channel) = &*state
                && channel.generation == generation
            {
                *state = ProcessState::NotStarted;
            }
            inner.disposing.load(Ordering::Acquire)
        }
        None => true,
    };

    let exit = if deliberate {
        tracing::debug!(backend = %name, ?status, "backend process stopped");
        ProcessExit::Disposed
    } else {
        tracing::warn!(backend = %name, ?status, "backend process exited unexpectedly");
        ProcessExit::Unexpected
    };
    events.on_exit(exit);
}
