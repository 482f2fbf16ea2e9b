//! Worker process lifecycle supervisor.
//!
//! Guarantees one worker process is running, restarts it after unplanned
//! exit with capped exponential backoff, and never crash-loops faster than
//! the backoff allows. The supervisor is driven exclusively by the bridge
//! actor, so its state needs no locking.
//!
//! Every spawned worker gets a monotonically increasing generation number;
//! stream events and restart timers are tagged with it so leftovers from a
//! dead worker are dropped instead of being attributed to its replacement.

mod backoff;

pub use backoff::RestartPolicy;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::bridge::Event;

/// Arguments and environment for spawning the worker.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Path to the worker binary.
    pub worker_bin: PathBuf,
    /// Working directory for the worker.
    pub working_directory: Option<PathBuf>,
    /// Model selector forwarded to the worker.
    pub model: Option<String>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            worker_bin: PathBuf::from("claude"),
            working_directory: None,
            model: None,
        }
    }
}

/// Lifecycle state of the supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Exited,
}

/// Errors from spawning the worker. Recovered internally via the restart
/// path; never surfaced to bridge callers.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn worker: {reason}")]
    SpawnFailed { reason: String },

    #[error("failed to capture worker {stream} stream")]
    StdioCapture { stream: &'static str },
}

/// Handle to the currently attached worker.
struct ActiveWorker {
    generation: u64,
    stdin_tx: mpsc::Sender<String>,
    /// Signals the exit watcher to terminate the worker gracefully.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Completes once the exit watcher has finished termination.
    done_rx: Option<oneshot::Receiver<()>>,
}

/// Supervisor for the single worker process.
pub(crate) struct Supervisor {
    config: SpawnConfig,
    policy: RestartPolicy,
    terminate_timeout: Duration,
    state: WorkerState,
    /// Consecutive unplanned exits since the last observed stdout line.
    failures: u32,
    /// Generation of the most recently spawned worker.
    generation: u64,
    worker: Option<ActiveWorker>,
    shutting_down: bool,
    attached_tx: watch::Sender<bool>,
    event_tx: mpsc::Sender<Event>,
}

impl Supervisor {
    pub(crate) fn new(
        config: SpawnConfig,
        policy: RestartPolicy,
        terminate_timeout: Duration,
        event_tx: mpsc::Sender<Event>,
        attached_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            config,
            policy,
            terminate_timeout,
            state: WorkerState::Starting,
            failures: 0,
            generation: 0,
            worker: None,
            shutting_down: false,
            attached_tx,
            event_tx,
        }
    }

    /// Launch a new worker, replacing nothing: if a live worker is still
    /// attached the call is ignored (double-start guard).
    pub(crate) fn start(&mut self) {
        if self.shutting_down {
            return;
        }
        if self.worker.is_some() {
            warn!("start requested while a worker is still attached, ignoring");
            return;
        }

        self.generation += 1;
        self.state = WorkerState::Starting;

        match spawn_worker(
            &self.config,
            self.generation,
            self.event_tx.clone(),
            self.terminate_timeout,
        ) {
            Ok(worker) => {
                info!(
                    generation = self.generation,
                    worker_bin = %self.config.worker_bin.display(),
                    "worker started"
                );
                self.worker = Some(worker);
                self.state = WorkerState::Running;
                self.attached_tx.send_replace(true);
            }
            Err(e) => {
                // Spawn failure and crash share the same recovery path; a
                // permanently broken binary keeps retrying at the capped
                // delay.
                error!(error = %e, "failed to start worker");
                self.state = WorkerState::Exited;
                self.schedule_restart();
            }
        }
    }

    /// Handle an observed worker exit. Stale generations are dropped.
    pub(crate) fn on_exit(&mut self, generation: u64, code: Option<i32>) {
        if self
            .worker
            .as_ref()
            .is_none_or(|w| w.generation != generation)
        {
            debug!(generation, "ignoring exit event for stale worker");
            return;
        }

        self.worker = None;
        self.state = WorkerState::Exited;
        self.attached_tx.send_replace(false);

        if self.shutting_down {
            return;
        }

        info!(generation, code = ?code, "worker exited unexpectedly");
        self.schedule_restart();
    }

    /// Handle a due restart timer.
    pub(crate) fn on_restart_due(&mut self, generation: u64) {
        if self.shutting_down || self.worker.is_some() || generation != self.generation {
            debug!(generation, "ignoring stale restart timer");
            return;
        }
        self.start();
    }

    /// Any stdout line from the live worker counts as evidence of health.
    pub(crate) fn note_output(&mut self) {
        if self.failures != 0 {
            debug!("worker produced output, resetting failure counter");
            self.failures = 0;
        }
    }

    /// Whether `generation` identifies the currently attached worker.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.generation == generation)
    }

    pub(crate) fn attached(&self) -> bool {
        self.worker.is_some()
    }

    /// Sender for the attached worker's stdin, if any.
    pub(crate) fn stdin(&self) -> Option<mpsc::Sender<String>> {
        self.worker.as_ref().map(|w| w.stdin_tx.clone())
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> WorkerState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    /// Gracefully stop the attached worker and suppress further restarts.
    pub(crate) async fn shutdown(&mut self) {
        self.shutting_down = true;
        self.attached_tx.send_replace(false);

        if let Some(mut worker) = self.worker.take() {
            if let Some(kill) = worker.kill_tx.take() {
                let _ = kill.send(());
            }
            if let Some(done) = worker.done_rx.take() {
                let grace = self.terminate_timeout + Duration::from_secs(1);
                if tokio::time::timeout(grace, done).await.is_err() {
                    warn!("timed out waiting for worker shutdown");
                }
            }
        }
        self.state = WorkerState::Exited;
        debug!(state = ?self.state, "supervisor shut down");
    }

    fn schedule_restart(&mut self) {
        let delay = self.policy.delay_for_attempt(self.failures);
        self.failures += 1;
        warn!(
            failures = self.failures,
            delay_secs = delay.as_secs(),
            "scheduling worker restart"
        );

        let event_tx = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.send(Event::RestartDue { generation }).await;
        });
    }

    /// Attach a fake worker fed by the given stdin channel. Test-only
    /// stand-in for `start()` so unit tests never spawn real processes.
    #[cfg(test)]
    pub(crate) fn attach_for_tests(&mut self, stdin_tx: mpsc::Sender<String>) -> u64 {
        self.generation += 1;
        self.worker = Some(ActiveWorker {
            generation: self.generation,
            stdin_tx,
            kill_tx: None,
            done_rx: None,
        });
        self.state = WorkerState::Running;
        self.attached_tx.send_replace(true);
        self.generation
    }
}

/// Spawn the worker process and wire up its three stream observers.
fn spawn_worker(
    config: &SpawnConfig,
    generation: u64,
    event_tx: mpsc::Sender<Event>,
    terminate_timeout: Duration,
) -> Result<ActiveWorker, SpawnError> {
    // Fall back when the configured working directory is missing; the
    // worker refuses to start in a nonexistent directory.
    let working_dir = match &config.working_directory {
        Some(dir) if dir.exists() => dir.clone(),
        requested => {
            let fallback = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
            if let Some(dir) = requested {
                warn!(
                    requested = %dir.display(),
                    fallback = %fallback.display(),
                    "working directory missing, using fallback"
                );
            }
            fallback
        }
    };

    let mut cmd = Command::new(&config.worker_bin);
    cmd.current_dir(&working_dir)
        .arg("--input-format")
        .arg("stream-json")
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose")
        .arg("--dangerously-skip-permissions")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Ensure essential env vars reach the worker even when the daemon runs
    // under systemd with a stripped environment. The credential itself is
    // provisioned externally.
    if let Ok(home) = std::env::var("HOME") {
        cmd.env("HOME", &home);
    }
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", &path);
    }
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        cmd.env("ANTHROPIC_API_KEY", &key);
    }

    if let Some(ref model) = config.model {
        cmd.arg("--model").arg(model);
    }

    debug!(
        generation,
        working_dir = %working_dir.display(),
        "spawning worker"
    );
    let mut child = cmd.spawn().map_err(|e| SpawnError::SpawnFailed {
        reason: e.to_string(),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| {
        let _ = child.start_kill();
        SpawnError::StdioCapture { stream: "stdin" }
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        let _ = child.start_kill();
        SpawnError::StdioCapture { stream: "stdout" }
    })?;
    let stderr = child.stderr.take();

    // Stdin writer: the only path that writes to the worker.
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
    tokio::spawn(async move {
        let mut stdin = stdin;
        while let Some(line) = stdin_rx.recv().await {
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                error!(generation, error = %e, "failed to write to worker stdin");
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                error!(generation, error = %e, "failed to write newline");
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!(generation, error = %e, "failed to flush worker stdin");
                break;
            }
        }
    });

    // Stdout reader: every line goes to the bridge actor, tagged with the
    // worker generation.
    let stdout_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stdout_tx
                .send(Event::StdoutLine { generation, line })
                .await
                .is_err()
            {
                break;
            }
        }
        debug!(generation, "stdout reader finished");
    });

    // Stderr reader: diagnostics only, never affects control flow.
    if let Some(stderr) = stderr {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(generation, "worker stderr: {}", line);
            }
            debug!(generation, "stderr reader finished");
        });
    }

    // Exit watcher: reports unplanned exits, or terminates the worker on
    // shutdown.
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = &mut kill_rx => None,
        };
        match status {
            Some(status) => {
                let code = status.as_ref().ok().and_then(std::process::ExitStatus::code);
                let _ = event_tx.send(Event::WorkerExited { generation, code }).await;
            }
            None => {
                graceful_kill(&mut child, generation, terminate_timeout).await;
                let _ = done_tx.send(());
            }
        }
    });

    Ok(ActiveWorker {
        generation,
        stdin_tx,
        kill_tx: Some(kill_tx),
        done_rx: Some(done_rx),
    })
}

/// SIGINT first so the worker can flush and exit cleanly, then SIGKILL
/// after the grace period.
async fn graceful_kill(child: &mut Child, generation: u64, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from our own Child handle; kill(2) with SIGINT
        // is safe to call on an owned subprocess.
        #[allow(unsafe_code)]
        #[allow(clippy::cast_possible_wrap)]
        let ret = unsafe { libc::kill(pid as i32, libc::SIGINT) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            warn!(generation, pid, error = %err, "failed to send SIGINT");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(generation, ?status, "worker exited gracefully");
        }
        Ok(Err(e)) => {
            warn!(generation, error = %e, "error waiting for worker");
            child.kill().await.ok();
        }
        Err(_) => {
            warn!(generation, "timeout waiting for graceful shutdown, killing");
            child.kill().await.ok();
        }
    }
}
