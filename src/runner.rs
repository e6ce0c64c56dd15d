//! One supervised service: lifecycle state machine, blocker preroll,
//! child-process ownership, stream redirection, and shutdown escalation.
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::{
    config::RunnerConfig,
    constants::{
        BLOCKER_FILE_NAME, MONITOR_POLL_FAST, MONITOR_POLL_SLOW, STOP_POLL_INTERVAL,
        STOP_STEP_WAIT,
    },
    envfile::EnvMap,
    error::SupervisorError,
    sched::{CancelToken, Scheduler, TaskId},
};

#[cfg(unix)]
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};

/// The nine lifecycle keys a runner's status can carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKey {
    /// `start` accepted, monitor not yet past the preroll.
    Booting,
    /// Blocker probes are executing.
    Blocking,
    /// Streams are being opened and the child is about to spawn.
    RunningReady,
    /// A live child exists.
    Running,
    /// Shutdown escalation in progress.
    Stopping,
    /// Child exited and streams are closed.
    Stopped,
    /// Terminal: the runner will not be reused.
    Destroyed,
    /// A signal is about to be delivered.
    SignalReady,
    /// The signal has been delivered.
    SignalSent,
}

/// Status of one runner: a tagged value whose data shape depends on the key.
/// Every transition constructs a new value; the data always carries the
/// transition timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "key", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    /// `start` accepted.
    Booting {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
    },
    /// Blocker preroll in progress.
    Blocking {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
        /// Every probe collected for this preroll.
        block_list: Vec<PathBuf>,
        /// Probe currently executing.
        #[serde(skip_serializing_if = "Option::is_none")]
        blocked_program: Option<PathBuf>,
        /// When the current probe started.
        #[serde(skip_serializing_if = "Option::is_none")]
        blocked_time: Option<DateTime<Utc>>,
        /// Number of retries after non-zero probe exits.
        blocked_run_num: u64,
    },
    /// About to spawn the child.
    RunningReady {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
    },
    /// Child is alive.
    Running {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
    },
    /// Shutdown escalation in progress.
    Stopping {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
        /// Last escalation step delivered (e.g. `SIGTERM`).
        #[serde(skip_serializing_if = "Option::is_none")]
        shutdown_command: Option<String>,
        /// Failure recorded when the escalation could not kill the child.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Child has exited, streams closed.
    Stopped {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
    },
    /// Terminal state.
    Destroyed {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
        /// Error surfaced by the monitor or the escalation, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Signal delivery pending.
    SignalReady {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
        /// Signal number about to be sent.
        signal: i32,
    },
    /// Signal delivered; monitor restores `RUNNING` on its next poll.
    SignalSent {
        /// Timestamp of the transition.
        changed_time: DateTime<Utc>,
        /// Signal number sent.
        signal: i32,
    },
}

impl RunnerStatus {
    /// Returns the key of this status value.
    pub fn key(&self) -> StatusKey {
        match self {
            Self::Booting { .. } => StatusKey::Booting,
            Self::Blocking { .. } => StatusKey::Blocking,
            Self::RunningReady { .. } => StatusKey::RunningReady,
            Self::Running { .. } => StatusKey::Running,
            Self::Stopping { .. } => StatusKey::Stopping,
            Self::Stopped { .. } => StatusKey::Stopped,
            Self::Destroyed { .. } => StatusKey::Destroyed,
            Self::SignalReady { .. } => StatusKey::SignalReady,
            Self::SignalSent { .. } => StatusKey::SignalSent,
        }
    }

    /// Returns the timestamp of the last transition.
    pub fn changed_time(&self) -> DateTime<Utc> {
        match self {
            Self::Booting { changed_time }
            | Self::Blocking { changed_time, .. }
            | Self::RunningReady { changed_time }
            | Self::Running { changed_time }
            | Self::Stopping { changed_time, .. }
            | Self::Stopped { changed_time }
            | Self::Destroyed { changed_time, .. }
            | Self::SignalReady { changed_time, .. }
            | Self::SignalSent { changed_time, .. } => *changed_time,
        }
    }
}

/// Observer capability for status-change notifications. The manager (and the
/// plugin registry behind it) registers one of these on every runner.
pub trait StatusObserver: Send + Sync {
    /// Called after every status transition with the new value.
    fn status_changed(&self, path: &Path, status: &RunnerStatus);
}

/// Point-in-time snapshot of a runner, safe to serialize over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerReport {
    /// Current status, if the runner has been started at least once.
    pub status: Option<RunnerStatus>,
    /// Service executable path.
    pub path: PathBuf,
    /// Effective arguments.
    pub args: Vec<String>,
    /// Effective environment.
    pub env: EnvMap,
    /// Effective restart budget.
    pub auto_restart: i64,
    /// Number of successful child spawns since creation.
    pub booted_num: u64,
    /// Path backing standard input.
    pub stdin: PathBuf,
    /// Path backing standard output.
    pub stdout: PathBuf,
    /// Path backing standard error.
    pub stderr: PathBuf,
}

#[derive(Default)]
struct StreamSet {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl StreamSet {
    fn close_all(&mut self) {
        self.stdin.take();
        self.stdout.take();
        self.stderr.take();
    }
}

/// One managed service. Exclusively owns its child process handle and the
/// three open stream files; its status is read by many concurrent observers.
pub struct Runner {
    path: PathBuf,
    config: Mutex<RunnerConfig>,
    child: Mutex<Option<Child>>,
    returncode: Mutex<Option<i32>>,
    booted_num: AtomicU64,
    blocked_num: AtomicU64,
    streams: Mutex<StreamSet>,
    status: Mutex<Option<RunnerStatus>>,
    observer: Mutex<Option<Arc<dyn StatusObserver>>>,
    monitor: Mutex<Option<(TaskId, Scheduler)>>,
    stop_step_wait: Mutex<Duration>,
}

impl Runner {
    /// Creates a runner from its resolved configuration. The runner starts
    /// with no status; `start` performs the first transition.
    pub fn new(path: PathBuf, config: RunnerConfig) -> Arc<Self> {
        Arc::new(Self {
            path,
            config: Mutex::new(config),
            child: Mutex::new(None),
            returncode: Mutex::new(None),
            booted_num: AtomicU64::new(0),
            blocked_num: AtomicU64::new(0),
            streams: Mutex::new(StreamSet::default()),
            status: Mutex::new(None),
            observer: Mutex::new(None),
            monitor: Mutex::new(None),
            stop_step_wait: Mutex::new(STOP_STEP_WAIT),
        })
    }

    /// Service executable path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the effective configuration.
    pub fn config_snapshot(&self) -> RunnerConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of successful spawns since creation.
    pub fn booted_num(&self) -> u64 {
        self.booted_num.load(Ordering::SeqCst)
    }

    /// Number of blocker delays honored since creation.
    pub fn blocked_num(&self) -> u64 {
        self.blocked_num.load(Ordering::SeqCst)
    }

    /// Exit code of the most recently reaped child.
    pub fn returncode(&self) -> Option<i32> {
        *self.returncode.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers the status observer (replacing any previous one).
    pub fn set_observer(&self, observer: Arc<dyn StatusObserver>) {
        *self.observer.lock().unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    /// Overrides the escalation step wait. Test hook.
    #[doc(hidden)]
    pub fn set_stop_step_wait(&self, wait: Duration) {
        *self.stop_step_wait.lock().unwrap_or_else(|e| e.into_inner()) = wait;
    }

    /// Current status value, if any.
    pub fn status(&self) -> Option<RunnerStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Builds a serializable snapshot of this runner.
    pub fn status_snapshot(&self) -> RunnerReport {
        let config = self.config_snapshot();
        RunnerReport {
            status: self.status(),
            path: self.path.clone(),
            args: config.args,
            env: config.env,
            auto_restart: config.auto_restart,
            booted_num: self.booted_num(),
            stdin: config.stdin,
            stdout: config.stdout,
            stderr: config.stderr,
        }
    }

    /// True iff a child handle exists and has not yet reported an exit.
    pub fn is_running(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    *self.returncode.lock().unwrap_or_else(|e| e.into_inner()) =
                        status.code();
                    false
                }
                Ok(None) => true,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// True while a monitor task is registered for this runner.
    pub fn has_monitor(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// PID of the live child, if any.
    pub fn child_id(&self) -> Option<u32> {
        self.child
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Child::id)
    }

    /// Transitions to `BOOTING` and registers the monitor task on the
    /// scheduler. Legal only when no live child exists.
    pub fn start(
        self: &Arc<Self>,
        scheduler: &Scheduler,
    ) -> Result<(), SupervisorError> {
        if self.is_running() {
            return Err(SupervisorError::runner(format!(
                "{} is already running",
                self.path.display()
            )));
        }
        {
            let monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
            if monitor.is_some() {
                return Err(SupervisorError::runner(format!(
                    "{} already has an active monitor",
                    self.path.display()
                )));
            }
        }

        self.transition(RunnerStatus::Booting {
            changed_time: Utc::now(),
        })?;

        let runner = Arc::clone(self);
        let label = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "runner".into());
        let task_id = scheduler.spawn(&label, move |token| {
            runner.monitor(token);
        })?;
        *self.monitor.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((task_id, scheduler.clone()));
        info!("started monitor for {}", self.path.display());
        Ok(())
    }

    /// The monitored run loop. Spawns (and respawns) the child until the
    /// restart budget is exhausted or the task is cancelled.
    fn monitor(self: Arc<Self>, token: CancelToken) {
        let auto_restart = self.config_snapshot().auto_restart;
        // "Bump by one": the budget counts spawns, so auto_restart restarts
        // plus the initial launch. -1 stays infinite.
        let mut budget: i64 = if auto_restart < 0 { -1 } else { auto_restart + 1 };

        loop {
            if token.is_cancelled() {
                break;
            }

            if !self.is_running() {
                if budget == 0 {
                    break;
                }
                if let Err(err) = self.preroll_blockers(&token) {
                    self.record_error(err.to_string());
                    break;
                }
                if token.is_cancelled() {
                    break;
                }
                match self.spawn_child() {
                    Ok(()) => {
                        if budget > 0 {
                            budget -= 1;
                        }
                    }
                    Err(err) => {
                        warn!("{}: spawn failed: {err}", self.path.display());
                        self.record_error(err.to_string());
                        break;
                    }
                }
            } else if matches!(
                self.status().map(|s| s.key()),
                Some(StatusKey::SignalSent)
            ) {
                // Signal round-trip complete; settle back into RUNNING.
                let _ = self.transition(RunnerStatus::Running {
                    changed_time: Utc::now(),
                });
            }

            let interval = if budget > 0 {
                MONITOR_POLL_FAST
            } else {
                MONITOR_POLL_SLOW
            };
            if !token.sleep(interval) {
                break;
            }
            if !(budget > 0 || budget == -1) {
                break;
            }
        }

        *self.monitor.lock().unwrap_or_else(|e| e.into_inner()) = None;
        debug!("monitor for {} exited", self.path.display());
    }

    /// Collects the blocker list (a sibling `blocker` file, or every file of
    /// a sibling `blocker` directory) and executes each probe, honoring the
    /// delay hint on its stdout and retrying on non-zero exit.
    fn preroll_blockers(&self, token: &CancelToken) -> Result<(), SupervisorError> {
        let Some(parent) = self.path.parent() else {
            return Ok(());
        };
        let blocker_path = parent.join(BLOCKER_FILE_NAME);
        let block_list: Vec<PathBuf> = if blocker_path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&blocker_path)
                .map(|iter| {
                    iter.flatten()
                        .map(|entry| entry.path())
                        .filter(|path| path.is_file())
                        .collect()
                })
                .unwrap_or_default();
            entries.sort();
            entries
        } else if blocker_path.is_file() {
            vec![blocker_path]
        } else {
            return Ok(());
        };

        if block_list.is_empty() {
            return Ok(());
        }

        self.transition(RunnerStatus::Blocking {
            changed_time: Utc::now(),
            block_list: block_list.clone(),
            blocked_program: None,
            blocked_time: None,
            blocked_run_num: 0,
        })?;

        for blocker in &block_list {
            loop {
                if token.is_cancelled() {
                    return Ok(());
                }
                self.set_blocking_program(blocker);

                let output = self.run_blocker(blocker, token)?;
                let Some((exit_ok, stdout)) = output else {
                    // Cancelled while the probe was executing.
                    return Ok(());
                };

                if !exit_ok {
                    self.bump_blocked_run_num();
                    continue;
                }

                if let Ok(delay) = stdout.trim().parse::<i64>()
                    && delay > 0
                {
                    debug!(
                        "{}: blocker {:?} requested {delay}s delay",
                        self.path.display(),
                        blocker
                    );
                    if !token.sleep(Duration::from_secs(delay as u64)) {
                        return Ok(());
                    }
                    self.blocked_num.fetch_add(1, Ordering::SeqCst);
                }
                break;
            }
        }
        Ok(())
    }

    /// Runs one blocker probe to completion, polling for cancellation.
    /// Returns `None` when cancelled, otherwise `(exited_zero, stdout)`.
    fn run_blocker(
        &self,
        blocker: &Path,
        token: &CancelToken,
    ) -> Result<Option<(bool, String)>, SupervisorError> {
        let config = self.config_snapshot();
        let cwd = blocker.parent().unwrap_or(Path::new("/"));
        let mut child = Command::new(blocker)
            .args(&config.args)
            .env_clear()
            .envs(config.env.iter())
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                SupervisorError::runner(format!(
                    "failed to run blocker {:?}: {err}",
                    blocker
                ))
            })?;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let mut stdout = String::new();
                    if let Some(mut pipe) = child.stdout.take() {
                        let _ = pipe.read_to_string(&mut stdout);
                    }
                    return Ok(Some((status.success(), stdout)));
                }
                Ok(None) => {
                    if !token.sleep(STOP_POLL_INTERVAL) {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Ok(None);
                    }
                }
                Err(err) => {
                    return Err(SupervisorError::runner(format!(
                        "failed waiting for blocker {:?}: {err}",
                        blocker
                    )));
                }
            }
        }
    }

    /// Opens the stream files and launches the child. Transitions through
    /// `RUNNING_READY` into `RUNNING` and bumps `booted_num`.
    fn spawn_child(&self) -> Result<(), SupervisorError> {
        self.transition(RunnerStatus::RunningReady {
            changed_time: Utc::now(),
        })?;

        let config = self.config_snapshot();
        let stdin = open_stdin(&config.stdin)?;
        let stdout = open_append(&config.stdout)?;
        let stderr = open_append(&config.stderr)?;

        let cwd = self.path.parent().unwrap_or(Path::new("/"));
        let child = Command::new(&self.path)
            .args(&config.args)
            .env_clear()
            .envs(config.env.iter())
            .current_dir(cwd)
            .stdin(Stdio::from(stdin.try_clone()?))
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?))
            .spawn()
            .map_err(|err| {
                SupervisorError::runner(format!(
                    "failed to start {}: {err}",
                    self.path.display()
                ))
            })?;

        {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            streams.stdin = Some(stdin);
            streams.stdout = Some(stdout);
            streams.stderr = Some(stderr);
        }
        *self.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
        self.booted_num.fetch_add(1, Ordering::SeqCst);

        self.transition(RunnerStatus::Running {
            changed_time: Utc::now(),
        })?;
        info!("{} spawned (boot #{})", self.path.display(), self.booted_num());
        Ok(())
    }

    /// Stops the runner: cancels the monitor, escalates shutdown on a live
    /// child, closes streams, and transitions to `STOPPED` then `DESTROYED`.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let running = self.is_running();
        if !running && monitor.is_none() {
            return Err(SupervisorError::runner(format!(
                "{} is not running",
                self.path.display()
            )));
        }

        if let Some((task_id, scheduler)) = monitor {
            scheduler.cancel(task_id);
        }

        self.transition(RunnerStatus::Stopping {
            changed_time: Utc::now(),
            shutdown_command: None,
            error: None,
        })?;

        let kill_error = if running {
            self.escalate_shutdown()
        } else {
            None
        };

        // Streams are closed only after the child has exited (or the
        // escalation gave up on it).
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close_all();

        self.transition(RunnerStatus::Stopped {
            changed_time: Utc::now(),
        })?;
        self.transition(RunnerStatus::Destroyed {
            changed_time: Utc::now(),
            error: kill_error.clone(),
        })?;

        match kill_error {
            Some(message) => Err(SupervisorError::runner(message)),
            None => {
                info!("{} stopped", self.path.display());
                Ok(())
            }
        }
    }

    /// Drives the three-step escalation: terminate, kill, force kill, with a
    /// wait between each step. Returns the error message on failure.
    fn escalate_shutdown(&self) -> Option<String> {
        let wait = *self.stop_step_wait.lock().unwrap_or_else(|e| e.into_inner());

        self.record_shutdown_command("SIGTERM");
        self.send_terminate();
        if self.wait_for_exit(wait) {
            return None;
        }

        self.record_shutdown_command("SIGKILL");
        self.send_kill();
        if self.wait_for_exit(wait) {
            return None;
        }

        self.record_shutdown_command("FORCE_KILL");
        self.send_force_kill();
        if self.wait_for_exit(wait) {
            return None;
        }

        let message = format!("kill_fail: {} survived escalation", self.path.display());
        warn!("{message}");
        self.record_stopping_error(&message);
        Some(message)
    }

    fn send_terminate(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.child_id() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        self.send_kill();
    }

    fn send_kill(&self) {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = child.as_mut() {
            let _ = child.kill();
        }
    }

    fn send_force_kill(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.child_id() {
            // The child may lead its own process group; sweep it if so.
            let _ = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        #[cfg(windows)]
        if let Some(pid) = self.child_id() {
            let _ = Command::new("taskkill")
                .args(["/F", "/T", "/PID", &pid.to_string()])
                .status();
        }
    }

    /// Polls the child for an exit for up to `wait`. Returns `true` once the
    /// child is gone.
    fn wait_for_exit(&self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            if !self.is_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
    }

    /// Delivers `signal` to the live child via the `SIGNAL_READY` →
    /// `SIGNAL_SENT` round-trip.
    pub fn send_signal(&self, signal: i32) -> Result<(), SupervisorError> {
        if !self.is_running() {
            return Err(SupervisorError::runner(format!(
                "{} is not running",
                self.path.display()
            )));
        }

        self.transition(RunnerStatus::SignalReady {
            changed_time: Utc::now(),
            signal,
        })?;
        self.deliver_signal(signal)?;
        self.transition(RunnerStatus::SignalSent {
            changed_time: Utc::now(),
            signal,
        })?;
        Ok(())
    }

    #[cfg(unix)]
    fn deliver_signal(&self, signal: i32) -> Result<(), SupervisorError> {
        let pid = self.child_id().ok_or_else(|| {
            SupervisorError::runner(format!("{} is not running", self.path.display()))
        })?;
        let sig = Signal::try_from(signal)
            .map_err(|err| SupervisorError::runner(format!("invalid signal {signal}: {err}")))?;
        signal::kill(Pid::from_raw(pid as i32), sig).map_err(|err| {
            SupervisorError::runner(format!(
                "failed to signal {}: {err}",
                self.path.display()
            ))
        })
    }

    #[cfg(not(unix))]
    fn deliver_signal(&self, signal: i32) -> Result<(), SupervisorError> {
        // Only termination semantics are portable off unix.
        match signal {
            9 | 15 => {
                self.send_kill();
                Ok(())
            }
            other => Err(SupervisorError::runner(format!(
                "signal {other} is not supported on this platform"
            ))),
        }
    }

    /// Swaps the stdin backing file: the new path is opened append-read and
    /// rewound, the old handle is closed.
    pub fn set_stdin(&self, path: &Path) -> Result<(), SupervisorError> {
        let file = open_stdin(path)?;
        self.streams.lock().unwrap_or_else(|e| e.into_inner()).stdin = Some(file);
        self.config.lock().unwrap_or_else(|e| e.into_inner()).stdin = path.to_path_buf();
        Ok(())
    }

    /// Swaps the stdout backing file: the new path is opened append, the old
    /// handle is closed.
    pub fn set_stdout(&self, path: &Path) -> Result<(), SupervisorError> {
        let file = open_append(path)?;
        self.streams.lock().unwrap_or_else(|e| e.into_inner()).stdout = Some(file);
        self.config.lock().unwrap_or_else(|e| e.into_inner()).stdout = path.to_path_buf();
        Ok(())
    }

    /// Swaps the stderr backing file: the new path is opened append, the old
    /// handle is closed.
    pub fn set_stderr(&self, path: &Path) -> Result<(), SupervisorError> {
        let file = open_append(path)?;
        self.streams.lock().unwrap_or_else(|e| e.into_inner()).stderr = Some(file);
        self.config.lock().unwrap_or_else(|e| e.into_inner()).stderr = path.to_path_buf();
        Ok(())
    }

    /// Replaces args/env wholesale (used by reload before a restart).
    pub fn set_args_env(&self, args: Vec<String>, env: EnvMap) {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        config.args = args;
        config.env = env;
    }

    /// Performs a status transition, rejecting re-entry into the current key
    /// and any transition out of `DESTROYED`.
    fn transition(&self, new: RunnerStatus) -> Result<(), SupervisorError> {
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(current) = status.as_ref() {
                if current.key() == new.key() {
                    return Err(SupervisorError::runner(format!(
                        "{}: redundant transition to {}",
                        self.path.display(),
                        new.key()
                    )));
                }
                if current.key() == StatusKey::Destroyed {
                    return Err(SupervisorError::runner(format!(
                        "{} is destroyed",
                        self.path.display()
                    )));
                }
            }
            debug!("{}: status -> {}", self.path.display(), new.key());
            *status = Some(new.clone());
        }
        self.notify(&new);
        Ok(())
    }

    fn notify(&self, status: &RunnerStatus) {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer.status_changed(&self.path, status);
        }
    }

    /// Updates the probe bookkeeping of an in-flight `BLOCKING` status.
    fn set_blocking_program(&self, program: &Path) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(RunnerStatus::Blocking {
            blocked_program,
            blocked_time,
            ..
        }) = status.as_mut()
        {
            *blocked_program = Some(program.to_path_buf());
            *blocked_time = Some(Utc::now());
        }
    }

    fn bump_blocked_run_num(&self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(RunnerStatus::Blocking {
            blocked_run_num, ..
        }) = status.as_mut()
        {
            *blocked_run_num += 1;
        }
    }

    fn record_shutdown_command(&self, command: &str) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(RunnerStatus::Stopping {
            shutdown_command, ..
        }) = status.as_mut()
        {
            *shutdown_command = Some(command.to_string());
        }
    }

    fn record_stopping_error(&self, message: &str) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(RunnerStatus::Stopping { error, .. }) = status.as_mut() {
            *error = Some(message.to_string());
        }
    }

    /// Surfaces a monitor-task failure on the status.
    fn record_error(&self, message: String) {
        let destroyed = {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            match status.as_mut() {
                Some(RunnerStatus::Destroyed { error, .. }) => {
                    *error = Some(message.clone());
                    true
                }
                _ => false,
            }
        };
        if !destroyed {
            let _ = self.transition(RunnerStatus::Destroyed {
                changed_time: Utc::now(),
                error: Some(message),
            });
        }
    }
}

/// Opens a stream file append-read and rewinds it to the start.
fn open_stdin(path: &Path) -> Result<File, SupervisorError> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

/// Opens a stream file for appending, creating it if missing.
fn open_append(path: &Path) -> Result<File, SupervisorError> {
    Ok(OpenOptions::new().append(true).create(true).open(path)?)
}

/// Asks the OS whether a process with `pid` is currently alive.
pub fn os_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    let target = sysinfo::Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system.process(target).is_some()
}
