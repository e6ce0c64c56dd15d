//! The manager: owns the keyed runner table, drives lifecycles on the shared
//! scheduler, persists the roster, and reports aggregate status.
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{Arc, Mutex},
    time::Instant,
};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::{
    config::{RunnerConfig, resolve},
    constants::{DOWN_HOOK_SUFFIX, DOWN_HOOK_WAIT, STOP_POLL_INTERVAL},
    error::SupervisorError,
    paths::prune_empty_parents,
    roster::RosterConfig,
    runner::{Runner, StatusObserver, os_process_alive},
    runtime::runner_stream_dir,
    sched::Scheduler,
};

/// One aggregate-status flag. Sets serialize in declaration order, which is
/// the boot / inited / running grouping the status report promises.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Display,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusFlag {
    /// Roster entry, started at boot.
    EnabledBoot,
    /// Roster entry, not started at boot.
    DisabledBoot,
    /// Present in the runner table.
    Inited,
    /// Not present in the runner table.
    NotInited,
    /// Child currently alive.
    Running,
    /// No live child.
    NotRunning,
    /// In the runner table but missing from the roster.
    InitedButNotSaved,
    /// Roster entry no longer refers to an executable regular file.
    Broken,
}

/// Aggregate status: one sorted flag set per known service path.
pub type StatusDict = BTreeMap<PathBuf, BTreeSet<StatusFlag>>;

/// Owns the runner table and the shared scheduler; dispatches every admin
/// operation of the daemon.
pub struct Manager {
    runners: Mutex<BTreeMap<PathBuf, Arc<Runner>>>,
    roster: RosterConfig,
    default_profile: PathBuf,
    tmp_root: PathBuf,
    scheduler: Scheduler,
    runit_compat: bool,
    observer: Mutex<Option<Arc<dyn StatusObserver>>>,
}

impl Manager {
    /// Creates a manager. `tmp_root` is the directory under which per-runner
    /// stream files are materialized.
    pub fn new(
        roster: RosterConfig,
        default_profile: PathBuf,
        tmp_root: PathBuf,
        scheduler: Scheduler,
        runit_compat: bool,
    ) -> Self {
        Self {
            runners: Mutex::new(BTreeMap::new()),
            roster,
            default_profile,
            tmp_root,
            scheduler,
            runit_compat,
            observer: Mutex::new(None),
        }
    }

    /// The roster backing this manager.
    pub fn roster(&self) -> &RosterConfig {
        &self.roster
    }

    /// The scheduler driving the monitor tasks.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Registers the observer handed to every runner created from now on.
    pub fn set_observer(&self, observer: Arc<dyn StatusObserver>) {
        *self.observer.lock().unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    /// Paths currently known to the manager: the roster union the table.
    pub fn known_paths(&self) -> Result<Vec<PathBuf>, SupervisorError> {
        let mut paths: BTreeSet<PathBuf> = self.roster.entries()?.into_keys().collect();
        let runners = self.runners.lock().unwrap_or_else(|e| e.into_inner());
        paths.extend(runners.keys().cloned());
        Ok(paths.into_iter().collect())
    }

    /// Starts every roster entry that is enabled at boot. Individual
    /// failures are logged and do not abort the bring-up.
    pub fn startup(&self) -> Result<(), SupervisorError> {
        for (path, enabled) in self.roster.entries()? {
            if !enabled {
                continue;
            }
            if let Err(err) = self.start_runner(&path, None) {
                warn!("boot start of {} failed: {err}", path.display());
            }
        }
        Ok(())
    }

    /// Builds (or accepts) a config, materializes the stream files, creates
    /// the runner, and starts it. A second start for a path already in the
    /// table delegates to [`Manager::reload_runner`].
    pub fn start_runner(
        &self,
        path: &Path,
        config: Option<RunnerConfig>,
    ) -> Result<(), SupervisorError> {
        let mut runners = self.runners.lock().unwrap_or_else(|e| e.into_inner());
        if runners.contains_key(path) {
            drop(runners);
            return self.reload_runner(path);
        }

        let config = match config {
            Some(config) => config,
            None => resolve(path, &self.default_profile, &self.tmp_root)?,
        };
        materialize_streams(&config)?;

        let runner = Runner::new(path.to_path_buf(), config);
        if let Some(observer) = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            runner.set_observer(observer);
        }
        runner.start(&self.scheduler)?;
        runners.insert(path.to_path_buf(), runner);
        info!("runner {} started", path.display());
        Ok(())
    }

    /// Runs the down hook if one exists, stops the runner (skippably when
    /// `check_running` is set and nothing is running), removes it from the
    /// table, and prunes now-empty stream directories.
    pub fn stop_runner(
        &self,
        path: &Path,
        check_running: bool,
    ) -> Result<(), SupervisorError> {
        let runner = self.get_runner(path)?;

        if let Some(hook) = self.find_down_hook(path) {
            run_down_hook(&hook);
        }

        let skip_stop = check_running && !runner.is_running() && !runner.has_monitor();
        if skip_stop {
            debug!("{} is not running; skipping stop", path.display());
        } else {
            match runner.stop() {
                Ok(()) => {}
                Err(err) if check_running => {
                    debug!("tolerated stop failure for {}: {err}", path.display());
                }
                Err(err) => return Err(err),
            }
        }

        self.runners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
        let stream_dir = runner_stream_dir(&self.tmp_root, path);
        let _ = prune_empty_parents(&stream_dir, &self.tmp_root);
        info!("runner {} removed", path.display());
        Ok(())
    }

    /// Stops (tolerating "not running") and then starts a service afresh.
    pub fn restart_runner(&self, path: &Path) -> Result<(), SupervisorError> {
        self.stop_runner(path, true)?;
        self.start_runner(path, None)
    }

    /// Diffs the live configuration against a freshly resolved one. Changed
    /// args or env on a running service force a stop/start; stream changes
    /// are hot-swapped without a restart.
    pub fn reload_runner(&self, path: &Path) -> Result<(), SupervisorError> {
        let runner = self.get_runner(path)?;
        let fresh = resolve(path, &self.default_profile, &self.tmp_root)?;
        let current = runner.config_snapshot();

        let core_changed = current.args != fresh.args || current.env != fresh.env;
        if core_changed && runner.is_running() {
            info!("{}: args/env changed; restarting", path.display());
            if let Err(err) = runner.stop() {
                debug!("reload stop for {}: {err}", path.display());
            }
            materialize_streams(&fresh)?;
            let replacement = Runner::new(path.to_path_buf(), fresh);
            if let Some(observer) = self
                .observer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
            {
                replacement.set_observer(observer);
            }
            replacement.start(&self.scheduler)?;
            self.runners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(path.to_path_buf(), replacement);
            return Ok(());
        }

        if core_changed {
            runner.set_args_env(fresh.args.clone(), fresh.env.clone());
        }
        if current.stdin != fresh.stdin {
            materialize_stream_file(&fresh.stdin)?;
            runner.set_stdin(&fresh.stdin)?;
        }
        if current.stdout != fresh.stdout {
            materialize_stream_file(&fresh.stdout)?;
            runner.set_stdout(&fresh.stdout)?;
        }
        if current.stderr != fresh.stderr {
            materialize_stream_file(&fresh.stderr)?;
            runner.set_stderr(&fresh.stderr)?;
        }
        debug!("{} reloaded in place", path.display());
        Ok(())
    }

    /// Looks up a runner; absent paths are a runner error.
    pub fn get_runner(&self, path: &Path) -> Result<Arc<Runner>, SupervisorError> {
        self.runners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .ok_or_else(|| {
                SupervisorError::runner(format!("{} is not found", path.display()))
            })
    }

    /// Builds the aggregate status: boot flag, inited flag, and running flag
    /// for every roster entry, plus `INITED_BUT_NOT_SAVED` for table entries
    /// missing from the roster. Broken roster entries are flagged as such.
    pub fn get_runner_status_dict(&self) -> Result<StatusDict, SupervisorError> {
        let entries = self.roster.entries()?;
        let snapshot: BTreeMap<PathBuf, Arc<Runner>> = self
            .runners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut dict = StatusDict::new();
        for (path, enabled) in &entries {
            let mut flags = BTreeSet::new();
            flags.insert(if *enabled {
                StatusFlag::EnabledBoot
            } else {
                StatusFlag::DisabledBoot
            });
            match snapshot.get(path) {
                Some(runner) => {
                    flags.insert(StatusFlag::Inited);
                    flags.insert(running_flag(runner));
                }
                None => {
                    flags.insert(StatusFlag::NotInited);
                    flags.insert(StatusFlag::NotRunning);
                }
            }
            if self.roster.check(path).is_err() {
                flags.insert(StatusFlag::Broken);
            }
            dict.insert(path.clone(), flags);
        }

        for (path, runner) in &snapshot {
            if entries.contains_key(path) {
                continue;
            }
            let mut flags = BTreeSet::new();
            flags.insert(StatusFlag::InitedButNotSaved);
            flags.insert(running_flag(runner));
            dict.insert(path.clone(), flags);
        }

        Ok(dict)
    }

    /// Reaps every non-running runner from the table, deletes its stream
    /// directories, and returns the reaped paths.
    pub fn clean_runner(&self) -> Result<Vec<PathBuf>, SupervisorError> {
        let snapshot: BTreeMap<PathBuf, Arc<Runner>> = self
            .runners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut reaped = Vec::new();
        for (path, runner) in snapshot {
            if runner.is_running() || runner.has_monitor() {
                continue;
            }
            self.runners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&path);
            let stream_dir = runner_stream_dir(&self.tmp_root, &path);
            if stream_dir.exists() {
                let _ = fs::remove_dir_all(&stream_dir);
            }
            if let Some(parent) = stream_dir.parent() {
                let _ = prune_empty_parents(parent, &self.tmp_root);
            }
            info!("reaped {}", path.display());
            reaped.push(path);
        }
        Ok(reaped)
    }

    /// Stops every runner (tolerating "already stopped") and shuts the
    /// scheduler down, joining the loop before returning.
    pub fn shutdown(&self) {
        let paths: Vec<PathBuf> = self
            .runners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for path in paths {
            if let Err(err) = self.stop_runner(&path, true) {
                warn!("shutdown stop of {} failed: {err}", path.display());
            }
        }
        self.scheduler.shutdown();
        info!("manager shut down");
    }

    /// Locates the down hook for a service: a sibling `<path>.down`, or (in
    /// runit compatibility mode, when the service file is not itself named
    /// `down`) a sibling `down` file.
    fn find_down_hook(&self, path: &Path) -> Option<PathBuf> {
        let mut named: OsString = path.as_os_str().to_os_string();
        named.push(".");
        named.push(DOWN_HOOK_SUFFIX);
        let named = PathBuf::from(named);
        if hook_is_valid(&named) {
            return Some(named);
        }

        if self.runit_compat
            && path.file_name().is_some_and(|name| name != DOWN_HOOK_SUFFIX)
            && let Some(parent) = path.parent()
        {
            let sibling = parent.join(DOWN_HOOK_SUFFIX);
            if hook_is_valid(&sibling) {
                return Some(sibling);
            }
        }
        None
    }
}

fn running_flag(runner: &Arc<Runner>) -> StatusFlag {
    let alive = runner.is_running()
        && runner.child_id().map(os_process_alive).unwrap_or(false);
    if alive {
        StatusFlag::Running
    } else {
        StatusFlag::NotRunning
    }
}

/// Checks that a down-hook candidate is an executable regular file.
fn hook_is_valid(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Runs a down hook as a blocking pre-stop step: wait up to the hook budget
/// for it to finish, then stop it.
fn run_down_hook(hook: &Path) {
    info!("running down hook {:?}", hook);
    let cwd = hook.parent().unwrap_or(Path::new("/"));
    let child = Command::new(hook)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(err) => {
            warn!("down hook {:?} failed to start: {err}", hook);
            return;
        }
    };

    let deadline = Instant::now() + DOWN_HOOK_WAIT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() >= deadline => {
                warn!("down hook {:?} overran its budget; stopping it", hook);
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            Ok(None) => std::thread::sleep(STOP_POLL_INTERVAL),
            Err(err) => {
                warn!("down hook {:?} wait failed: {err}", hook);
                return;
            }
        }
    }
}

/// Creates the parent directories of every stream path and touches the
/// files so the runner can open them.
fn materialize_streams(config: &RunnerConfig) -> Result<(), SupervisorError> {
    materialize_stream_file(&config.stdin)?;
    materialize_stream_file(&config.stdout)?;
    materialize_stream_file(&config.stderr)?;
    Ok(())
}

fn materialize_stream_file(path: &Path) -> Result<(), SupervisorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        fs::File::create(path)?;
    }
    Ok(())
}
