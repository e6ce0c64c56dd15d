//! Shared scheduler hosting the per-runner monitor tasks.
//!
//! Each task runs on its own named worker thread and receives a
//! [`CancelToken`] that it must consult at every suspension point. The
//! scheduler keeps a registry of live tasks so the daemon can cancel and
//! join all of them during shutdown before resources are released.
use std::{
    collections::HashMap,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, warn};

use crate::error::SupervisorError;

/// Identifier of a scheduled task.
pub type TaskId = u64;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

/// Cooperative cancellation token handed to every scheduled task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancels the token and wakes any sleeper immediately.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        self.inner.condvar.notify_all();
    }

    /// Sleeps for `duration` unless cancelled first. Returns `true` when the
    /// full duration elapsed and `false` when the sleep was interrupted by
    /// cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = std::time::Instant::now() + duration;
        while !*cancelled {
            let now = std::time::Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _timeout) = self
                .inner
                .condvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            cancelled = guard;
        }
        false
    }
}

struct TaskEntry {
    label: String,
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    next_id: AtomicU64,
    accepting: AtomicBool,
}

/// Registry of cancellable worker tasks shared by the manager and daemon.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates an empty scheduler that accepts new tasks.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Spawns a cancellable task on a named worker thread and registers it.
    pub fn spawn<F>(&self, label: &str, task: F) -> Result<TaskId, SupervisorError>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(SupervisorError::runner_manager(
                "scheduler is shut down; refusing new task",
            ));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancelToken::new();
        {
            let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.insert(
                id,
                TaskEntry {
                    label: label.to_string(),
                    token: token.clone(),
                    handle: None,
                },
            );
        }

        let inner = Arc::clone(&self.inner);
        let thread_token = token.clone();
        let thread_name = format!("task-{id}-{label}");
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                task(thread_token);
                let mut tasks = inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
                // Dropping the handle detaches an already-finished thread.
                tasks.remove(&id);
            })
            .map_err(SupervisorError::Io)?;

        let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = tasks.get_mut(&id) {
            entry.handle = Some(handle);
        }
        debug!("scheduled task {id} ({label})");
        Ok(id)
    }

    /// Cancels one task by id. Missing ids are ignored (the task already
    /// finished and removed itself).
    pub fn cancel(&self, id: TaskId) {
        let tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = tasks.get(&id) {
            debug!("cancelling task {id} ({})", entry.label);
            entry.token.cancel();
        }
    }

    /// Cancels every registered task without waiting for completion.
    pub fn cancel_all(&self) {
        let tokens: Vec<CancelToken> = {
            let tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.values().map(|entry| entry.token.clone()).collect()
        };
        for token in tokens {
            token.cancel();
        }
    }

    /// Number of tasks still registered.
    pub fn task_count(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Stops accepting new tasks, cancels every outstanding task, and joins
    /// their worker threads.
    pub fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let entries: Vec<TaskEntry> = {
            let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            entry.token.cancel();
        }
        for entry in entries {
            if let Some(handle) = entry.handle
                && let Err(err) = handle.join()
            {
                warn!("task '{}' panicked during shutdown: {err:?}", entry.label);
            }
        }
    }
}
