//! Typed plugin registry: the daemon's extension points.
//!
//! Extensions are registered programmatically before the daemon starts and
//! receive callbacks at fixed points (runner status changes, daemon start
//! and shutdown). There is no dynamic code loading.
use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use tracing::info;

use crate::runner::{RunnerStatus, StatusObserver};

/// Daemon lifecycle extension point.
pub trait DaemonHook: Send + Sync {
    /// Called once the daemon frame is assembled, before boot services start.
    fn on_start(&self) {}
    /// Called during orderly shutdown, before the manager stops.
    fn on_shutdown(&self) {}
}

/// Holds every registered extension and fans callbacks out to them.
#[derive(Default)]
pub struct PluginRegistry {
    observers: Mutex<Vec<Arc<dyn StatusObserver>>>,
    hooks: Mutex<Vec<Arc<dyn DaemonHook>>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in extensions: a tracing observer
    /// that logs every status transition.
    pub fn with_defaults() -> Arc<Self> {
        let registry = Arc::new(Self::new());
        registry.register_observer(Arc::new(TracingObserver));
        registry
    }

    /// Registers a runner status observer.
    pub fn register_observer(&self, observer: Arc<dyn StatusObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Registers a daemon lifecycle hook.
    pub fn register_hook(&self, hook: Arc<dyn DaemonHook>) {
        self.hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    /// Fires `on_start` on every registered hook.
    pub fn fire_on_start(&self) {
        let hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for hook in hooks {
            hook.on_start();
        }
    }

    /// Fires `on_shutdown` on every registered hook.
    pub fn fire_on_shutdown(&self) {
        let hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for hook in hooks {
            hook.on_shutdown();
        }
    }
}

impl StatusObserver for PluginRegistry {
    fn status_changed(&self, path: &Path, status: &RunnerStatus) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer.status_changed(path, status);
        }
    }
}

/// Built-in observer that mirrors status transitions into the log.
struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn status_changed(&self, path: &Path, status: &RunnerStatus) {
        info!("{}: {}", path.display(), status.key());
    }
}
