//! Helpers for resolving the configuration directory and the paths derived
//! from it.
use std::{
    env,
    path::{Path, PathBuf},
    sync::{OnceLock, RwLock},
};

use crate::constants::{
    DEFAULT_PROFILE_DIR_NAME, LOCK_FILE_NAME, PASSWORD_FILE_NAME, ROSTER_FILE_NAME,
    RUNNER_TMP_DIR_NAME, TMP_DIR_NAME,
};

#[derive(Debug, Clone)]
struct RuntimeContext {
    config_dir: PathBuf,
}

static CONTEXT: OnceLock<RwLock<RuntimeContext>> = OnceLock::new();

fn context_lock() -> &'static RwLock<RuntimeContext> {
    CONTEXT.get_or_init(|| {
        RwLock::new(RuntimeContext {
            config_dir: default_config_dir(),
        })
    })
}

/// Returns the config directory used when the CLI does not pass `--config`:
/// `$HOME/.config/justrun` (or a path relative to the process root when HOME
/// is unset).
pub fn default_config_dir() -> PathBuf {
    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"));
    home.join(".config/justrun")
}

/// Points the global runtime context at the provided config directory.
/// Subsequent calls overwrite the active configuration, so different
/// invocations within one process (tests in particular) can re-anchor it.
pub fn init(config_dir: &Path) {
    let mut guard = context_lock().write().expect("runtime context poisoned");
    guard.config_dir = config_dir.to_path_buf();
}

/// Returns the active configuration directory.
pub fn config_dir() -> PathBuf {
    context_lock()
        .read()
        .expect("runtime context poisoned")
        .config_dir
        .clone()
}

/// Returns the roster file path (`<config_dir>/runner_list`).
pub fn roster_path() -> PathBuf {
    config_dir().join(ROSTER_FILE_NAME)
}

/// Returns the password file path (`<config_dir>/password`).
pub fn password_path() -> PathBuf {
    config_dir().join(PASSWORD_FILE_NAME)
}

/// Returns the default-profile directory (`<config_dir>/default`).
pub fn default_profile_dir() -> PathBuf {
    config_dir().join(DEFAULT_PROFILE_DIR_NAME)
}

/// Returns the runtime tmp directory (`<config_dir>/runtime_tmp`).
pub fn tmp_dir() -> PathBuf {
    config_dir().join(TMP_DIR_NAME)
}

/// Returns the daemon-singleton lock file path (`<tmp>/lock`).
pub fn lock_path() -> PathBuf {
    tmp_dir().join(LOCK_FILE_NAME)
}

/// Returns the root under which per-runner stream files live
/// (`<tmp>/runner`).
pub fn runner_tmp_root() -> PathBuf {
    tmp_dir().join(RUNNER_TMP_DIR_NAME)
}

/// Maps an absolute service path to its stream directory under the runner
/// tmp root (`<tmp>/runner/<service_path>/std`).
pub fn runner_stream_dir(tmp_root: &Path, service_path: &Path) -> PathBuf {
    let mut dir = tmp_root.to_path_buf();
    for component in service_path.components() {
        use std::path::Component;
        match component {
            Component::RootDir | Component::Prefix(_) => {}
            other => dir.push(other.as_os_str()),
        }
    }
    dir.join("std")
}
