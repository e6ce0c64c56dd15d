//! Constants and configuration values for the justrun daemon.
//!
//! This module centralizes the file names, default endpoints, and timing
//! values used throughout the supervisor.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Name of the roster file inside the config directory. One entry per line,
/// `PATH` for enabled-at-boot and `- PATH` for disabled-at-boot.
pub const ROSTER_FILE_NAME: &str = "runner_list";

/// Name of the password file inside the config directory. Raw bytes used as
/// the RPC shared secret.
pub const PASSWORD_FILE_NAME: &str = "password";

/// Name of the optional default-profile directory inside the config directory.
pub const DEFAULT_PROFILE_DIR_NAME: &str = "default";

/// Name of the runtime tmp directory inside the config directory.
pub const TMP_DIR_NAME: &str = "runtime_tmp";

/// Name of the daemon-singleton lock file inside the tmp directory.
pub const LOCK_FILE_NAME: &str = "lock";

/// Subdirectory of the tmp directory holding per-runner stream files.
pub const RUNNER_TMP_DIR_NAME: &str = "runner";

/// Per-service configuration file holding argument tokens, one per line.
pub const ARGS_FILE_NAME: &str = "args";

/// Per-service configuration file holding environment directives.
pub const ENV_FILE_NAME: &str = "env";

/// Per-service configuration file holding scalar overrides.
pub const CONFIG_FILE_NAME: &str = "config";

/// Blocker probe: a sibling file, or a directory of probe executables.
pub const BLOCKER_FILE_NAME: &str = "blocker";

/// Suffix appended to a service path to locate its down hook (`<path>.down`).
pub const DOWN_HOOK_SUFFIX: &str = "down";

// ============================================================================
// RPC Defaults
// ============================================================================

/// Default listen address for the control endpoint.
pub const DEFAULT_ADDRESS: &str = "localhost";

/// Default listen port for the control endpoint.
pub const DEFAULT_PORT: u16 = 50000;

/// Number of alphanumeric characters in a generated password file.
pub const PASSWORD_LENGTH: usize = 20;

/// Number of random bytes in an authentication challenge nonce.
pub const AUTH_NONCE_LENGTH: usize = 16;

// ============================================================================
// Runner Timing
// ============================================================================

/// Default restart budget when no configuration layer overrides it.
pub const DEFAULT_AUTO_RESTART: i64 = 1;

/// Monitor poll interval while the restart budget is positive.
pub const MONITOR_POLL_FAST: Duration = Duration::from_millis(100);

/// Monitor poll interval once the restart budget is exhausted or infinite.
pub const MONITOR_POLL_SLOW: Duration = Duration::from_secs(1);

/// Wait applied between each step of the shutdown escalation.
pub const STOP_STEP_WAIT: Duration = Duration::from_secs(5);

/// Interval at which escalation waits re-poll the child for an exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum time a down hook may run before it is stopped.
pub const DOWN_HOOK_WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Daemon Frame
// ============================================================================

/// Interval at which the daemon main thread re-checks the shutdown flag.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval at which a non-blocking accept loop sleeps when idle.
pub const ACCEPT_IDLE_INTERVAL: Duration = Duration::from_millis(50);
