//! Error handling for justrun.
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Severity attached to every core-originated error.
///
/// The daemon logs the message at this level and the client uses it to decide
/// its exit behaviour: anything below `Warning` is a notice, not a failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Diagnostic detail only.
    Debug,
    /// Expected condition (e.g. enabling an already-enabled entry).
    Info,
    /// Something went wrong but the operation is recoverable.
    Warning,
    /// Operation failed.
    Error,
}

/// Defines all possible errors that can occur in the supervisor core.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Malformed line in an `args`/`env`/`config` file, or an unknown config key.
    #[error("{message}")]
    RunnerConfig {
        /// Human-readable description of the malformed input.
        message: String,
        /// Severity steering logging and client exit behaviour.
        severity: Severity,
    },

    /// Runner-lifecycle precondition violation (stop when not running,
    /// redundant state transition, signal when not running).
    #[error("{message}")]
    Runner {
        /// Human-readable description of the violated precondition.
        message: String,
        /// Severity steering logging and client exit behaviour.
        severity: Severity,
    },

    /// Invariant violation inside the manager (e.g. path not in the table).
    #[error("{message}")]
    RunnerManager {
        /// Human-readable description of the violated invariant.
        message: String,
        /// Severity steering logging and client exit behaviour.
        severity: Severity,
    },

    /// Roster precondition violation (not added, already enabled, not
    /// executable, broken entry).
    #[error("{message}")]
    ManagerConfig {
        /// Human-readable description of the roster precondition.
        message: String,
        /// Severity steering logging and client exit behaviour.
        severity: Severity,
    },

    /// Failure invoking the OS env-dump subprogram.
    #[error("{message}")]
    Env {
        /// Human-readable description of the spawn failure.
        message: String,
        /// Severity steering logging and client exit behaviour.
        severity: Severity,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Builds a `RunnerConfig` error with the default `error` severity.
    pub fn runner_config(message: impl Into<String>) -> Self {
        Self::RunnerConfig {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Builds a `Runner` error with the default `error` severity.
    pub fn runner(message: impl Into<String>) -> Self {
        Self::Runner {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Builds a `RunnerManager` error with the default `error` severity.
    pub fn runner_manager(message: impl Into<String>) -> Self {
        Self::RunnerManager {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Builds a `ManagerConfig` error with the default `error` severity.
    pub fn manager_config(message: impl Into<String>) -> Self {
        Self::ManagerConfig {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Builds a `ManagerConfig` error carrying `info` severity, used for
    /// redundant-but-harmless roster operations.
    pub fn manager_config_info(message: impl Into<String>) -> Self {
        Self::ManagerConfig {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    /// Builds an `Env` error with the default `error` severity.
    pub fn env(message: impl Into<String>) -> Self {
        Self::Env {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Returns the severity carried by this error.
    pub fn severity(&self) -> Severity {
        match self {
            Self::RunnerConfig { severity, .. }
            | Self::Runner { severity, .. }
            | Self::RunnerManager { severity, .. }
            | Self::ManagerConfig { severity, .. }
            | Self::Env { severity, .. } => *severity,
            Self::Io(_) => Severity::Error,
        }
    }
}
