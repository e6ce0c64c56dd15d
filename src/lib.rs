//! A simple yet extensible cross-platform service supervisor.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
use libc as _;
#[cfg(test)]
use predicates as _;
use strum as _;
use tracing_subscriber as _;

/// CLI parsing.
pub mod cli;

/// Hierarchical config resolver.
pub mod config;

/// Constants.
pub mod constants;

/// Daemon frame.
pub mod daemon;

/// Environment builder.
pub mod envfile;

/// Errors.
pub mod error;

/// Authenticated control channel.
pub mod ipc;

/// Runner manager.
pub mod manager;

/// Path utilities.
pub mod paths;

/// Plugin registry.
pub mod plugin;

/// Roster persistence.
pub mod roster;

/// Service runner.
pub mod runner;

/// Config-dir paths.
pub mod runtime;

/// Shared scheduler.
pub mod sched;

/// Test utils.
#[doc(hidden)]
pub mod test_utils;
