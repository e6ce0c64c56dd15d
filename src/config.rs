//! Hierarchical configuration resolver for runners.
//!
//! An effective [`RunnerConfig`] is assembled by layering, rightmost wins:
//! the built-in defaults, the shared default profile directory, and then the
//! `args`/`env`/`config` fragments of every ancestor directory from just
//! below the filesystem root down to the service's containing directory.
use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    constants::{ARGS_FILE_NAME, CONFIG_FILE_NAME, DEFAULT_AUTO_RESTART, ENV_FILE_NAME},
    envfile::{EnvMap, build_env},
    error::SupervisorError,
    paths::ancestor_dirs,
    runtime::runner_stream_dir,
};

/// Effective configuration of one runner. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Arguments passed to the service executable.
    pub args: Vec<String>,
    /// Environment of the service child.
    pub env: EnvMap,
    /// Restart budget: `0` disables restarts, `-1` restarts forever.
    pub auto_restart: i64,
    /// Path backing the child's standard input.
    pub stdin: PathBuf,
    /// Path backing the child's standard output.
    pub stdout: PathBuf,
    /// Path backing the child's standard error.
    pub stderr: PathBuf,
}

impl RunnerConfig {
    /// Built-in defaults for a service: no args, empty environment, a single
    /// restart, and stream files under the runner tmp root.
    pub fn builtin(service_path: &Path, tmp_root: &Path) -> Self {
        let stream_dir = runner_stream_dir(tmp_root, service_path);
        Self {
            args: Vec::new(),
            env: EnvMap::new(),
            auto_restart: DEFAULT_AUTO_RESTART,
            stdin: stream_dir.join("in"),
            stdout: stream_dir.join("log"),
            stderr: stream_dir.join("log"),
        }
    }
}

/// Resolves the effective configuration for `service_path`.
///
/// Layer order (rightmost wins per key): built-in defaults, the default
/// profile directory, then every ancestor directory of the service from the
/// top of the tree down to its containing directory.
pub fn resolve(
    service_path: &Path,
    default_profile: &Path,
    tmp_root: &Path,
) -> Result<RunnerConfig, SupervisorError> {
    let mut config = RunnerConfig::builtin(service_path, tmp_root);

    if default_profile.is_dir() {
        apply_layer(&mut config, default_profile)?;
    }

    let mut layers = ancestor_dirs(service_path);
    layers.reverse();
    for dir in layers {
        apply_layer(&mut config, &dir)?;
    }

    Ok(config)
}

/// Applies the `args`, `env`, and `config` fragments of one directory layer.
fn apply_layer(config: &mut RunnerConfig, dir: &Path) -> Result<(), SupervisorError> {
    let args_path = dir.join(ARGS_FILE_NAME);
    if args_path.is_file() {
        debug!("applying args layer {:?}", args_path);
        let contents = fs::read_to_string(&args_path)?;
        for raw_token in contents.lines() {
            let token = raw_token.trim();
            if token.is_empty() {
                continue;
            }
            merge_arg_token(&mut config.args, token);
        }
    }

    let env_path = dir.join(ENV_FILE_NAME);
    if env_path.is_file() {
        debug!("applying env layer {:?}", env_path);
        config.env = build_env(&config.env, Some(&env_path))?;
    }

    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.is_file() {
        debug!("applying config layer {:?}", config_path);
        apply_config_file(config, &config_path)?;
    }

    Ok(())
}

/// Merges one argument token into the accumulated list.
///
/// `-*` clears the list. `-X` strips a prior `X` if present, otherwise a
/// prior `-X` (so a repeated flag toggles off), otherwise the token itself is
/// appended so ordinary dash-flags remain expressible. Anything else appends.
fn merge_arg_token(args: &mut Vec<String>, token: &str) {
    if token == "-*" {
        args.clear();
        return;
    }
    if let Some(stripped) = token.strip_prefix('-') {
        if let Some(pos) = args.iter().position(|existing| existing == stripped) {
            args.remove(pos);
            return;
        }
        if let Some(pos) = args.iter().position(|existing| existing == token) {
            args.remove(pos);
            return;
        }
    }
    args.push(token.to_string());
}

/// Applies the line-oriented directives of one `config` file.
///
/// Recognized keys: `auto_restart`, `stdin`, `stdout`, `stderr`. `KEY=VALUE`
/// sets the key; `-auto_restart` sets the budget to zero; a `-` stream
/// directive leaves the value inherited from the enclosing layer untouched.
fn apply_config_file(config: &mut RunnerConfig, path: &Path) -> Result<(), SupervisorError> {
    let contents = fs::read_to_string(path)?;
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(key) = line.strip_prefix('-') {
            match key {
                "auto_restart" => config.auto_restart = 0,
                "stdin" | "stdout" | "stderr" => {
                    // Disable overrides revert to the enclosing layer's value,
                    // never to the built-in default.
                }
                other => {
                    return Err(SupervisorError::runner_config(format!(
                        "unknown config key '-{other}' in {path:?}"
                    )));
                }
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(SupervisorError::runner_config(format!(
                "malformed config line '{line}' in {path:?}"
            )));
        };

        match key.trim() {
            "auto_restart" => {
                config.auto_restart = value.trim().parse::<i64>().map_err(|_| {
                    SupervisorError::runner_config(format!(
                        "auto_restart expects a decimal integer, got '{}' in {path:?}",
                        value.trim()
                    ))
                })?;
            }
            "stdin" => config.stdin = PathBuf::from(value.trim()),
            "stdout" => config.stdout = PathBuf::from(value.trim()),
            "stderr" => config.stderr = PathBuf::from(value.trim()),
            other => {
                return Err(SupervisorError::runner_config(format!(
                    "unknown config key '{other}' in {path:?}"
                )));
            }
        }
    }
    Ok(())
}
