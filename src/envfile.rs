//! Environment builder: composes a final environment map from a base map and
//! the directives of an `env` file.
use std::{
    collections::BTreeMap,
    env, fs,
    path::Path,
    process::{Command, Stdio},
};

use tracing::{debug, warn};

use crate::error::SupervisorError;

/// Ordered mapping from variable name to value. Key collisions resolve by
/// right-biased merge: the later source wins.
pub type EnvMap = BTreeMap<String, String>;

/// Builds the effective environment for a runner.
///
/// Directives are read line by line from `env_file` when it exists (a missing
/// file is not an error):
///
/// - `+NAME` imports `NAME` from the host environment.
/// - `+*` unions the host environment underneath the accumulated map (values
///   already present win).
/// - `-NAME` marks `NAME` for removal from the final result.
/// - `-*` short-circuits to the empty map.
/// - any other line is passed as an argument to the OS env-dump subprogram,
///   whose `KEY=VALUE` output is merged into the result. The accumulated map
///   is the child environment of that subprogram.
pub fn build_env(base: &EnvMap, env_file: Option<&Path>) -> Result<EnvMap, SupervisorError> {
    let mut result = base.clone();
    let mut removals: Vec<String> = Vec::new();
    let mut dump_args: Vec<String> = Vec::new();

    if let Some(path) = env_file {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no env file at {:?}", path);
                String::new()
            }
            Err(err) => return Err(err.into()),
        };

        for raw_line in contents.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "-*" {
                return Ok(EnvMap::new());
            }
            if line == "+*" {
                for (key, value) in env::vars() {
                    result.entry(key).or_insert(value);
                }
            } else if let Some(name) = line.strip_prefix('+') {
                match env::var(name) {
                    Ok(value) => {
                        result.insert(name.to_string(), value);
                    }
                    Err(_) => warn!("env import +{name}: not set in host environment"),
                }
            } else if let Some(name) = line.strip_prefix('-') {
                removals.push(name.to_string());
            } else {
                dump_args.push(line.to_string());
            }
        }
    }

    if !dump_args.is_empty() {
        merge_dump_output(&mut result, &dump_args)?;
    }

    for name in &removals {
        result.remove(name);
    }

    Ok(result)
}

/// Runs the OS env-dump subprogram (`env` on POSIX, `set` on Windows) with
/// the given arguments and the accumulated map as its environment, merging
/// its `KEY=VALUE` output into `result`.
fn merge_dump_output(result: &mut EnvMap, args: &[String]) -> Result<(), SupervisorError> {
    let mut command = dump_command();
    command
        .args(args)
        .env_clear()
        .envs(result.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let output = command
        .output()
        .map_err(|err| SupervisorError::env(format!("failed to run env-dump subprogram: {err}")))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if let Some((key, value)) = line.split_once('=') {
            if key.is_empty() {
                continue;
            }
            result.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn dump_command() -> Command {
    // Absolute path: the subprogram runs with a replaced environment, so a
    // PATH lookup cannot be relied on.
    Command::new("/usr/bin/env")
}

#[cfg(windows)]
fn dump_command() -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg("set");
    command
}
