//! Filesystem path utilities: ancestor walks, empty-directory pruning,
//! keyword search, and known-path glob matching.
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use regex::Regex;
use tracing::debug;

/// Returns every ancestor directory of `path`, nearest first, stopping
/// before the filesystem root.
///
/// For `/srv/app/run` this yields `/srv/app` then `/srv`.
pub fn ancestor_dirs(path: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.parent().is_none() {
            break;
        }
        dirs.push(dir.to_path_buf());
        current = dir.parent();
    }
    dirs
}

/// Returns `true` if `ancestor` is a strict ancestor directory of `path`.
pub fn is_ancestor(ancestor: &Path, path: &Path) -> bool {
    ancestor != path && path.starts_with(ancestor)
}

/// Removes `dir` and then every parent directory that became empty, walking
/// upward until `stop_root` (exclusive) or the first non-empty parent.
///
/// Missing directories are not an error; the walk simply continues upward.
pub fn prune_empty_parents(dir: &Path, stop_root: &Path) -> io::Result<()> {
    let mut current = Some(dir.to_path_buf());
    while let Some(path) = current {
        if !is_ancestor(stop_root, &path) {
            break;
        }
        match fs::remove_dir(&path) {
            Ok(()) => debug!("pruned empty directory {:?}", path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            // Non-empty or busy: stop pruning here.
            Err(_) => break,
        }
        current = path.parent().map(Path::to_path_buf);
    }
    Ok(())
}

/// Recursively collects files under `root` whose file name contains
/// `keyword`. Unreadable directories are skipped.
pub fn search_files(root: &Path, keyword: &str) -> Vec<PathBuf> {
    let mut matches = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.contains(keyword))
            {
                matches.push(path);
            }
        }
    }
    matches.sort();
    matches
}

/// Translates a shell glob (`*`, `?`, `[...]`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                regex.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    regex.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' {
                        regex.push_str("\\\\");
                    } else {
                        regex.push(inner);
                    }
                }
                regex.push(']');
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).ok()
}

/// Resolves a user-supplied pattern against the set of known service paths.
///
/// Matching is attempted in three stages, returning the first stage that
/// produces any hit: exact string equality, the pattern as a shell glob, and
/// finally the glob widened on both sides (`*pattern*`).
pub fn match_known_paths(known: &[PathBuf], pattern: &str) -> Vec<PathBuf> {
    let exact: Vec<PathBuf> = known
        .iter()
        .filter(|path| path.as_os_str() == std::ffi::OsStr::new(pattern))
        .cloned()
        .collect();
    if !exact.is_empty() {
        return exact;
    }

    if let Some(regex) = glob_to_regex(pattern) {
        let globbed: Vec<PathBuf> = known
            .iter()
            .filter(|path| regex.is_match(&path.to_string_lossy()))
            .cloned()
            .collect();
        if !globbed.is_empty() {
            return globbed;
        }
    }

    if let Some(regex) = glob_to_regex(&format!("*{pattern}*")) {
        return known
            .iter()
            .filter(|path| regex.is_match(&path.to_string_lossy()))
            .cloned()
            .collect();
    }

    Vec::new()
}
