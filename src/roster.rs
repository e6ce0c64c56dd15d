//! Persistent roster of services: which paths the daemon knows about and
//! whether each is started at boot.
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::SupervisorError;

/// The enabled/disabled service list, persisted one entry per line: `PATH`
/// for enabled-at-boot, `- PATH` for disabled-at-boot. Lines are rewritten
/// in sorted order on every mutation.
#[derive(Debug)]
pub struct RosterConfig {
    file_path: PathBuf,
}

impl RosterConfig {
    /// Creates a roster backed by the given file. The file is created lazily
    /// on the first mutation.
    pub fn new(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    /// Returns the backing file path.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Reads all entries from disk. A missing file yields an empty roster;
    /// unknown line forms are ignored.
    pub fn entries(&self) -> Result<BTreeMap<PathBuf, bool>, SupervisorError> {
        let contents = match fs::read_to_string(&self.file_path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(path) = line.strip_prefix("- ") {
                entries.insert(PathBuf::from(path), false);
            } else if !line.starts_with('-') && !line.starts_with('#') {
                entries.insert(PathBuf::from(line), true);
            }
        }
        Ok(entries)
    }

    /// Rewrites the whole file from the sorted entry map.
    fn rewrite(&self, entries: &BTreeMap<PathBuf, bool>) -> Result<(), SupervisorError> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = String::new();
        for (path, enabled) in entries {
            if *enabled {
                contents.push_str(&path.to_string_lossy());
            } else {
                contents.push_str("- ");
                contents.push_str(&path.to_string_lossy());
            }
            contents.push('\n');
        }
        fs::write(&self.file_path, contents)?;
        debug!("rewrote roster {:?} ({} entries)", self.file_path, entries.len());
        Ok(())
    }

    /// Adds a service path, disabled at boot. The path must exist, be a
    /// regular file, be executable, and not already be listed.
    pub fn add(&self, path: &Path) -> Result<(), SupervisorError> {
        let mut entries = self.entries()?;
        if let Some(enabled) = entries.get(path) {
            let state = if *enabled { "enabled" } else { "disabled" };
            return Err(SupervisorError::manager_config(format!(
                "{} is already added ({state})",
                path.display()
            )));
        }
        validate_executable(path)?;
        entries.insert(path.to_path_buf(), false);
        self.rewrite(&entries)
    }

    /// Removes a service path; errors if it is not listed.
    pub fn delete(&self, path: &Path) -> Result<(), SupervisorError> {
        let mut entries = self.entries()?;
        if entries.remove(path).is_none() {
            return Err(SupervisorError::manager_config(format!(
                "{} is not added",
                path.display()
            )));
        }
        self.rewrite(&entries)
    }

    /// Marks a service as started at boot; errors if absent or redundant.
    pub fn enable(&self, path: &Path) -> Result<(), SupervisorError> {
        let mut entries = self.entries()?;
        match entries.get_mut(path) {
            None => Err(SupervisorError::manager_config(format!(
                "{} is not added",
                path.display()
            ))),
            Some(true) => Err(SupervisorError::manager_config_info(format!(
                "{} is already enabled",
                path.display()
            ))),
            Some(enabled) => {
                *enabled = true;
                self.rewrite(&entries)
            }
        }
    }

    /// Marks a service as not started at boot; errors if absent or redundant.
    pub fn disable(&self, path: &Path) -> Result<(), SupervisorError> {
        let mut entries = self.entries()?;
        match entries.get_mut(path) {
            None => Err(SupervisorError::manager_config(format!(
                "{} is not added",
                path.display()
            ))),
            Some(false) => Err(SupervisorError::manager_config_info(format!(
                "{} is already disabled",
                path.display()
            ))),
            Some(enabled) => {
                *enabled = false;
                self.rewrite(&entries)
            }
        }
    }

    /// Validates that a listed entry still refers to an executable regular
    /// file. Status reporting uses this to flag broken entries.
    pub fn check(&self, path: &Path) -> Result<(), SupervisorError> {
        validate_executable(path)
    }
}

/// Validates that `path` names an executable regular file.
fn validate_executable(path: &Path) -> Result<(), SupervisorError> {
    let metadata = fs::metadata(path).map_err(|_| {
        SupervisorError::manager_config(format!("{} does not exist", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(SupervisorError::manager_config(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if !is_executable(&metadata) {
        return Err(SupervisorError::manager_config(format!(
            "{} is not executable",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}
