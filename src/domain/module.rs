//! Module descriptors and discovery.
//!
//! A module is an external executable (provider or plugin) invoked with no
//! arguments. Providers emit whole records; plugins overlay attributes onto
//! existing ones.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Kind of external module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Emits whole records with whole-entity authority.
    Provider,
    /// Overlays attributes onto records that already exist.
    Plugin,
}

/// Per-cycle state of one module run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    /// Not yet launched this cycle.
    Pending,
    /// Child process running.
    Running { pid: u32 },
    /// Child exited on its own.
    Completed { exit_code: i32 },
    /// Still running at the deadline; killed and reaped.
    Killed,
}

/// One external module and its state for the current cycle.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// File name of the executable; also names its cache file.
    pub name: String,

    /// Absolute path to the executable.
    pub path: PathBuf,

    pub kind: ModuleKind,

    /// Raw cached output, filled either by a fresh cache hit or by a
    /// successful run merged into the cache this cycle.
    pub cached_output: Option<String>,

    pub status: ModuleStatus,
}

impl ModuleDescriptor {
    pub fn new(name: String, path: PathBuf, kind: ModuleKind) -> Self {
        Self {
            name,
            path,
            kind,
            cached_output: None,
            status: ModuleStatus::Pending,
        }
    }

    /// A module is stale when no fresh cached output is loaded; stale
    /// modules are the ones executed this cycle.
    pub fn is_stale(&self) -> bool {
        self.cached_output.is_none()
    }

    /// Whether this cycle's run ended with exit 0.
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ModuleStatus::Completed { exit_code: 0 })
    }
}

/// Discover executable modules in a directory, sorted by name.
///
/// Non-executable files are skipped; a missing directory is an error (the
/// config layer validates existence up front).
pub fn discover(dir: &Path, kind: ModuleKind) -> Result<Vec<ModuleDescriptor>> {
    use std::os::unix::fs::PermissionsExt;

    let mut modules = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read module directory: {}", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        if metadata.permissions().mode() & 0o111 == 0 {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        modules.push(ModuleDescriptor::new(name.to_string(), path.clone(), kind));
    }

    modules.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, executable: bool) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        let mode = if executable { 0o755 } else { 0o644 };
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_discover_skips_non_executables() {
        let temp = TempDir::new().unwrap();
        write_script(temp.path(), "b_provider", true);
        write_script(temp.path(), "a_provider", true);
        write_script(temp.path(), "README", false);

        let modules = discover(temp.path(), ModuleKind::Provider).unwrap();
        let names: Vec<&str> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a_provider", "b_provider"]);
        assert!(modules.iter().all(|m| m.is_stale()));
    }

    #[test]
    fn test_discover_missing_dir_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(discover(&temp.path().join("nope"), ModuleKind::Plugin).is_err());
    }

    #[test]
    fn test_succeeded_requires_exit_zero() {
        let mut module = ModuleDescriptor::new(
            "m".to_string(),
            PathBuf::from("/bin/true"),
            ModuleKind::Provider,
        );
        assert!(!module.succeeded());
        module.status = ModuleStatus::Completed { exit_code: 1 };
        assert!(!module.succeeded());
        module.status = ModuleStatus::Completed { exit_code: 0 };
        assert!(module.succeeded());
        module.status = ModuleStatus::Killed;
        assert!(!module.succeeded());
    }
}
