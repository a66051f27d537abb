//! Process orchestration for stale modules.
//!
//! One child per stale module, stdout captured into its staging file,
//! stderr inherited into the collector's own log stream. The control
//! process blocks only on child termination (tokio's signal-driven wait,
//! no busy-polling) under one shared deadline; stragglers are killed and
//! reaped so the process table is left with no zombies.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::domain::{ModuleDescriptor, ModuleStatus};

use super::cache::CacheStore;

/// A launched child, tied back to its module by index.
pub struct RunningModule {
    pub index: usize,
    pub child: Child,
}

/// Spawn every stale module with a create-exclusive staging file for its
/// stdout. A module that cannot be started is recorded as failed (exit
/// 127) and never aborts the batch.
pub fn launch(modules: &mut [ModuleDescriptor], cache: &CacheStore) -> Vec<RunningModule> {
    let mut running = Vec::new();

    for (index, module) in modules.iter_mut().enumerate() {
        if !module.is_stale() {
            continue;
        }

        let staging = cache.staging_path(&module.name);
        // A leftover staging file from a crashed run would defeat
        // create-exclusive; clear it first.
        let _ = std::fs::remove_file(&staging);

        let stdout_file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
        {
            Ok(file) => file,
            Err(e) => {
                warn!(module = %module.name, error = %e, "Failed to create staging file");
                module.status = ModuleStatus::Completed { exit_code: 127 };
                continue;
            }
        };

        match Command::new(&module.path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::inherit())
            .spawn()
        {
            Ok(child) => {
                let pid = child.id().unwrap_or(0);
                debug!(module = %module.name, pid, "Module launched");
                module.status = ModuleStatus::Running { pid };
                running.push(RunningModule { index, child });
            }
            Err(e) => {
                warn!(module = %module.name, error = %e, "Failed to spawn module");
                module.status = ModuleStatus::Completed { exit_code: 127 };
                let _ = std::fs::remove_file(&staging);
            }
        }
    }

    running
}

/// Wait for every launched child under one shared deadline.
///
/// Children run genuinely in parallel; awaiting them in sequence against
/// the same deadline bounds the total wait by `timeout + ε`. Every child
/// ends with a terminal status — a straggler is sent a hard kill and then
/// waited on, so partial results are not possible and no zombie remains.
pub async fn wait_all(
    children: Vec<RunningModule>,
    modules: &mut [ModuleDescriptor],
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;

    for mut running in children {
        let name = modules[running.index].name.clone();

        let status = match timeout_at(deadline, running.child.wait()).await {
            Ok(Ok(exit)) => {
                let exit_code = exit.code().unwrap_or(-1);
                if exit_code == 0 {
                    info!(module = %name, "Module completed");
                } else {
                    warn!(module = %name, exit_code, "Module failed");
                }
                ModuleStatus::Completed { exit_code }
            }
            Ok(Err(e)) => {
                warn!(module = %name, error = %e, "Failed to wait for module");
                ModuleStatus::Completed { exit_code: -1 }
            }
            Err(_) => {
                warn!(module = %name, timeout_secs = timeout.as_secs(), "Module timed out, killing");
                if let Err(e) = running.child.start_kill() {
                    warn!(module = %name, error = %e, "Failed to kill module");
                }
                // Reap so no zombie is left behind.
                let _ = running.child.wait().await;
                ModuleStatus::Killed
            }
        };

        modules[running.index].status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModuleKind;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn script_module(dir: &Path, name: &str, body: &str) -> ModuleDescriptor {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ModuleDescriptor::new(name.to_string(), path, ModuleKind::Provider)
    }

    #[tokio::test]
    async fn test_stdout_captured_and_exit_codes_recorded() {
        let temp = TempDir::new().unwrap();
        let cache = CacheStore::new(temp.path().to_path_buf());

        let mut modules = vec![
            script_module(temp.path(), "ok", "echo 'dn: a=b'"),
            script_module(temp.path(), "bad", "exit 3"),
        ];

        let children = launch(&mut modules, &cache);
        assert_eq!(children.len(), 2);
        wait_all(children, &mut modules, Duration::from_secs(10)).await;

        assert_eq!(modules[0].status, ModuleStatus::Completed { exit_code: 0 });
        assert_eq!(modules[1].status, ModuleStatus::Completed { exit_code: 3 });
        assert_eq!(
            std::fs::read_to_string(cache.staging_path("ok")).unwrap(),
            "dn: a=b\n"
        );
    }

    #[tokio::test]
    async fn test_fresh_modules_not_launched() {
        let temp = TempDir::new().unwrap();
        let cache = CacheStore::new(temp.path().to_path_buf());

        let mut fresh = script_module(temp.path(), "fresh", "echo hi");
        fresh.cached_output = Some("dn: a=b\n".to_string());
        let mut modules = vec![fresh];

        let children = launch(&mut modules, &cache);
        assert!(children.is_empty());
        assert_eq!(modules[0].status, ModuleStatus::Pending);
    }

    #[tokio::test]
    async fn test_unspawnable_module_marked_failed() {
        let temp = TempDir::new().unwrap();
        let cache = CacheStore::new(temp.path().to_path_buf());

        let mut modules = vec![ModuleDescriptor::new(
            "ghost".to_string(),
            temp.path().join("does-not-exist"),
            ModuleKind::Provider,
        )];

        let children = launch(&mut modules, &cache);
        assert!(children.is_empty());
        assert_eq!(modules[0].status, ModuleStatus::Completed { exit_code: 127 });
        assert!(!cache.staging_path("ghost").exists());
    }
}
