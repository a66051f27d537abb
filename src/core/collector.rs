//! Full-cycle driver: the per-run context that owns the resolved config
//! and walks one collection cycle end to end.
//!
//! Lock -> optional flush -> discover -> check_fresh -> launch/wait ->
//! cache merge -> merge engine -> diff -> persist snapshot -> report.
//! Per-module failures are isolated along the way; only lock contention
//! and startup configuration errors abort the run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::config::GipConfig;
use crate::domain::{
    discover, parse_entries, serialize_entries, ModuleDescriptor, ModuleKind, ModuleStatus, Record,
    Snapshot,
};

use super::cache::CacheStore;
use super::lock::RunLock;
use super::{diff, exec, merge};

/// Summary of one collection cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// Modules answered from cache without running.
    pub fresh: usize,
    /// Modules executed this cycle.
    pub executed: usize,
    /// Modules that contributed nothing this cycle (non-zero exit, killed,
    /// or unpublishable output).
    pub failed: usize,
    pub full_updates: usize,
    pub partial_updates: usize,
    /// Rendered output: full updates, then partial updates.
    pub output: String,
}

/// Per-run context for one collection cycle.
pub struct Collector {
    config: GipConfig,
}

impl Collector {
    pub fn new(config: GipConfig) -> Self {
        Self { config }
    }

    /// Execute one full collection cycle.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.config
            .validate()
            .context("Configuration invalid at startup")?;

        // Acquisition sleeps between attempts; keep it off the runtime
        // worker threads.
        let lock_file = self.config.lock_file.clone();
        let kill_timeout = self.config.kill_timeout;
        let retry_delay = self.config.lock_retry_delay;
        let _lock =
            tokio::task::spawn_blocking(move || RunLock::acquire(&lock_file, kill_timeout, retry_delay))
                .await
                .context("Lock acquisition task failed")?
                .context("Failed to acquire the run lock")?;

        let cache = CacheStore::new(self.config.temp_dir.clone());
        if self.config.flush_cache {
            cache.flush().await?;
        }

        let mut modules = self.discover_modules()?;
        cache.check_fresh(&mut modules, self.config.freshness).await;
        let fresh = modules.iter().filter(|m| !m.is_stale()).count();

        let children = exec::launch(&mut modules, &cache);
        let executed = children.len();
        exec::wait_all(children, &mut modules, self.config.deadline()).await;
        cache.merge(&mut modules, self.config.cache_ttl).await;

        let failed = modules
            .iter()
            .filter(|m| match m.status {
                ModuleStatus::Killed => true,
                ModuleStatus::Completed { exit_code } => exit_code != 0,
                _ => m.is_stale(),
            })
            .count();

        let baseline = self.load_static_baseline().await?;
        let providers = collect_records(&modules, ModuleKind::Provider);
        let plugins = collect_records(&modules, ModuleKind::Plugin);

        let mut merged = merge::apply_providers(baseline, providers);
        merge::apply_plugins(&mut merged, plugins);
        let merged = merge::apply_overrides(
            merged,
            self.load_override(&self.config.add_attributes).await?,
            self.load_override(&self.config.alter_attributes).await?,
            self.load_override(&self.config.remove_attributes).await?,
        );

        let snapshot_path = self.config.snapshot_path();
        let previous = Snapshot::load(&snapshot_path).await?;
        let outcome = diff::diff(merged, &previous, Utc::now().timestamp());
        outcome.snapshot.save(&snapshot_path).await?;

        let mut output = serialize_entries(&outcome.full);
        if !outcome.partial.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&serialize_entries(&outcome.partial));
        }

        info!(
            fresh,
            executed,
            failed,
            full_updates = outcome.full.len(),
            partial_updates = outcome.partial.len(),
            "Cycle complete"
        );

        Ok(CycleReport {
            fresh,
            executed,
            failed,
            full_updates: outcome.full.len(),
            partial_updates: outcome.partial.len(),
            output,
        })
    }

    fn discover_modules(&self) -> Result<Vec<ModuleDescriptor>> {
        let mut modules = Vec::new();
        if let Some(dir) = &self.config.provider_dir {
            modules.extend(discover(dir, ModuleKind::Provider)?);
        }
        if let Some(dir) = &self.config.plugin_dir {
            modules.extend(discover(dir, ModuleKind::Plugin)?);
        }
        Ok(modules)
    }

    /// Parse every `*.ldif` file under the static dir, sorted by name.
    async fn load_static_baseline(&self) -> Result<Vec<Record>> {
        let Some(dir) = &self.config.static_dir else {
            return Ok(Vec::new());
        };

        let mut paths: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read static dir: {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "ldif") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::new();
        for path in paths {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read static file: {}", path.display()))?;
            records.extend(parse_lossy(&text, &path.display().to_string()));
        }
        Ok(records)
    }

    async fn load_override(&self, path: &Option<PathBuf>) -> Result<Vec<Record>> {
        let Some(path) = path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read override file: {}", path.display()))?;
        Ok(parse_lossy(&text, &path.display().to_string()))
    }
}

/// Parse a module kind's cached outputs, logging and skipping malformed
/// entries (a parse error is fatal to that one record only).
fn collect_records(modules: &[ModuleDescriptor], kind: ModuleKind) -> Vec<Record> {
    let mut records = Vec::new();
    for module in modules.iter().filter(|m| m.kind == kind) {
        if let Some(text) = &module.cached_output {
            records.extend(parse_lossy(text, &module.name));
        }
    }
    records
}

fn parse_lossy(text: &str, source: &str) -> Vec<Record> {
    parse_entries(text, true)
        .into_iter()
        .filter_map(|result| match result {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(source, error = %e, "Skipping malformed entry");
                None
            }
        })
        .collect()
}
