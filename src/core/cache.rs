//! Per-module TTL cache on disk.
//!
//! Durable cache lives at `<temp_dir>/<module>.ldif`; in-flight output at
//! `<temp_dir>/<module>.ldif.tmp`. Publishing is write-staging, fsync, then
//! rename, so readers of the canonical file always observe either the old
//! complete content or the new complete content.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::{parse_entries, serialize_entries, ModuleDescriptor, Record};

pub struct CacheStore {
    temp_dir: PathBuf,
}

impl CacheStore {
    pub fn new(temp_dir: PathBuf) -> Self {
        Self { temp_dir }
    }

    /// Canonical cache file for a module.
    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.temp_dir.join(format!("{name}.ldif"))
    }

    /// In-flight output file a module's stdout is captured into.
    pub fn staging_path(&self, name: &str) -> PathBuf {
        self.temp_dir.join(format!("{name}.ldif.tmp"))
    }

    /// Discard every cache file (and leftover staging file) in the temp
    /// dir, the previous snapshot included.
    pub async fn flush(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.temp_dir)
            .await
            .with_context(|| format!("Failed to read temp dir: {}", self.temp_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".ldif") || name.ends_with(".ldif.tmp") {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(file = %path.display(), error = %e, "Failed to flush cache file");
                }
            }
        }

        Ok(())
    }

    /// Load cached output for every module whose cache file is younger
    /// than `freshness`. Modules left without cached output are stale and
    /// must be executed this cycle.
    pub async fn check_fresh(&self, modules: &mut [ModuleDescriptor], freshness: Duration) {
        for module in modules.iter_mut() {
            let path = self.cache_path(&module.name);
            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            let age = metadata.modified().ok().and_then(|m| m.elapsed().ok());
            let Some(age) = age else {
                continue;
            };
            if age > freshness {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    debug!(module = %module.name, age_secs = age.as_secs(), "Cache fresh");
                    module.cached_output = Some(text);
                }
                Err(e) => {
                    warn!(module = %module.name, error = %e, "Failed to read fresh cache");
                }
            }
        }
    }

    /// Fold this cycle's execution results into the durable cache.
    ///
    /// Modules that exited 0 get their staging output parsed, stamped with
    /// `now + ttl`, and atomically published over the canonical file. For
    /// everything else the staging file is discarded and the previous
    /// canonical content is left untouched — a failing module never poisons
    /// the cache.
    pub async fn merge(&self, modules: &mut [ModuleDescriptor], ttl: Duration) {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;

        for module in modules.iter_mut() {
            if !module.is_stale() {
                // Fresh from cache, nothing ran.
                continue;
            }
            let staging = self.staging_path(&module.name);

            if !module.succeeded() {
                let _ = tokio::fs::remove_file(&staging).await;
                continue;
            }

            match self.publish(module, expires_at).await {
                Ok(text) => {
                    module.cached_output = Some(text);
                }
                Err(e) => {
                    warn!(module = %module.name, error = %e, "Dropping module contribution");
                    let _ = tokio::fs::remove_file(&staging).await;
                }
            }
        }
    }

    async fn publish(&self, module: &ModuleDescriptor, expires_at: i64) -> Result<String> {
        let staging = self.staging_path(&module.name);
        let raw = tokio::fs::read_to_string(&staging)
            .await
            .with_context(|| format!("Failed to read staging output: {}", staging.display()))?;

        let mut records: Vec<Record> = Vec::new();
        for result in parse_entries(&raw, true) {
            match result {
                Ok(mut record) => {
                    record.set_expiration(expires_at);
                    records.push(record);
                }
                Err(e) => {
                    warn!(module = %module.name, error = %e, "Skipping malformed entry");
                }
            }
        }

        let text = serialize_entries(&records);
        let mut file = tokio::fs::File::create(&staging)
            .await
            .with_context(|| format!("Failed to rewrite staging: {}", staging.display()))?;
        file.write_all(text.as_bytes())
            .await
            .context("Failed to write staged cache")?;
        file.sync_all().await.context("Failed to sync staged cache")?;
        drop(file);

        tokio::fs::rename(&staging, self.cache_path(&module.name))
            .await
            .with_context(|| format!("Failed to publish cache for {}", module.name))?;

        Ok(text)
    }
}
