//! Previous-cycle snapshot persistence.
//!
//! The snapshot maps normalized DN to the record published last cycle. It is
//! owned exclusively by the snapshot differ: read at the start of the diff,
//! fully rewritten atomically at the end.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::record::{parse_entries, serialize_entries, Record};

/// Records published by the previous cycle, keyed by normalized DN.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entries: BTreeMap<String, Record>,
}

impl Snapshot {
    /// Build a snapshot from a record list; later duplicates win the key.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut entries = BTreeMap::new();
        for record in records {
            entries.insert(record.dn_key(), record);
        }
        Self { entries }
    }

    /// Load the snapshot file. A missing file is an empty snapshot;
    /// malformed entries are logged and skipped.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;

        let mut entries = BTreeMap::new();
        for result in parse_entries(&text, true) {
            match result {
                Ok(record) => {
                    entries.insert(record.dn_key(), record);
                }
                Err(e) => {
                    warn!(snapshot = %path.display(), error = %e, "Skipping malformed snapshot entry");
                }
            }
        }

        Ok(Self { entries })
    }

    /// Persist atomically: write a sibling temp file, fsync, rename over
    /// the canonical path. Readers see either the old or the new complete
    /// content, never a partial write.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let records: Vec<Record> = self.entries.values().cloned().collect();
        let text = serialize_entries(&records);

        let tmp_path = path.with_extension("ldif.tmp");
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("Failed to create snapshot temp: {}", tmp_path.display()))?;
        file.write_all(text.as_bytes())
            .await
            .context("Failed to write snapshot")?;
        file.sync_all().await.context("Failed to sync snapshot")?;
        drop(file);

        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Failed to publish snapshot: {}", path.display()))?;

        Ok(())
    }
}
