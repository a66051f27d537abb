//! Merge engine: folds provider and plugin output onto the static baseline.
//!
//! Strict stage order, each stage consuming the previous stage's output:
//! baseline, providers (whole-record authority), plugins (attribute
//! overlay), operator overrides (add, alter, remove — policy runs last).

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::domain::Record;

/// Providers replace baseline records with an equal normalized DN;
/// unmatched baseline records pass through unchanged; unmatched provider
/// records are appended.
///
/// Two providers emitting the same DN both survive — observed behavior,
/// pinned by `test_duplicate_provider_dns_both_survive`.
pub fn apply_providers(baseline: Vec<Record>, providers: Vec<Record>) -> Vec<Record> {
    let provider_keys: HashSet<String> = providers.iter().map(|r| r.dn_key()).collect();

    let mut merged: Vec<Record> = baseline
        .into_iter()
        .filter(|record| !provider_keys.contains(&record.dn_key()))
        .collect();
    merged.extend(providers);
    merged
}

/// Plugins overlay attributes onto an existing record with a matching DN.
/// A plugin record that matches nothing cannot introduce a new entity; it
/// is dropped with a log line.
pub fn apply_plugins(current: &mut [Record], plugins: Vec<Record>) {
    let index: HashMap<String, usize> = current
        .iter()
        .enumerate()
        .map(|(i, record)| (record.dn_key(), i))
        .collect();

    for plugin in plugins {
        match index.get(&plugin.dn_key()) {
            Some(&i) => current[i].overlay(&plugin),
            None => {
                warn!(dn = %plugin.dn_key(), "Plugin record matches no existing entity, dropped");
            }
        }
    }
}

/// Operator overrides, run last so operator policy always wins: `add` and
/// `alter` each behave as one more provider (in that order), `remove`
/// drops every record whose normalized DN matches an entry in it.
pub fn apply_overrides(
    current: Vec<Record>,
    add: Vec<Record>,
    alter: Vec<Record>,
    remove: Vec<Record>,
) -> Vec<Record> {
    let current = apply_providers(current, add);
    let mut current = apply_providers(current, alter);

    let remove_keys: HashSet<String> = remove.iter().map(|r| r.dn_key()).collect();
    current.retain(|record| !remove_keys.contains(&record.dn_key()));
    current
}
