//! Snapshot differ: splits the merged record set into full-replace and
//! attribute-level partial updates against the previous cycle's snapshot.
//!
//! A record temporarily missing from this cycle's collection is still
//! considered valid until its TTL lapses and is carried forward; the
//! differ is the only component permitted to drop a record outright.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::domain::{record::EXPIRATION_ATTR, Record, Snapshot};

/// Result of one diff pass. `full` and `partial` are disjoint by DN; the
/// snapshot is what the next cycle diffs against.
#[derive(Debug, Default)]
pub struct DiffOutcome {
    pub full: Vec<Record>,
    pub partial: Vec<Record>,
    pub snapshot: Snapshot,
}

/// Compare the merged set to the previous snapshot at time `now`.
pub fn diff(merged: Vec<Record>, previous: &Snapshot, now: i64) -> DiffOutcome {
    let mut full = Vec::new();
    let mut partial = Vec::new();
    let mut entries = BTreeMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for record in merged {
        let key = record.dn_key();
        seen.insert(key.clone());

        match previous.entries.get(&key) {
            // New entity this cycle.
            None => {
                full.push(record.clone());
                entries.insert(key, record);
            }
            // Expiration forces a full update, byte-identical or not.
            Some(prev) if prev.is_expired(now) => {
                full.push(record.clone());
                entries.insert(key, record);
            }
            Some(prev) => {
                if let Some(delta) = key_delta(prev, &record) {
                    partial.push(delta);
                }
                entries.insert(key, record);
            }
        }
    }

    // Carry forward what this cycle failed to collect, until it expires.
    for (key, prev) in &previous.entries {
        if seen.contains(key) {
            continue;
        }
        if prev.is_expired(now) {
            debug!(dn = %key, "Expired record dropped");
            continue;
        }
        full.push(prev.clone());
        entries.insert(key.clone(), prev.clone());
    }

    DiffOutcome {
        full,
        partial,
        snapshot: Snapshot { entries },
    }
}

/// Attribute-key-level delta. Returns a record carrying only the added and
/// changed keys, or `None` when nothing differs. Removed keys count toward
/// "something changed" but have no line-oriented representation, so a
/// removal-only delta comes back as a DN-only record.
///
/// The expiration stamp is cache bookkeeping, not data; it is excluded so
/// a restamp alone never produces an update.
fn key_delta(prev: &Record, new: &Record) -> Option<Record> {
    let mut delta = Record::new(new.dn.clone());
    let mut changed = false;

    for (ours, theirs, out) in [
        (&new.glue, &prev.glue, &mut delta.glue),
        (&new.non_glue, &prev.non_glue, &mut delta.non_glue),
    ] {
        for (key, values) in ours {
            if key == EXPIRATION_ATTR {
                continue;
            }
            if theirs.get(key).is_some_and(|pv| values_eq(pv, values)) {
                continue;
            }
            out.insert(key.clone(), values.clone());
            changed = true;
        }
        for key in theirs.keys() {
            if key != EXPIRATION_ATTR && !ours.contains_key(key) {
                changed = true;
            }
        }
    }

    changed.then_some(delta)
}

fn values_eq(a: &[String], b: &[String]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> Record {
        Record::parse(text, true).unwrap()
    }

    fn stamped(text: &str, expires_at: i64) -> Record {
        let mut r = record(text);
        r.set_expiration(expires_at);
        r
    }

    const NOW: i64 = 1_000_000;

    #[test]
    fn test_single_attribute_change_yields_partial_only() {
        let prev = Snapshot::from_records([stamped(
            "dn: GlueCEUniqueID=x,o=grid\nGlueCEStateStatus: Closed\nGlueCEInfoHostName: host\n",
            NOW + 100,
        )]);
        let merged = vec![stamped(
            "dn: GlueCEUniqueID=x,o=grid\nGlueCEStateStatus: Production\nGlueCEInfoHostName: host\n",
            NOW + 600,
        )];

        let outcome = diff(merged, &prev, NOW);
        assert!(outcome.full.is_empty());
        assert_eq!(outcome.partial.len(), 1);
        let delta = &outcome.partial[0];
        assert_eq!(
            delta.glue.get("CEStateStatus"),
            Some(&vec!["Production".to_string()])
        );
        // Only the changed key travels.
        assert!(!delta.glue.contains_key("CEInfoHostName"));
    }

    #[test]
    fn test_unchanged_record_yields_nothing() {
        let prev = Snapshot::from_records([stamped(
            "dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\n",
            NOW + 100,
        )]);
        // Restamped but otherwise identical.
        let merged = vec![stamped("dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\n", NOW + 600)];

        let outcome = diff(merged, &prev, NOW);
        assert!(outcome.full.is_empty());
        assert!(outcome.partial.is_empty());
        // The snapshot still tracks the restamped copy.
        let kept = outcome.snapshot.entries.get("GlueCEUniqueID=x").unwrap();
        assert_eq!(kept.expiration(), Some(NOW + 600));
    }

    #[test]
    fn test_expiration_forces_full_update() {
        let prev = Snapshot::from_records([stamped(
            "dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\n",
            NOW - 1,
        )]);
        let merged = vec![stamped("dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\n", NOW + 600)];

        let outcome = diff(merged, &prev, NOW);
        assert_eq!(outcome.full.len(), 1);
        assert!(outcome.partial.is_empty());
    }

    #[test]
    fn test_new_dn_goes_to_full() {
        let prev = Snapshot::default();
        let merged = vec![stamped("dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\n", NOW + 600)];

        let outcome = diff(merged, &prev, NOW);
        assert_eq!(outcome.full.len(), 1);
        assert!(outcome.partial.is_empty());
    }

    #[test]
    fn test_missing_but_valid_record_carried_forward() {
        let prev = Snapshot::from_records([stamped(
            "dn: GlueCEUniqueID=away,o=grid\nGlueFoo: 1\n",
            NOW + 100,
        )]);

        let outcome = diff(vec![], &prev, NOW);
        assert_eq!(outcome.full.len(), 1);
        assert_eq!(outcome.full[0].dn_key(), "GlueCEUniqueID=away");
        assert!(outcome.snapshot.entries.contains_key("GlueCEUniqueID=away"));
    }

    #[test]
    fn test_missing_and_expired_record_dropped() {
        let prev = Snapshot::from_records([stamped(
            "dn: GlueCEUniqueID=dead,o=grid\nGlueFoo: 1\n",
            NOW - 1,
        )]);

        let outcome = diff(vec![], &prev, NOW);
        assert!(outcome.full.is_empty());
        assert!(outcome.partial.is_empty());
        assert!(outcome.snapshot.entries.is_empty());
    }

    #[test]
    fn test_removed_key_still_signals_change() {
        let prev = Snapshot::from_records([stamped(
            "dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\nGlueBar: 2\n",
            NOW + 100,
        )]);
        let merged = vec![stamped("dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\n", NOW + 600)];

        let outcome = diff(merged, &prev, NOW);
        assert!(outcome.full.is_empty());
        assert_eq!(outcome.partial.len(), 1);
        // Removal-only delta: nothing but the DN travels.
        assert!(outcome.partial[0].glue.is_empty());
    }

    #[test]
    fn test_unstamped_previous_record_treated_as_expired() {
        let prev = Snapshot::from_records([record("dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\n")]);
        let merged = vec![stamped("dn: GlueCEUniqueID=x,o=grid\nGlueFoo: 1\n", NOW + 600)];

        let outcome = diff(merged, &prev, NOW);
        assert_eq!(outcome.full.len(), 1);
        assert!(outcome.partial.is_empty());
    }
}
