//! Typed record model for the LDIF-style wire format.
//!
//! A `Record` is one published GLUE entity: an ordered DN, a set of object
//! classes, and GLUE / non-GLUE attribute maps. Records are parsed from a
//! static baseline file or from a module's captured stdout, and are never
//! mutated in place by the pipeline — merge and diff always build new ones.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use thiserror::Error;

/// GLUE-namespace prefix, stripped on parse and re-added on serialization.
const GLUE_PREFIX: &str = "Glue";

/// Attribute carrying the cache expiration stamp (set only by the cache
/// store, excluded from attribute diffs).
pub const EXPIRATION_ATTR: &str = "GIPExpiration";

/// Structural attribute dropped on parse, never round-tripped.
const STRUCTURAL_ATTR: &str = "mds-vo-name";

/// Errors raised while parsing wire-format text.
///
/// A parse error is fatal to the one entry it occurred in; multi-entry input
/// surfaces per-entry results so the caller decides whether to skip or abort.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("entry has no dn line")]
    MissingDn,

    #[error("line cannot be split on ': ': {0:?}")]
    MalformedLine(String),

    #[error("dn has no components: {0:?}")]
    EmptyDn(String),
}

/// One GLUE/LDIF entity.
#[derive(Debug, Clone)]
pub struct Record {
    /// Ordered RDN components, at least one.
    pub dn: Vec<String>,

    /// Object class tags, kept sorted for stable serialization.
    pub object_classes: BTreeSet<String>,

    /// GLUE-namespace attributes, prefix stripped.
    pub glue: BTreeMap<String, Vec<String>>,

    /// Everything else, including the expiration stamp.
    pub non_glue: BTreeMap<String, Vec<String>>,

    /// Whether repeated attribute lines accumulate (true) or overwrite
    /// (false). Fixed at parse time.
    pub multi_valued: bool,
}

impl Record {
    /// Create an empty record with the given DN components.
    pub fn new(dn: Vec<String>) -> Self {
        Self {
            dn,
            object_classes: BTreeSet::new(),
            glue: BTreeMap::new(),
            non_glue: BTreeMap::new(),
            multi_valued: true,
        }
    }

    /// Parse a single entry.
    pub fn parse(text: &str, multi_valued: bool) -> Result<Self, ParseError> {
        let lines = unfold(text);
        Self::from_logical_lines(&lines, multi_valued)
    }

    fn from_logical_lines(lines: &[String], multi_valued: bool) -> Result<Self, ParseError> {
        let mut dn: Option<Vec<String>> = None;
        let mut object_classes = BTreeSet::new();
        let mut glue: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut non_glue: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }

            let (name, value) = line
                .split_once(": ")
                .ok_or_else(|| ParseError::MalformedLine(line.clone()))?;
            let value = value.trim();

            if name.eq_ignore_ascii_case("dn") {
                let components: Vec<String> = value
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if components.is_empty() {
                    return Err(ParseError::EmptyDn(value.to_string()));
                }
                dn = Some(components);
            } else if name.eq_ignore_ascii_case("objectclass") {
                object_classes.insert(value.to_string());
            } else if name == STRUCTURAL_ATTR {
                // Structural, not data; discarded.
            } else if let Some(stripped) = name.strip_prefix(GLUE_PREFIX) {
                push_attr(&mut glue, stripped, value, multi_valued);
            } else {
                push_attr(&mut non_glue, name, value, multi_valued);
            }
        }

        let dn = dn.ok_or(ParseError::MissingDn)?;

        Ok(Self {
            dn,
            object_classes,
            glue,
            non_glue,
            multi_valued,
        })
    }

    /// Deterministic re-emission: `dn:`, sorted `objectClass:` lines, GLUE
    /// attributes re-prefixed, then non-GLUE attributes. Multi-valued
    /// attributes emit one line per value.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str("dn: ");
        out.push_str(&self.dn.join(","));
        out.push('\n');

        for class in &self.object_classes {
            out.push_str("objectClass: ");
            out.push_str(class);
            out.push('\n');
        }
        for (key, values) in &self.glue {
            for value in values {
                out.push_str(GLUE_PREFIX);
                out.push_str(key);
                out.push_str(": ");
                out.push_str(value);
                out.push('\n');
            }
        }
        for (key, values) in &self.non_glue {
            for value in values {
                out.push_str(key);
                out.push_str(": ");
                out.push_str(value);
                out.push('\n');
            }
        }

        out
    }

    /// DN components with structural wrapper (`mds-vo-name=...`, `o=grid`)
    /// trimmed from either end.
    pub fn normalized_dn(&self) -> &[String] {
        let mut start = 0;
        let mut end = self.dn.len();
        while start < end && is_structural_component(&self.dn[start]) {
            start += 1;
        }
        while end > start && is_structural_component(&self.dn[end - 1]) {
            end -= 1;
        }
        &self.dn[start..end]
    }

    /// Normalized DN joined with commas; the key records are indexed by.
    pub fn dn_key(&self) -> String {
        self.normalized_dn().join(",")
    }

    /// Expiration stamp, if present.
    pub fn expiration(&self) -> Option<i64> {
        self.non_glue.get(EXPIRATION_ATTR)?.first()?.parse().ok()
    }

    /// Stamp (or restamp) the expiration.
    pub fn set_expiration(&mut self, epoch: i64) {
        self.non_glue
            .insert(EXPIRATION_ATTR.to_string(), vec![epoch.to_string()]);
    }

    /// A record without a stamp is treated as already expired: only the
    /// cache store stamps records, so an unstamped one cannot be trusted
    /// for carry-forward.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration().is_none_or(|e| e <= now)
    }

    /// Overlay another record's attributes onto this one: attribute keys
    /// present in `other` overwrite ours, object classes are unioned. This
    /// is the plugin merge operation — it never changes the DN.
    pub fn overlay(&mut self, other: &Record) {
        for class in &other.object_classes {
            self.object_classes.insert(class.clone());
        }
        for (key, values) in &other.glue {
            self.glue.insert(key.clone(), values.clone());
        }
        for (key, values) in &other.non_glue {
            self.non_glue.insert(key.clone(), values.clone());
        }
    }
}

/// Equality ignores value order within an attribute and structural DN
/// wrapper components at either end; the remaining DN components compare
/// case-sensitively in order.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_dn() == other.normalized_dn()
            && self.object_classes == other.object_classes
            && attrs_eq(&self.glue, &other.glue)
            && attrs_eq(&self.non_glue, &other.non_glue)
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Hashes the normalized DN only, which is consistent with the
        // order-insensitive equality above.
        self.dn_key().hash(state);
    }
}

/// Parse blank-line-separated entries, one `Result` per entry.
pub fn parse_entries(text: &str, multi_valued: bool) -> Vec<Result<Record, ParseError>> {
    let lines = unfold(text);
    let mut entries = Vec::new();

    for block in lines.split(|line| line.trim().is_empty()) {
        if block.is_empty() || block.iter().all(|l| l.trim().is_empty()) {
            continue;
        }
        entries.push(Record::from_logical_lines(block, multi_valued));
    }

    entries
}

/// Serialize a set of records as blank-line-separated entries.
pub fn serialize_entries(records: &[Record]) -> String {
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&record.serialize());
    }
    out
}

/// Unwrap continuation lines: a raw line starting with a single space is
/// appended (leading space stripped) to the previous logical line.
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        if let Some(rest) = raw.strip_prefix(' ') {
            if let Some(prev) = lines.last_mut() {
                prev.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

fn is_structural_component(component: &str) -> bool {
    let lower = component.trim().to_ascii_lowercase();
    lower.starts_with("mds-vo-name=") || lower == "o=grid"
}

fn push_attr(
    attrs: &mut BTreeMap<String, Vec<String>>,
    name: &str,
    value: &str,
    multi_valued: bool,
) {
    if multi_valued {
        attrs
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    } else {
        attrs.insert(name.to_string(), vec![value.to_string()]);
    }
}

fn attrs_eq(a: &BTreeMap<String, Vec<String>>, b: &BTreeMap<String, Vec<String>>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(key, av)| {
        b.get(key).is_some_and(|bv| {
            let mut av = av.clone();
            let mut bv = bv.clone();
            av.sort();
            bv.sort();
            av == bv
        })
    })
}
