use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prefix shared by every "did not run" trace entry.
pub const SKIPPED_PREFIX: &str = "Skipped";
pub const SKIPPED_CONDITION: &str = "Skipped due to condition";
pub const SKIPPED_ELSE: &str = "Skipped else — sibling matched";
pub const SKIPPED_UNRESOLVED: &str = "Skipped unresolved dependency";

/// Flat string → string execution record.
///
/// Nested calls are namespaced with dotted keys (`"node.type"`,
/// `"outer.inner.tool"`). Keys are kept sorted so exports and JSON output
/// are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    entries: BTreeMap<String, String>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy in every entry of `other` whose key is still free. Returns the
    /// keys that were already taken and therefore left out.
    pub fn merge_missing(&mut self, other: Trace) -> Vec<String> {
        let mut shadowed = Vec::new();
        for (k, v) in other.entries {
            if self.entries.contains_key(&k) {
                shadowed.push(k);
            } else {
                self.entries.insert(k, v);
            }
        }
        shadowed
    }

    /// Copy every entry of `other` under `"<prefix>.<key>"`.
    pub fn merge_namespaced(&mut self, prefix: &str, other: Trace) {
        for (k, v) in other.entries {
            self.entries.insert(format!("{prefix}.{k}"), v);
        }
    }

    /// True when `key` has an entry and that entry marks a skip.
    pub fn is_skipped(&self, key: &str) -> bool {
        self.get(key).is_some_and(is_skip_entry)
    }

    /// True when `key` has an entry that does not mark a skip.
    pub fn ran(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !is_skip_entry(v))
    }

    /// One `"<key> => <value>"` line per entry, key order.
    pub fn export(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push_str(" => ");
            out.push_str(v);
            out.push('\n');
        }
        out
    }
}

impl From<BTreeMap<String, String>> for Trace {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Trace {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

pub fn is_skip_entry(value: &str) -> bool {
    value.starts_with(SKIPPED_PREFIX)
}

/// Print a human-readable trace to stdout (stable + diff-friendly).
pub fn print_trace(tr: &Trace) {
    println!("TRACE entries={}", tr.len());
    print!("{}", tr.export());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_namespaced_prefixes_every_key() {
        let mut outer = Trace::new();
        outer.record("type", "plan");

        let inner: Trace = [("type", "tool"), ("tool", "x")].into_iter().collect();
        outer.merge_namespaced("A", inner);

        assert_eq!(outer.get("type"), Some("plan"));
        assert_eq!(outer.get("A.type"), Some("tool"));
        assert_eq!(outer.get("A.tool"), Some("x"));
        assert_eq!(outer.len(), 3);
    }

    #[test]
    fn merge_missing_keeps_existing_entries() {
        let mut outer = Trace::new();
        outer.record("type", "plan");

        let run: Trace = [("type", "tool://x => x"), ("type.tool", "x"), ("B", "y")]
            .into_iter()
            .collect();
        let shadowed = outer.merge_missing(run);

        assert_eq!(shadowed, vec!["type".to_string()]);
        assert_eq!(outer.get("type"), Some("plan"));
        assert_eq!(outer.get("type.tool"), Some("x"));
        assert_eq!(outer.get("B"), Some("y"));
    }

    #[test]
    fn skip_helpers_distinguish_missing_skipped_and_ran() {
        let mut tr = Trace::new();
        tr.record("a", "tool://a => ok");
        tr.record("b", SKIPPED_CONDITION);

        assert!(tr.ran("a"));
        assert!(!tr.is_skipped("a"));
        assert!(tr.is_skipped("b"));
        assert!(!tr.ran("b"));
        assert!(!tr.ran("c"));
        assert!(!tr.is_skipped("c"));
    }

    #[test]
    fn export_is_sorted_by_key() {
        let tr: Trace = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(tr.export(), "a => 1\nb => 2\n");
    }

    #[test]
    fn serializes_as_a_flat_json_object() {
        let tr: Trace = [("type", "unknown"), ("error", "foo://bar")]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&tr).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "unknown", "error": "foo://bar"})
        );
    }
}
