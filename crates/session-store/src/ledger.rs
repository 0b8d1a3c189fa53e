//! Tag Ledger

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

/// Header line of the tags table
pub const TAGS_HEADER: &str = "time,tag";

/// One annotation of the recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagEntry {
    /// Seconds of recorded data before the tag
    pub elapsed_seconds: f64,
    /// Operator label or configuration change description
    pub label: String,
}

/// Append-only, chronologically ordered list of tags
#[derive(Debug, Clone, Default)]
pub struct TagLedger {
    entries: Vec<TagEntry>,
}

impl TagLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tag
    ///
    /// Entries never go back in time: an elapsed value lower than the last
    /// entry is raised to it.
    pub fn append(&mut self, elapsed: Duration, label: &str) -> &TagEntry {
        let mut elapsed_seconds = elapsed.as_secs_f64();
        if let Some(last) = self.entries.last() {
            elapsed_seconds = elapsed_seconds.max(last.elapsed_seconds);
        }

        let label = sanitize_label(label);
        debug!("Tag at {:.6}s: {}", elapsed_seconds, label);

        self.entries.push(TagEntry {
            elapsed_seconds,
            label,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// All entries in insertion order
    pub fn entries(&self) -> &[TagEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Render the ledger as the comma separated tags table
    pub fn to_table(&self) -> String {
        let mut table = String::with_capacity(TAGS_HEADER.len() + 1 + self.entries.len() * 32);
        table.push_str(TAGS_HEADER);
        table.push('\n');
        for entry in &self.entries {
            // Writing into a String cannot fail
            let _ = writeln!(table, "{:.6},{}", entry.elapsed_seconds, entry.label);
        }
        table
    }
}

/// Keep a label on a single two-column row
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            ',' => ';',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_table_format() {
        let mut ledger = TagLedger::new();
        ledger.append(Duration::from_millis(1500), "laser on");
        ledger.append(Duration::from_micros(2_000_250), "$V_{g_{1}}=-1.50\\text{ V}$");

        assert_eq!(
            ledger.to_table(),
            "time,tag\n1.500000,laser on\n2.000250,$V_{g_{1}}=-1.50\\text{ V}$\n"
        );
    }

    #[test]
    fn test_empty_table_has_header() {
        let ledger = TagLedger::new();
        assert_eq!(ledger.to_table(), "time,tag\n");
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_label_sanitized() {
        let mut ledger = TagLedger::new();
        let entry = ledger.append(Duration::ZERO, "a,b\nc");
        assert_eq!(entry.label, "a;b c");
        assert_eq!(ledger.to_table().lines().count(), 2);
    }

    #[test]
    fn test_clear() {
        let mut ledger = TagLedger::new();
        ledger.append(Duration::from_secs(1), "x");
        ledger.clear();
        assert!(ledger.is_empty());
    }

    proptest! {
        #[test]
        fn prop_entries_non_decreasing(times in proptest::collection::vec(0u64..10_000, 0..50)) {
            let mut ledger = TagLedger::new();
            for (i, t) in times.iter().enumerate() {
                ledger.append(Duration::from_millis(*t), &format!("tag{}", i));
            }
            prop_assert_eq!(ledger.len(), times.len());
            for pair in ledger.entries().windows(2) {
                prop_assert!(pair[0].elapsed_seconds <= pair[1].elapsed_seconds);
            }
            for (i, entry) in ledger.entries().iter().enumerate() {
                prop_assert_eq!(&entry.label, &format!("tag{}", i));
            }
        }
    }
}
