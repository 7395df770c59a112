//! Point-in-time view of every live allocation.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::record::{AllocationRecord, Category, Status};

/// One occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub index: usize,
    pub address: usize,
    pub size: usize,
    pub category: Category,
    pub status: Status,
    pub site: String,
    pub sequence: u64,
}

impl ReportEntry {
    #[must_use]
    pub fn from_record(index: usize, record: &AllocationRecord) -> Self {
        Self {
            index,
            address: record.address.addr(),
            size: record.size,
            category: record.category,
            status: record.status,
            site: record.site.clone(),
            sequence: record.sequence,
        }
    }
}

/// Live allocations in ascending slot order plus the aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
    pub occupied_count: usize,
    pub total_bytes: usize,
    pub capacity: usize,
}

impl Report {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes per category, omitting categories with nothing live.
    #[must_use]
    pub fn by_category(&self) -> BTreeMap<Category, usize> {
        let mut totals = BTreeMap::new();
        for entry in &self.entries {
            *totals.entry(entry.category).or_insert(0) += entry.size;
        }
        totals
    }

    /// Largest live allocation, if any.
    #[must_use]
    pub fn largest(&self) -> Option<&ReportEntry> {
        self.entries.iter().max_by_key(|e| (e.size, std::cmp::Reverse(e.index)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- MEMORY ALLOCATION REPORT ---")?;
        writeln!(f, "Total Blocks: {}", self.occupied_count)?;
        writeln!(f, "Total Allocated: {} bytes", self.total_bytes)?;
        for e in &self.entries {
            writeln!(
                f,
                "Block {}: {:#x}, {} bytes, Type: {}, Status: {}, Site: {}",
                e.index, e.address, e.size, e.category, e.status, e.site
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, size: usize, category: Category) -> ReportEntry {
        ReportEntry {
            index,
            address: 0x1000 + index * 0x100,
            size,
            category,
            status: Status::Allocated,
            site: format!("demo.rs:{index}"),
            sequence: index as u64 + 1,
        }
    }

    fn sample() -> Report {
        Report {
            entries: vec![
                entry(0, 24, Category::Dynamic),
                entry(1, 50, Category::Temporary),
                entry(3, 24, Category::Dynamic),
            ],
            occupied_count: 3,
            total_bytes: 98,
            capacity: 8,
        }
    }

    #[test]
    fn display_lists_every_block() {
        let text = sample().to_string();
        assert!(text.starts_with("--- MEMORY ALLOCATION REPORT ---\n"));
        assert!(text.contains("Total Blocks: 3\n"));
        assert!(text.contains("Total Allocated: 98 bytes\n"));
        assert!(text.contains(
            "Block 1: 0x1100, 50 bytes, Type: temporary, Status: allocated, Site: demo.rs:1"
        ));
        assert_eq!(text.lines().filter(|l| l.starts_with("Block ")).count(), 3);
    }

    #[test]
    fn empty_report_still_renders_header() {
        let report = Report {
            entries: Vec::new(),
            occupied_count: 0,
            total_bytes: 0,
            capacity: 8,
        };
        assert!(report.is_empty());
        assert_eq!(
            report.to_string(),
            "--- MEMORY ALLOCATION REPORT ---\nTotal Blocks: 0\nTotal Allocated: 0 bytes\n"
        );
        assert!(report.largest().is_none());
    }

    #[test]
    fn category_totals() {
        let totals = sample().by_category();
        assert_eq!(totals.get(&Category::Dynamic), Some(&48));
        assert_eq!(totals.get(&Category::Temporary), Some(&50));
        assert_eq!(totals.get(&Category::Static), None);
    }

    #[test]
    fn largest_prefers_lowest_index_on_ties() {
        let mut report = sample();
        report.entries.push(entry(5, 50, Category::Persistent));
        assert_eq!(report.largest().map(|e| e.index), Some(1));
    }

    #[test]
    fn json_carries_entries_and_totals() {
        let parsed: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(parsed["occupied_count"], 3);
        assert_eq!(parsed["total_bytes"], 98);
        assert_eq!(parsed["entries"][1]["category"], "temporary");
        assert_eq!(parsed["entries"][2]["index"], 3);
    }
}
