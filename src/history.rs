//! Bounded CSV run history.
//!
//! One row per run. The file behaves as a fixed-capacity ring implemented
//! as truncate-on-write: the whole file is rewritten on append, dropping the
//! oldest rows beyond the limit, so the header is always row 1.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One run of the tool, as persisted to `data/history.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: String,
    pub run_id: String,
    /// `CHECKIN` or `AUTH`.
    pub stage: String,
    pub result: String,
    pub error_code: String,
    pub retry_count: u32,
    pub duration_ms: u64,
    pub notes: String,
}

/// Append one row, keeping at most `limit` data rows.
pub fn append_history(path: &Path, limit: usize, entry: HistoryEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create history directory: {}", parent.display()))?;
    }

    let mut entries = read_history(path)?;
    entries.push(entry);

    let keep = limit.max(1);
    if entries.len() > keep {
        entries.drain(..entries.len() - keep);
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open history file: {}", path.display()))?;
    for entry in &entries {
        writer
            .serialize(entry)
            .with_context(|| format!("failed to write history row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush history file: {}", path.display()))?;
    Ok(())
}

/// Read all rows; a missing file is an empty history.
pub fn read_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open history file: {}", path.display()))?;
    let mut entries = Vec::new();
    for record in reader.deserialize() {
        let entry: HistoryEntry =
            record.with_context(|| format!("malformed history row in {}", path.display()))?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(run_id: &str) -> HistoryEntry {
        HistoryEntry {
            ts: "2024-01-01T07:00:00+00:00".to_string(),
            run_id: run_id.to_string(),
            stage: "CHECKIN".to_string(),
            result: "CHECKIN_OK".to_string(),
            error_code: String::new(),
            retry_count: 0,
            duration_ms: 1200,
            notes: "success indicator detected".to_string(),
        }
    }

    #[test]
    fn test_append_creates_file_with_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data/history.csv");

        append_history(&path, 10, entry("run-1")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ts,run_id,stage,result,error_code,retry_count,duration_ms,notes"
        );
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.csv");

        append_history(&path, 10, entry("run-1")).unwrap();
        append_history(&path, 10, entry("run-2")).unwrap();

        let entries = read_history(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry("run-1"));
        assert_eq!(entries[1].run_id, "run-2");
    }

    #[test]
    fn test_oldest_rows_dropped_beyond_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.csv");

        for i in 0..7 {
            append_history(&path, 5, entry(&format!("run-{i}"))).unwrap();
        }

        let entries = read_history(&path).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.first().unwrap().run_id, "run-2");
        assert_eq!(entries.last().unwrap().run_id, "run-6");

        // Header survives the trim as row 1.
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("ts,run_id,stage"));
    }

    #[test]
    fn test_limit_zero_still_keeps_latest_row() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.csv");

        append_history(&path, 0, entry("run-1")).unwrap();
        append_history(&path, 0, entry("run-2")).unwrap();

        let entries = read_history(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].run_id, "run-2");
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let entries = read_history(&dir.path().join("absent.csv")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_notes_with_commas_survive() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.csv");

        let mut row = entry("run-1");
        row.notes = "UNKNOWN: no success indicator, after click".to_string();
        append_history(&path, 10, row.clone()).unwrap();

        let entries = read_history(&path).unwrap();
        assert_eq!(entries[0].notes, row.notes);
    }
}
