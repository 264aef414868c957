//! Per-invocation run summaries for operators.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::book::epoch_ms;

/// Outcome counts for one pipeline invocation, appended as a single JSON
/// line to a run-log file. Written for observability; nothing reads it back.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Which stage ran (chunker / ingest / embedder).
    pub stage: &'static str,
    /// Epoch milliseconds when the stage started.
    pub started_at_epoch_ms: u64,
    /// Epoch milliseconds when the stage finished.
    pub finished_at_epoch_ms: u64,
    /// Units the stage looked at (chapters, lines, rows).
    pub processed: usize,
    /// Units that completed.
    pub succeeded: usize,
    /// Units that failed and were recovered locally. The authoritative
    /// signal for operators that a run needs attention.
    pub failed: usize,
    /// Per-reason tallies of skipped units.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped: BTreeMap<&'static str, usize>,
    /// One representative record for spot checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Value>,
}

impl RunSummary {
    /// Starts a summary stamped with the current time.
    pub fn start(stage: &'static str) -> Self {
        Self {
            stage,
            started_at_epoch_ms: epoch_ms(),
            finished_at_epoch_ms: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: BTreeMap::new(),
            sample: None,
        }
    }

    /// Tallies one skipped unit under `reason`.
    pub fn record_skip(&mut self, reason: &'static str) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    /// Keeps the first sample offered; later ones are ignored.
    pub fn keep_sample<T: Serialize>(&mut self, record: &T) {
        if self.sample.is_none() {
            self.sample = serde_json::to_value(record).ok();
        }
    }

    /// Stamps the end time and appends the summary to `path`.
    pub fn finish_and_append(mut self, path: &Path) -> Result<()> {
        self.finished_at_epoch_ms = epoch_ms();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run log {}", path.display()))?;
        let line = serde_json::to_string(&self)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_serialize_compactly() {
        let mut summary = RunSummary::start("ingest");
        summary.processed = 10;
        summary.succeeded = 8;
        summary.failed = 2;
        summary.record_skip("malformed");
        summary.record_skip("malformed");

        let value = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(value["stage"], "ingest");
        assert_eq!(value["skipped"]["malformed"], 2);
        // No sample kept, so the field stays absent.
        assert!(value.get("sample").is_none());
    }

    #[test]
    fn appends_one_line_per_invocation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("runs.jsonl");

        for _ in 0..2 {
            RunSummary::start("chunker")
                .finish_and_append(&path)
                .expect("append");
        }
        let content = fs::read_to_string(&path).expect("read");
        assert_eq!(content.lines().count(), 2);
        for line in content.lines() {
            let value: Value = serde_json::from_str(line).expect("json line");
            assert_eq!(value["stage"], "chunker");
        }
    }
}
