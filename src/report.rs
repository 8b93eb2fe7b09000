//! Ranked, size-bounded batch report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::AnalyzedRecord;
use crate::enrich::Enrichment;

/// Records returned per batch.
pub const DEFAULT_MAX_RECORDS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub batch_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Records produced by the reader.
    pub lines_parsed: usize,
    /// Flagged records in the whole batch, before truncation.
    pub insights_found: usize,
    pub enrichment: Option<Enrichment>,
    pub records: Vec<AnalyzedRecord>,
}

impl AnalysisReport {
    pub fn summary(&self) -> String {
        format!(
            "Analyzed {} lines. Found {} insights.",
            self.lines_parsed, self.insights_found
        )
    }
}

/// Result of one batch.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// The file held no parseable lines (or could not be read).
    NoData,
    Report(AnalysisReport),
}

impl AnalysisOutcome {
    pub fn report(&self) -> Option<&AnalysisReport> {
        match self {
            AnalysisOutcome::NoData => None,
            AnalysisOutcome::Report(r) => Some(r),
        }
    }
}

/// Anomalies first, original order kept within each group, then truncated.
pub fn assemble(
    batch_id: Uuid,
    mut records: Vec<AnalyzedRecord>,
    enrichment: Option<Enrichment>,
    max_records: usize,
) -> AnalysisReport {
    let lines_parsed = records.len();
    let insights_found = records.iter().filter(|r| r.anomaly_flag).count();

    // sort_by_key is stable
    records.sort_by_key(|r| !r.anomaly_flag);
    records.truncate(max_records);

    AnalysisReport {
        batch_id,
        generated_at: Utc::now(),
        lines_parsed,
        insights_found,
        enrichment,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::LogRecord;

    fn rec(i: usize, flag: bool) -> AnalyzedRecord {
        AnalyzedRecord::new(
            LogRecord {
                source_address: format!("10.0.0.{}", i),
                timestamp: "t".into(),
                request_line: "GET / HTTP/1.1".into(),
                status_code: 200,
                response_size: i as u64,
            },
            flag,
        )
    }

    #[test]
    fn test_anomalies_first_and_order_is_stable() {
        let recs = vec![rec(0, false), rec(1, true), rec(2, false), rec(3, true), rec(4, false)];
        let report = assemble(Uuid::new_v4(), recs, None, DEFAULT_MAX_RECORDS);
        let sizes: Vec<u64> = report.records.iter().map(|r| r.response_size).collect();
        assert_eq!(sizes, vec![1, 3, 0, 2, 4]);
        assert_eq!(report.lines_parsed, 5);
        assert_eq!(report.insights_found, 2);
    }

    #[test]
    fn test_truncates_but_counts_whole_batch() {
        let recs: Vec<_> = (0..250).map(|i| rec(i, i % 50 == 0)).collect();
        let report = assemble(Uuid::new_v4(), recs, None, DEFAULT_MAX_RECORDS);
        assert_eq!(report.records.len(), 100);
        assert_eq!(report.lines_parsed, 250);
        assert_eq!(report.insights_found, 5);
        assert!(report.records[..5].iter().all(|r| r.anomaly_flag));
        assert_eq!(report.records[5].response_size, 1);
        assert_eq!(report.summary(), "Analyzed 250 lines. Found 5 insights.");
    }
}
