//! Anomaly detection: statistical outlier scoring plus the signature overlay.

pub mod forest;
pub mod signature;

pub use forest::IsolationForest;
pub use signature::SignatureMatcher;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ingest::LogRecord;

pub const PLACEHOLDER_LOCATION: &str = "-";
pub const PLACEHOLDER_NARRATIVE: &str = "Pending Analysis...";
pub const PLACEHOLDER_TECHNIQUE: &str = "N/A";
pub const PLACEHOLDER_ACTION: &str = "-";

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("feature {index} of record {record} is not finite")]
    InvalidFeature { record: usize, index: usize },

    #[error("contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("ensemble needs at least one tree")]
    EmptyEnsemble,
}

/// Severity attached to a record. Anything anomalous is treated as critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreatLevel {
    Low,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl ThreatLevel {
    /// Same label as the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "Low",
            ThreatLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log record with its detection and enrichment annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedRecord {
    #[serde(rename = "ip")]
    pub source_address: String,
    pub timestamp: String,
    #[serde(rename = "request")]
    pub request_line: String,
    #[serde(rename = "status")]
    pub status_code: u16,
    #[serde(rename = "size")]
    pub response_size: u64,
    #[serde(rename = "is_anomaly")]
    pub anomaly_flag: bool,
    pub threat_level: ThreatLevel,
    #[serde(rename = "origin_country")]
    pub origin_location: String,
    #[serde(rename = "ai_analysis")]
    pub narrative: String,
    #[serde(rename = "mitre_id")]
    pub mitre_technique_id: String,
    #[serde(rename = "action_command")]
    pub suggested_action: String,
}

impl AnalyzedRecord {
    pub fn new(record: LogRecord, anomaly_flag: bool) -> Self {
        Self {
            source_address: record.source_address,
            timestamp: record.timestamp,
            request_line: record.request_line,
            status_code: record.status_code,
            response_size: record.response_size,
            anomaly_flag,
            threat_level: ThreatLevel::Low,
            origin_location: PLACEHOLDER_LOCATION.to_string(),
            narrative: PLACEHOLDER_NARRATIVE.to_string(),
            mitre_technique_id: PLACEHOLDER_TECHNIQUE.to_string(),
            suggested_action: PLACEHOLDER_ACTION.to_string(),
        }
    }
}

/// Unsupervised scorer flagging structurally rare feature vectors.
pub trait OutlierScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Return one flag per input row, in input order.
    fn flag(&self, features: &[[f64; 2]]) -> Result<Vec<bool>, DetectError>;
}

/// Statistical scoring followed by the signature overlay.
#[derive(Clone)]
pub struct Detector {
    scorer: Arc<dyn OutlierScorer>,
    signatures: SignatureMatcher,
}

impl Detector {
    pub fn new(scorer: Arc<dyn OutlierScorer>, signatures: SignatureMatcher) -> Self {
        Self { scorer, signatures }
    }

    pub fn signatures(&self) -> &SignatureMatcher {
        &self.signatures
    }

    /// Score a batch. Output keeps the input order.
    pub fn analyze(&self, records: Vec<LogRecord>) -> Result<Vec<AnalyzedRecord>, DetectError> {
        let features: Vec<[f64; 2]> = records.iter().map(LogRecord::features).collect();
        let flags = self.scorer.flag(&features)?;
        debug!(
            scorer = self.scorer.name(),
            flagged = flags.iter().filter(|f| **f).count(),
            total = flags.len(),
            "Statistical scoring complete"
        );

        let mut analyzed: Vec<AnalyzedRecord> = records
            .into_iter()
            .zip(flags)
            .map(|(rec, flag)| AnalyzedRecord::new(rec, flag))
            .collect();

        self.signatures.apply(&mut analyzed);
        Ok(analyzed)
    }
}
