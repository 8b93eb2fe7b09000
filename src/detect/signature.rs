//! Known-indicator overlay applied after statistical scoring.

use std::sync::Arc;

use tracing::debug;

use super::{AnalyzedRecord, ThreatLevel};

/// Request-path fragments that only show up when someone is probing for loot.
pub const DEFAULT_SIGNATURES: &[&str] = &[
    "/admin-backup",
    "/.env",
    "/passwords.txt",
    "/db_dump.sql",
    "/config.php",
];

#[derive(Debug, Clone)]
pub struct SignatureMatcher {
    // stored lowercased
    patterns: Arc<[String]>,
}

impl Default for SignatureMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURES.iter().copied())
    }
}

impl SignatureMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            patterns: patterns.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// First indicator contained in `request_line`, compared case-insensitively.
    pub fn first_match(&self, request_line: &str) -> Option<&str> {
        let haystack = request_line.to_lowercase();
        self.patterns
            .iter()
            .find(|p| haystack.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Force signature hits to anomalous, then escalate every anomaly to critical.
    pub fn apply(&self, records: &mut [AnalyzedRecord]) {
        for rec in records.iter_mut() {
            if let Some(indicator) = self.first_match(&rec.request_line) {
                debug!(ip = %rec.source_address, indicator, "Signature match");
                rec.anomaly_flag = true;
                rec.threat_level = ThreatLevel::Critical;
            }
        }

        if records.iter().any(|r| r.anomaly_flag) {
            for rec in records.iter_mut().filter(|r| r.anomaly_flag) {
                rec.threat_level = ThreatLevel::Critical;
            }
        }
    }
}
