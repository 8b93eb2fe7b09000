//! Batch-level threat enrichment.
//!
//! Runs at most once per batch, for the most frequent source among flagged
//! records. Geolocation and narrative generation are both optional and both
//! time-bounded; every failure path lands on fixed fallback values, so the
//! enricher itself cannot fail.

pub mod geo;
pub mod narrative;

pub use geo::{GeoLocation, GeoLocator, IpApiLocator};
pub use narrative::{GeminiGenerator, Narrative, OllamaGenerator, TextGenerator};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::detect::AnalyzedRecord;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned HTTP {0}")]
    Status(u16),

    #[error("location could not be resolved: {0}")]
    Unresolved(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Time and attempt budget for the external calls.
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentPolicy {
    pub geo_timeout: Duration,
    pub narrative_timeout: Duration,
    pub narrative_attempts: u32,
}

impl Default for EnrichmentPolicy {
    fn default() -> Self {
        Self {
            geo_timeout: Duration::from_secs(1),
            narrative_timeout: Duration::from_secs(15),
            narrative_attempts: 3,
        }
    }
}

/// The values stamped onto every flagged record of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub source_address: String,
    pub origin_location: String,
    pub narrative: String,
    pub mitre_technique_id: String,
    pub suggested_action: String,
    /// True when the narrative came from a generator rather than the fallback.
    pub generated: bool,
}

impl Enrichment {
    pub fn apply(&self, records: &mut [AnalyzedRecord]) {
        for rec in records.iter_mut().filter(|r| r.anomaly_flag) {
            rec.origin_location = self.origin_location.clone();
            rec.narrative = self.narrative.clone();
            rec.mitre_technique_id = self.mitre_technique_id.clone();
            rec.suggested_action = self.suggested_action.clone();
        }
    }
}

/// Most frequent address among flagged records. Ties go to whichever address
/// appears first in record order.
pub fn dominant_source(records: &[AnalyzedRecord]) -> Option<&str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for rec in records.iter().filter(|r| r.anomaly_flag) {
        let count = counts.entry(rec.source_address.as_str()).or_insert(0);
        if *count == 0 {
            order.push(rec.source_address.as_str());
        }
        *count += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for addr in order {
        let n = counts[addr];
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((addr, n));
        }
    }
    best.map(|(addr, _)| addr)
}

pub struct ThreatEnricher {
    geo: Option<Arc<dyn GeoLocator>>,
    narrator: Option<Arc<dyn TextGenerator>>,
    policy: EnrichmentPolicy,
}

impl ThreatEnricher {
    pub fn new(
        geo: Option<Arc<dyn GeoLocator>>,
        narrator: Option<Arc<dyn TextGenerator>>,
        policy: EnrichmentPolicy,
    ) -> Self {
        Self {
            geo,
            narrator,
            policy,
        }
    }

    /// No external services; every batch gets fallback values.
    pub fn offline() -> Self {
        Self::new(None, None, EnrichmentPolicy::default())
    }

    pub fn policy(&self) -> EnrichmentPolicy {
        self.policy
    }

    /// Enrich the batch in place. Returns `None` when nothing is flagged, in
    /// which case no external service is contacted.
    pub async fn enrich(&self, records: &mut [AnalyzedRecord]) -> Option<Enrichment> {
        let address = dominant_source(records)?.to_string();
        info!(ip = %address, "Enriching dominant offending source");

        let location = self.locate(&address).await;
        let (narrative, generated) = self.narrate(&address, &location).await;

        let enrichment = Enrichment {
            source_address: address,
            origin_location: location,
            narrative: narrative.summary,
            mitre_technique_id: narrative.technique_id,
            suggested_action: narrative.command,
            generated,
        };
        enrichment.apply(records);
        Some(enrichment)
    }

    async fn locate(&self, address: &str) -> String {
        let Some(geo) = &self.geo else {
            return geo::fallback_location(address).to_string();
        };

        match tokio::time::timeout(self.policy.geo_timeout, geo.locate(address)).await {
            Ok(Ok(loc)) => loc.to_string(),
            Ok(Err(e)) => {
                warn!(ip = %address, locator = geo.name(), error = %e, "Geolocation failed, using fallback");
                geo::fallback_location(address).to_string()
            }
            Err(_) => {
                warn!(
                    ip = %address,
                    locator = geo.name(),
                    timeout = ?self.policy.geo_timeout,
                    "Geolocation timed out, using fallback"
                );
                geo::fallback_location(address).to_string()
            }
        }
    }

    async fn narrate(&self, address: &str, location: &str) -> (Narrative, bool) {
        let Some(narrator) = &self.narrator else {
            return (Narrative::fallback(address), false);
        };

        let prompt = narrative::build_prompt(address, location);
        let attempts = self.policy.narrative_attempts.max(1);
        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(
                self.policy.narrative_timeout,
                narrator.generate(&prompt),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(EnrichError::Timeout(self.policy.narrative_timeout)),
            };

            match result {
                Ok(text) => {
                    info!(generator = narrator.name(), attempt, "Narrative generated");
                    return (Narrative::parse_reply(&text, address), true);
                }
                Err(e) => {
                    warn!(
                        generator = narrator.name(),
                        attempt,
                        attempts,
                        error = %e,
                        "Narrative attempt failed"
                    );
                }
            }
        }

        warn!(ip = %address, "All narrative attempts failed, using defaults");
        (Narrative::fallback(address), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::LogRecord;

    fn flagged(ip: &str, flag: bool) -> AnalyzedRecord {
        AnalyzedRecord::new(
            LogRecord {
                source_address: ip.into(),
                timestamp: "t".into(),
                request_line: "GET / HTTP/1.1".into(),
                status_code: 200,
                response_size: 1,
            },
            flag,
        )
    }

    #[test]
    fn test_dominant_source_counts_only_flagged() {
        let recs = vec![
            flagged("10.0.0.1", false),
            flagged("10.0.0.1", false),
            flagged("10.0.0.1", false),
            flagged("10.0.0.2", true),
            flagged("10.0.0.3", true),
            flagged("10.0.0.3", true),
        ];
        assert_eq!(dominant_source(&recs), Some("10.0.0.3"));
    }

    #[test]
    fn test_dominant_source_tie_goes_to_first_seen() {
        let recs = vec![
            flagged("10.0.0.9", true),
            flagged("10.0.0.4", true),
            flagged("10.0.0.4", true),
            flagged("10.0.0.9", true),
        ];
        assert_eq!(dominant_source(&recs), Some("10.0.0.9"));
    }

    #[test]
    fn test_dominant_source_none_when_clean() {
        assert_eq!(dominant_source(&[flagged("10.0.0.1", false)]), None);
        assert_eq!(dominant_source(&[]), None);
    }

    #[tokio::test]
    async fn test_offline_enrichment_uses_fallbacks_on_all_flagged() {
        let mut recs = vec![
            flagged("10.0.0.5", true),
            flagged("10.0.0.6", false),
            flagged("10.0.0.7", true),
        ];
        let e = ThreatEnricher::offline().enrich(&mut recs).await.unwrap();

        assert_eq!(e.source_address, "10.0.0.5");
        assert!(!e.generated);
        assert_eq!(e.mitre_technique_id, narrative::DEFAULT_TECHNIQUE);
        assert_eq!(e.suggested_action, "iptables -A INPUT -s 10.0.0.5 -j DROP");
        assert_eq!(e.origin_location, geo::fallback_location("10.0.0.5"));

        assert_eq!(recs[2].suggested_action, e.suggested_action);
        assert_eq!(recs[2].origin_location, e.origin_location);
        assert_eq!(recs[1].suggested_action, "-");
        assert_eq!(recs[1].mitre_technique_id, "N/A");
    }
}
