//! Batch pipeline: read, score, overlay signatures, enrich, assemble.
//!
//! Input problems collapse to [`AnalysisOutcome::NoData`] and dependency
//! problems are absorbed by the enricher. Only a scoring failure or a crashed
//! worker abandons the batch, as a single [`AnalysisError`].

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, NarrativeProvider};
use crate::detect::{AnalyzedRecord, DetectError, Detector, IsolationForest, SignatureMatcher};
use crate::enrich::{
    EnrichmentPolicy, GeminiGenerator, GeoLocator, IpApiLocator, OllamaGenerator, TextGenerator,
    ThreatEnricher,
};
use crate::ingest::{LogReader, LogRecord};
use crate::report::{self, AnalysisOutcome};
use crate::storage::{self, Pool};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("anomaly detection failed: {0}")]
    Detection(#[from] DetectError),

    #[error("analysis worker failed: {0}")]
    Worker(String),
}

pub struct Analyzer {
    reader: LogReader,
    detector: Detector,
    enricher: ThreatEnricher,
    max_records: usize,
    store: Option<Pool>,
}

impl Analyzer {
    /// `max_records` is capped at [`report::DEFAULT_MAX_RECORDS`].
    pub fn new(
        reader: LogReader,
        detector: Detector,
        enricher: ThreatEnricher,
        max_records: usize,
    ) -> Self {
        Self {
            reader,
            detector,
            enricher,
            max_records: max_records.min(report::DEFAULT_MAX_RECORDS),
            store: None,
        }
    }

    /// Persist flagged records of every batch. Insert failures are logged only.
    pub fn with_store(mut self, pool: Pool) -> Self {
        self.store = Some(pool);
        self
    }

    /// Build the pipeline and its clients from configuration. With `offline`
    /// set, no external service is ever contacted.
    pub fn from_config(config: &AppConfig, offline: bool) -> Result<Self> {
        let reader = LogReader::new(config.ingest.tail_window_bytes);

        let d = &config.detection;
        let forest = IsolationForest::new(d.trees, d.max_samples, d.contamination, d.seed)?;
        let detector = Detector::new(
            Arc::new(forest),
            SignatureMatcher::new(&config.signatures.paths),
        );

        let e = &config.enrichment;
        let policy = EnrichmentPolicy {
            geo_timeout: Duration::from_millis(e.geo_timeout_ms),
            narrative_timeout: Duration::from_secs(e.narrative_timeout_secs),
            narrative_attempts: e.narrative_attempts,
        };

        let enricher = if offline {
            info!("Offline mode: enrichment uses fallback values only");
            ThreatEnricher::new(None, None, policy)
        } else {
            let geo: Option<Arc<dyn GeoLocator>> = if e.geo_enabled {
                Some(Arc::new(IpApiLocator::new(&e.geo_url, policy.geo_timeout)?))
            } else {
                None
            };
            ThreatEnricher::new(geo, narrator_from_config(config, policy)?, policy)
        };

        let mut analyzer = Self::new(reader, detector, enricher, config.report.max_records);
        if config.storage.enabled {
            let pool = storage::open_pool(&config.storage.db_path)?;
            info!(path = %config.storage.db_path.display(), "Record store enabled");
            analyzer = analyzer.with_store(pool);
        }
        Ok(analyzer)
    }

    /// Analyze the file at `path` whose size is `size` bytes.
    pub async fn analyze_file(
        &self,
        path: &Path,
        size: u64,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let started = Instant::now();
        let batch_id = Uuid::new_v4();
        info!(%batch_id, path = %path.display(), size, "Starting batch analysis");

        let reader = self.reader;
        let owned_path = path.to_path_buf();
        let records = tokio::task::spawn_blocking(move || reader.read(&owned_path, size))
            .await
            .map_err(|e| AnalysisError::Worker(e.to_string()))?;

        let records = match records {
            Ok(r) => r,
            Err(e) => {
                warn!(%batch_id, error = %e, "Log file could not be read");
                return Ok(AnalysisOutcome::NoData);
            }
        };

        self.analyze_records(batch_id, records, started).await
    }

    /// Analyze an already-parsed batch (newest-first).
    pub async fn analyze(&self, records: Vec<LogRecord>) -> Result<AnalysisOutcome, AnalysisError> {
        self.analyze_records(Uuid::new_v4(), records, Instant::now())
            .await
    }

    async fn analyze_records(
        &self,
        batch_id: Uuid,
        records: Vec<LogRecord>,
        started: Instant,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        if records.is_empty() {
            info!(%batch_id, "No valid log lines in batch");
            return Ok(AnalysisOutcome::NoData);
        }

        let detector = self.detector.clone();
        let mut analyzed = tokio::task::spawn_blocking(move || detector.analyze(records))
            .await
            .map_err(|e| AnalysisError::Worker(e.to_string()))??;

        let enrichment = self.enricher.enrich(&mut analyzed).await;

        if let Some(pool) = &self.store {
            self.persist(pool, batch_id, &analyzed).await;
        }

        let report = report::assemble(batch_id, analyzed, enrichment, self.max_records);
        info!(
            %batch_id,
            lines = report.lines_parsed,
            insights = report.insights_found,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch analysis finished"
        );
        Ok(AnalysisOutcome::Report(report))
    }

    async fn persist(&self, pool: &Pool, batch_id: Uuid, records: &[AnalyzedRecord]) {
        let pool = pool.clone();
        let flagged: Vec<AnalyzedRecord> =
            records.iter().filter(|r| r.anomaly_flag).cloned().collect();

        let result = tokio::task::spawn_blocking(move || {
            let mut failed = 0usize;
            for rec in &flagged {
                if let Err(e) = storage::insert_record(&pool, batch_id, rec) {
                    warn!(%batch_id, ip = %rec.source_address, error = %e, "Failed to store record");
                    failed += 1;
                }
            }
            failed
        })
        .await;

        match result {
            Ok(0) => {}
            Ok(failed) => warn!(%batch_id, failed, "Some flagged records were not stored"),
            Err(e) => warn!(%batch_id, error = %e, "Record store worker failed"),
        }
    }
}

fn narrator_from_config(
    config: &AppConfig,
    policy: EnrichmentPolicy,
) -> Result<Option<Arc<dyn TextGenerator>>> {
    let n = &config.narrative;
    let narrator: Option<Arc<dyn TextGenerator>> = match n.provider {
        NarrativeProvider::Disabled => None,
        NarrativeProvider::Gemini => match n.api_key() {
            Some(key) => Some(Arc::new(GeminiGenerator::new(
                &n.url,
                key,
                n.model.clone(),
                policy.narrative_timeout,
            )?)),
            None => {
                info!(env = %n.api_key_env, "No Gemini API key set, narrative generation disabled");
                None
            }
        },
        NarrativeProvider::Ollama => Some(Arc::new(OllamaGenerator::new(
            &n.url,
            n.model.clone().unwrap_or_else(|| "llama3.2".to_string()),
            policy.narrative_timeout,
        )?)),
    };
    Ok(narrator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_record_cap_cannot_exceed_default() {
        let mut config = AppConfig::default();
        config.report.max_records = 1000;
        let analyzer = Analyzer::from_config(&config, true).unwrap();
        assert_eq!(analyzer.max_records, report::DEFAULT_MAX_RECORDS);

        config.report.max_records = 10;
        let analyzer = Analyzer::from_config(&config, true).unwrap();
        assert_eq!(analyzer.max_records, 10);
    }
}
