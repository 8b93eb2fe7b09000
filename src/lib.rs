//! logwarden -- access-log anomaly triage with threat-intel enrichment.
//!
//! A batch (one log file) is read with a bounded tail window, scored by an
//! isolation forest, overlaid with known attack signatures, enriched once for
//! its dominant offending source, and returned as a ranked report.

pub mod api;
pub mod config;
pub mod detect;
pub mod enrich;
pub mod ingest;
pub mod pipeline;
pub mod report;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AppConfig;

/// Start the HTTP upload service.
pub async fn serve(config: &AppConfig, bind: &str) -> Result<()> {
    let analyzer = pipeline::Analyzer::from_config(config, false)?;

    std::fs::create_dir_all(&config.server.upload_dir).with_context(|| {
        format!(
            "failed to create upload dir {}",
            config.server.upload_dir.display()
        )
    })?;

    let state = api::state::AppState {
        analyzer: Arc::new(analyzer),
        upload_dir: config.server.upload_dir.clone(),
        max_upload_bytes: config.server.max_upload_bytes,
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = bind.parse()?;
    tracing::info!(%addr, "logwarden listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
