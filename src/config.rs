//! TOML configuration for logwarden.
//!
//! Layered model: compiled-in defaults, overridden by a TOML file found via
//! `--config`, the `LOGWARDEN_CONFIG` environment variable, or the standard
//! system location. Secrets are never stored in the file; the narrative API
//! key is read from the environment variable named in `[narrative]`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::signature::DEFAULT_SIGNATURES;
use crate::ingest::DEFAULT_TAIL_WINDOW_BYTES;
use crate::report::DEFAULT_MAX_RECORDS;

const SYSTEM_CONFIG_PATH: &str = "/etc/logwarden/logwarden.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub signatures: SignatureConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub narrative: NarrativeConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit` (from `--config`); an error here is fatal.
    /// 2. The path in `LOGWARDEN_CONFIG`.
    /// 3. `/etc/logwarden/logwarden.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("LOGWARDEN_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LOGWARDEN_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory for in-flight uploads. Each upload is removed after analysis.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            upload_dir: std::env::temp_dir(),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Files larger than this are read from the tail only.
    pub tail_window_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            tail_window_bytes: DEFAULT_TAIL_WINDOW_BYTES,
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub trees: usize,
    pub max_samples: usize,
    /// Expected outlier fraction, in (0, 0.5].
    pub contamination: f64,
    pub seed: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            trees: 50,
            max_samples: 256,
            contamination: 0.05,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Request-path fragments matched case-insensitively.
    pub paths: Vec<String>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            paths: DEFAULT_SIGNATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub geo_enabled: bool,
    pub geo_url: String,
    pub geo_timeout_ms: u64,
    pub narrative_timeout_secs: u64,
    pub narrative_attempts: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            geo_enabled: true,
            geo_url: "http://ip-api.com".to_string(),
            geo_timeout_ms: 1000,
            narrative_timeout_secs: 15,
            narrative_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeProvider {
    /// Always use the fallback narrative.
    Disabled,
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub provider: NarrativeProvider,
    /// Base URL of the provider API.
    pub url: String,
    /// Model name. For Gemini, `None` means discover one at first use.
    pub model: Option<String>,
    /// Environment variable holding the API key (Gemini only).
    pub api_key_env: String,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            provider: NarrativeProvider::Gemini,
            url: "https://generativelanguage.googleapis.com".to_string(),
            model: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

impl NarrativeConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Report / storage / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Records returned per batch, at most 100.
    pub max_records: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Append flagged records to the SQLite store. Off by default.
    pub enabled: bool,
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: PathBuf::from("data/logwarden.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
