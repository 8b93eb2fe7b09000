//! Narrative generation: prompt, reply micro-format, and text-generation backends.
//!
//! The enricher asks for a single line of the form
//! `summary | technique id | mitigation command`. Backends only need to turn a
//! prompt into text; timeout and retry are applied by the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::EnrichError;

/// Longest summary kept when the reply does not follow the pipe format.
pub const MAX_FREEFORM_SUMMARY_CHARS: usize = 100;

pub const DEFAULT_NARRATIVE: &str = "Automated Defense Protocol Active";
pub const DEFAULT_TECHNIQUE: &str = "T1059";

/// A generic prompt-in, text-out capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, EnrichError>;
}

/// Summary, technique and mitigation for the batch's top offender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrative {
    pub summary: String,
    pub technique_id: String,
    pub command: String,
}

impl Narrative {
    /// Values used when no generator answers.
    pub fn fallback(address: &str) -> Self {
        Self {
            summary: DEFAULT_NARRATIVE.to_string(),
            technique_id: DEFAULT_TECHNIQUE.to_string(),
            command: block_command(address),
        }
    }

    /// Parse a generator reply. Anything short of three pipe-separated parts
    /// becomes a truncated free-form summary with the fallback technique and
    /// command kept.
    pub fn parse_reply(text: &str, address: &str) -> Self {
        let parts: Vec<&str> = text.split('|').collect();
        if parts.len() >= 3 {
            return Self {
                summary: parts[0].trim().to_string(),
                technique_id: parts[1].trim().to_string(),
                command: parts[2].trim().to_string(),
            };
        }

        let summary: String = text
            .replace('\n', " ")
            .chars()
            .take(MAX_FREEFORM_SUMMARY_CHARS)
            .collect();
        Self {
            summary,
            ..Self::fallback(address)
        }
    }
}

pub fn block_command(address: &str) -> String {
    format!("iptables -A INPUT -s {} -j DROP", address)
}

pub fn build_prompt(address: &str, location: &str) -> String {
    format!(
        "Analyze attack IP: {} ({}).\n\
         Reply on one line in exactly this format: \
         two-sentence summary (at most 25 words) | MITRE ATT&CK technique ID | iptables command to block it",
        address, location
    )
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

const GEMINI_DEFAULT_MODEL: &str = "models/gemini-pro";

/// Google Generative Language API (`generateContent`).
pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    configured_model: Option<String>,
    model: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiModelList {
    #[serde(default)]
    models: Vec<GeminiModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiModel {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EnrichError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            configured_model: model.map(|m| {
                if m.starts_with("models/") {
                    m
                } else {
                    format!("models/{}", m)
                }
            }),
            model: OnceCell::new(),
        })
    }

    /// Resolve the model once, on first use. A failed discovery is not cached,
    /// so the next attempt lists models again.
    async fn model(&self) -> Result<&str, EnrichError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                if let Some(m) = &self.configured_model {
                    return Ok(m.clone());
                }
                match self.discover_model().await {
                    Ok(Some(m)) => {
                        info!(model = %m, "Using discovered Gemini model");
                        Ok(m)
                    }
                    Ok(None) => {
                        warn!(model = GEMINI_DEFAULT_MODEL, "No listed Gemini model supports generateContent, using default");
                        Ok(GEMINI_DEFAULT_MODEL.to_string())
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(model.as_str())
    }

    async fn discover_model(&self) -> Result<Option<String>, EnrichError> {
        let url = format!("{}/v1beta/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EnrichError::Status(resp.status().as_u16()));
        }
        let list: GeminiModelList = resp.json().await?;
        Ok(list
            .models
            .into_iter()
            .find(|m| {
                m.name.contains("gemini")
                    && m.supported_generation_methods
                        .iter()
                        .any(|g| g == "generateContent")
            })
            .map(|m| m.name))
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String, EnrichError> {
        let model = self.model().await?;
        let url = format!("{}/v1beta/{}:generateContent", self.base_url, model);
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EnrichError::Status(resp.status().as_u16()));
        }

        let reply: GeminiResponse = resp.json().await?;
        let text: String = reply
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();
        if text.trim().is_empty() {
            return Err(EnrichError::InvalidResponse("empty candidate text".to_string()));
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Local Ollama server (`/api/generate`, non-streaming).
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EnrichError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<String, EnrichError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0.1 }
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(EnrichError::Status(resp.status().as_u16()));
        }
        let reply: OllamaGenerateResponse = resp.json().await?;
        Ok(reply.response)
    }
}
