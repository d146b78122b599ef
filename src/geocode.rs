use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::Coordinates;

const MIN_REQUEST_GAP_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeHit {
    pub coordinates: Coordinates,
    pub formatted_address: Option<String>,
}

/// Free-form address to coordinates. `Ok(None)` means the provider answered
/// but found nothing; transport, quota and credential problems are errors.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn geocode(&self, address: &str) -> AppResult<Option<GeocodeHit>>;
}

/// Picks the HTTP geocoder when a key is configured, otherwise a provider
/// that refuses every lookup so the cache keeps serving what it already has.
pub fn provider_from_config(config: &AppConfig) -> AppResult<Arc<dyn GeocodeProvider>> {
    match config.google_geocoding_api_key.clone() {
        Some(key) => {
            let client = GoogleGeocoder::new(
                config.geocoding_endpoint.clone(),
                key,
                Duration::from_millis(config.provider_timeout_ms),
                config.geocode_rate_limit_qps,
            )?;
            Ok(Arc::new(client))
        }
        None => {
            debug!("no geocoding key configured; address lookups will miss");
            Ok(Arc::new(UnconfiguredGeocoder))
        }
    }
}

pub struct GoogleGeocoder {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    spacing: RequestSpacing,
}

impl GoogleGeocoder {
    pub fn new(
        endpoint: String,
        api_key: SecretString,
        timeout: Duration,
        qps: u32,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdv-locator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            spacing: RequestSpacing::per_second(qps),
        })
    }
}

#[async_trait]
impl GeocodeProvider for GoogleGeocoder {
    async fn geocode(&self, address: &str) -> AppResult<Option<GeocodeHit>> {
        #[derive(Deserialize)]
        struct Response {
            status: String,
            #[serde(default)]
            results: Vec<ResponseResult>,
            error_message: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseResult {
            formatted_address: Option<String>,
            geometry: Option<ResponseGeometry>,
        }

        #[derive(Deserialize)]
        struct ResponseGeometry {
            location: Option<ResponseLocation>,
        }

        #[derive(Deserialize)]
        struct ResponseLocation {
            lat: Option<f64>,
            lng: Option<f64>,
        }

        self.spacing.wait_turn().await;
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("address", address),
                ("region", "br"),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        match parsed.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Ok(None),
            other => {
                return Err(AppError::Provider(format!(
                    "geocoder returned {other}: {}",
                    parsed.error_message.unwrap_or_default()
                )))
            }
        }

        let hit = parsed.results.into_iter().find_map(|result| {
            let location = result.geometry?.location?;
            let coordinates = Coordinates::checked(location.lat?, location.lng?)?;
            Some(GeocodeHit {
                coordinates,
                formatted_address: result.formatted_address,
            })
        });
        trace!(address, found = hit.is_some(), "geocoder response parsed");
        Ok(hit)
    }
}

#[derive(Default)]
pub struct UnconfiguredGeocoder;

#[async_trait]
impl GeocodeProvider for UnconfiguredGeocoder {
    async fn geocode(&self, _address: &str) -> AppResult<Option<GeocodeHit>> {
        Err(AppError::Config(
            "GOOGLE_GEOCODING_API_KEY is not configured".into(),
        ))
    }
}

/// Spaces outbound geocoder requests at least `interval` apart across all
/// concurrent callers.
struct RequestSpacing {
    interval: Duration,
    last_sent: AsyncMutex<Option<Instant>>,
}

impl RequestSpacing {
    fn per_second(qps: u32) -> Self {
        let millis = (1000_f64 / f64::from(qps.max(1))).ceil() as u64;
        Self {
            interval: Duration::from_millis(millis.max(MIN_REQUEST_GAP_MS)),
            last_sent: AsyncMutex::new(None),
        }
    }

    async fn wait_turn(&self) {
        let mut last_sent = self.last_sent.lock().await;
        if let Some(sent) = *last_sent {
            let next = sent + self.interval;
            if next > Instant::now() {
                sleep_until(next).await;
            }
        }
        *last_sent = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spaces_consecutive_requests() {
        let spacing = RequestSpacing::per_second(10);
        let started = Instant::now();
        spacing.wait_turn().await;
        spacing.wait_turn().await;
        spacing.wait_turn().await;
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn request_gap_has_a_floor() {
        assert_eq!(RequestSpacing::per_second(0).interval, Duration::from_secs(1));
        assert_eq!(RequestSpacing::per_second(4).interval, Duration::from_millis(250));
        assert_eq!(
            RequestSpacing::per_second(1000).interval,
            Duration::from_millis(MIN_REQUEST_GAP_MS)
        );
    }

    #[tokio::test]
    async fn unconfigured_provider_refuses_lookups() {
        let err = UnconfiguredGeocoder
            .geocode("Rua XV de Novembro, Joinville, SC, Brasil")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn selects_unconfigured_provider_without_key() {
        let config = AppConfig::default();
        assert!(provider_from_config(&config).is_ok());
    }
}
