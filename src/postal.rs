use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::trace;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::Coordinates;

pub const CEP_DIGITS: usize = 8;

/// CEP to coordinates. `Ok(None)` is an authoritative "no such CEP".
#[async_trait]
pub trait PostalLookup: Send + Sync {
    async fn lookup(&self, cep: &str) -> AppResult<Option<Coordinates>>;
}

/// Strips punctuation from a user-supplied CEP and insists on eight digits.
pub fn normalize_cep(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("cep is required"));
    }
    if trimmed
        .chars()
        .any(|c| !(c.is_ascii_digit() || c == '-' || c == '.' || c == ' '))
    {
        return Err(AppError::invalid_input(format!("cep {raw:?} is not numeric")));
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != CEP_DIGITS {
        return Err(AppError::invalid_input(format!(
            "cep must have {CEP_DIGITS} digits, got {}",
            digits.len()
        )));
    }
    Ok(digits)
}

pub struct AwesomeApiCepClient {
    http: reqwest::Client,
    endpoint: String,
}

impl AwesomeApiCepClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdv-locator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Self::new(
            config.cep_lookup_endpoint.clone(),
            Duration::from_millis(config.provider_timeout_ms),
        )
    }
}

#[async_trait]
impl PostalLookup for AwesomeApiCepClient {
    async fn lookup(&self, cep: &str) -> AppResult<Option<Coordinates>> {
        #[derive(Deserialize)]
        struct Response {
            lat: Option<LooseNumber>,
            lng: Option<LooseNumber>,
        }

        let response = self
            .http
            .get(format!("{}/{cep}", self.endpoint))
            .send()
            .await?;
        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST
        ) {
            trace!(cep, "postal lookup has no match");
            return Ok(None);
        }
        let parsed: Response = response.error_for_status()?.json().await?;

        let coordinates = match (
            parsed.lat.and_then(LooseNumber::as_f64),
            parsed.lng.and_then(LooseNumber::as_f64),
        ) {
            (Some(lat), Some(lon)) => Coordinates::checked(lat, lon),
            _ => None,
        };
        Ok(coordinates)
    }
}

/// The CEP service sends coordinates as strings; accept both forms.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    fn as_f64(self) -> Option<f64> {
        match self {
            LooseNumber::Number(value) => Some(value),
            LooseNumber::Text(text) => text.trim().replace(',', ".").parse().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_formatted_ceps() {
        assert_eq!(normalize_cep("89201-000").unwrap(), "89201000");
        assert_eq!(normalize_cep(" 89.201-000 ").unwrap(), "89201000");
        assert_eq!(normalize_cep("89201000").unwrap(), "89201000");
    }

    #[test]
    fn rejects_malformed_ceps() {
        for raw in ["", "   ", "8920100", "892010000", "89201-00a", "abc"] {
            let err = normalize_cep(raw).unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{raw:?}");
        }
    }

    #[test]
    fn loose_numbers_parse_strings_and_numbers() {
        assert_eq!(LooseNumber::Number(-26.3).as_f64(), Some(-26.3));
        assert_eq!(LooseNumber::Text("-48.84".into()).as_f64(), Some(-48.84));
        assert_eq!(LooseNumber::Text("-48,84".into()).as_f64(), Some(-48.84));
        assert_eq!(LooseNumber::Text("".into()).as_f64(), None);
    }
}
