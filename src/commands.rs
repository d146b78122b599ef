use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::config::PublicAppConfig;
use crate::errors::{AppError, AppResult};
use crate::ingestion::CatalogSummary;
use crate::model::Coordinates;
use crate::postal::normalize_cep;
use crate::resolver::{NearbyStore, StoreResolver};

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestStoresQuery {
    pub product_id: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CepQuery {
    pub cep: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CoordinatesQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProductsQuery {
    pub highlighted: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub config: PublicAppConfig,
    pub catalog: CatalogSummary,
    pub geocode_cache: CacheStats,
}

impl ServiceHealth {
    pub fn new(config: PublicAppConfig, catalog: CatalogSummary, geocode_cache: CacheStats) -> Self {
        Self {
            config,
            catalog,
            geocode_cache,
        }
    }
}

pub async fn nearest_stores(
    resolver: &StoreResolver,
    query: NearestStoresQuery,
) -> AppResult<Vec<NearbyStore>> {
    let product_id = required(query.product_id.as_deref(), "productId")?;
    let user = parse_location(query.lat.as_deref(), query.lon.as_deref())?;
    resolver.find_stores_for_product(&product_id, user).await
}

pub async fn nearest_stores_by_cep(
    resolver: &StoreResolver,
    query: CepQuery,
) -> AppResult<Vec<NearbyStore>> {
    let cep = normalize_cep(&required(query.cep.as_deref(), "cep")?)?;
    resolver.find_nearest_by_cep(&cep).await
}

pub async fn nearest_stores_by_coordinates(
    resolver: &StoreResolver,
    query: CoordinatesQuery,
) -> AppResult<Vec<NearbyStore>> {
    let user = parse_location(query.lat.as_deref(), query.lon.as_deref())?;
    resolver.find_nearest_by_coordinates(user).await
}

pub fn parse_location(lat: Option<&str>, lon: Option<&str>) -> AppResult<Coordinates> {
    let lat = parse_coordinate(lat, "lat", 90.0)?;
    let lon = parse_coordinate(lon, "lon", 180.0)?;
    Ok(Coordinates::new(lat, lon))
}

fn parse_coordinate(raw: Option<&str>, name: &str, bound: f64) -> AppResult<f64> {
    let raw = required(raw, name)?;
    let value: f64 = raw
        .parse()
        .map_err(|_| AppError::invalid_input(format!("{name} must be numeric, got {raw:?}")))?;
    if !value.is_finite() || value.abs() > bound {
        return Err(AppError::invalid_input(format!(
            "{name} must be between -{bound} and {bound}"
        )));
    }
    Ok(value)
}

fn required(raw: Option<&str>, name: &str) -> AppResult<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::invalid_input(format!("{name} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_locations() {
        let location = parse_location(Some(" -26.30 "), Some("-48.84")).unwrap();
        assert_eq!(location, Coordinates::new(-26.30, -48.84));
    }

    #[test]
    fn rejects_missing_or_malformed_locations() {
        let cases = [
            (None, Some("-48.84")),
            (Some("-26.30"), None),
            (Some(""), Some("-48.84")),
            (Some("abc"), Some("-48.84")),
            (Some("-26.30"), Some("NaN")),
            (Some("-26,30"), Some("-48.84")),
            (Some("-91"), Some("-48.84")),
            (Some("-26.30"), Some("inf")),
        ];
        for (lat, lon) in cases {
            let err = parse_location(lat, lon).unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{lat:?} {lon:?}");
        }
    }

    #[test]
    fn requires_non_blank_values() {
        assert!(required(Some("  "), "productId").is_err());
        assert_eq!(required(Some(" 12345 "), "productId").unwrap(), "12345");
    }
}
