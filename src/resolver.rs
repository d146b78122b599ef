use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::address::normalize_address;
use crate::cache::{GeocodeCache, WarmSummary};
use crate::distance::{haversine_km, round_km};
use crate::errors::{AppError, AppResult};
use crate::ingestion::{Catalog, CatalogSummary};
use crate::model::{Coordinates, Product, Store};
use crate::postal::{normalize_cep, PostalLookup};

const DEFAULT_MAX_RESULTS: usize = 20;
const DEFAULT_RESOLVE_CONCURRENCY: usize = 8;
const DEFAULT_WARM_WORKERS: usize = 4;
const PRODUCT_ID_SCHEME_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyStore {
    pub id: String,
    pub name: String,
    pub postal_code: Option<String>,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
}

impl NearbyStore {
    fn new(store: Store, location: Coordinates, distance_km: f64) -> Self {
        Self {
            address: store.address.display(),
            postal_code: store.address.postal_code,
            id: store.id,
            name: store.name,
            latitude: location.lat,
            longitude: location.lon,
            distance_km: round_km(distance_km),
        }
    }
}

/// Answers "which stores near me carry this product", filling in missing
/// store coordinates through the geocode cache as it goes.
pub struct StoreResolver {
    catalog: Arc<RwLock<Catalog>>,
    cache: GeocodeCache,
    postal: Arc<dyn PostalLookup>,
    max_results: usize,
    resolve_concurrency: usize,
    warm_workers: usize,
}

impl StoreResolver {
    pub fn new(catalog: Catalog, cache: GeocodeCache, postal: Arc<dyn PostalLookup>) -> Self {
        Self {
            catalog: Arc::new(RwLock::new(catalog)),
            cache,
            postal,
            max_results: DEFAULT_MAX_RESULTS,
            resolve_concurrency: DEFAULT_RESOLVE_CONCURRENCY,
            warm_workers: DEFAULT_WARM_WORKERS,
        }
    }

    pub fn with_limits(
        mut self,
        max_results: usize,
        resolve_concurrency: usize,
        warm_workers: usize,
    ) -> Self {
        self.max_results = max_results.max(1);
        self.resolve_concurrency = resolve_concurrency.max(1);
        self.warm_workers = warm_workers.max(1);
        self
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    pub fn catalog_summary(&self) -> CatalogSummary {
        self.catalog.read().summary()
    }

    pub fn products(&self, highlighted_only: bool) -> Vec<Product> {
        self.catalog.read().products(highlighted_only)
    }

    pub fn reload_catalog(&self, catalog: Catalog) -> CatalogSummary {
        let summary = catalog.summary();
        *self.catalog.write() = catalog;
        debug!(?summary, "catalog replaced");
        summary
    }

    pub async fn find_stores_for_product(
        &self,
        product_id: &str,
        user: Coordinates,
    ) -> AppResult<Vec<NearbyStore>> {
        let product_id = product_id.trim();
        if product_id.is_empty() {
            return Err(AppError::invalid_input("productId is required"));
        }
        ensure_user_location(user)?;

        let candidates = self.stores_for_product(product_id);
        trace!(product_id, candidates = candidates.len(), "stores linked to product");
        Ok(self.rank(candidates, user).await)
    }

    pub async fn find_nearest_by_cep(&self, cep: &str) -> AppResult<Vec<NearbyStore>> {
        let cep = normalize_cep(cep)?;
        let user = match self.postal.lookup(&cep).await {
            Ok(Some(location)) => location,
            Ok(None) => return Err(AppError::not_found(format!("cep {cep} not found"))),
            Err(err) => {
                warn!(?err, cep = %cep, "postal lookup failed");
                return Err(AppError::not_found(format!("cep {cep} could not be located")));
            }
        };
        Ok(self.rank(self.all_stores(), user).await)
    }

    pub async fn find_nearest_by_coordinates(
        &self,
        user: Coordinates,
    ) -> AppResult<Vec<NearbyStore>> {
        ensure_user_location(user)?;
        Ok(self.rank(self.all_stores(), user).await)
    }

    /// Geocodes every store still missing coordinates, off the request path,
    /// then copies the results into the catalog.
    pub async fn warm_geocode_cache(&self) -> WarmSummary {
        let pending: Vec<(String, String)> = self
            .catalog
            .read()
            .stores()
            .iter()
            .filter(|store| store.coordinates.is_none())
            .filter_map(|store| {
                normalize_address(&store.address).map(|key| (store.id.clone(), key))
            })
            .collect();

        let summary = self
            .cache
            .warm(pending.iter().map(|(_, key)| key.clone()), self.warm_workers)
            .await;

        let mut catalog = self.catalog.write();
        for (store_id, key) in &pending {
            if let Some(entry) = self.cache.get(key) {
                catalog.set_coordinates(store_id, entry.coordinates());
            }
        }
        summary
    }

    fn all_stores(&self) -> Vec<Store> {
        self.catalog.read().stores().to_vec()
    }

    /// Distinct stores linked to any variant of `product_id`, in the order
    /// the link table first mentions them.
    fn stores_for_product(&self, product_id: &str) -> Vec<Store> {
        let variants = product_id_variants(product_id);
        let catalog = self.catalog.read();
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for link in catalog.links() {
            if !variants.iter().any(|variant| *variant == link.product_id) {
                continue;
            }
            if !seen.insert(link.store_id.as_str()) {
                continue;
            }
            match catalog.store(&link.store_id) {
                Some(store) => matched.push(store.clone()),
                None => trace!(store_id = %link.store_id, "link points at unknown store"),
            }
        }
        matched
    }

    async fn rank(&self, candidates: Vec<Store>, user: Coordinates) -> Vec<NearbyStore> {
        let located: Vec<Option<(Store, Coordinates)>> = stream::iter(candidates)
            .map(|store| self.locate(store))
            .buffered(self.resolve_concurrency)
            .collect()
            .await;

        let mut ranked: Vec<(f64, NearbyStore)> = located
            .into_iter()
            .flatten()
            .map(|(store, location)| {
                let distance = haversine_km(user.lat, user.lon, location.lat, location.lon);
                (distance, NearbyStore::new(store, location, distance))
            })
            .collect();
        // stable: equal distances keep link-table order
        ranked.sort_by(|(a, _), (b, _)| a.total_cmp(b));
        ranked.truncate(self.max_results);
        ranked.into_iter().map(|(_, store)| store).collect()
    }

    async fn locate(&self, store: Store) -> Option<(Store, Coordinates)> {
        if let Some(location) = store.coordinates {
            return Some((store, location));
        }
        let Some(key) = normalize_address(&store.address) else {
            debug!(store_id = %store.id, "store has no geocodable address");
            return None;
        };
        match self.cache.resolve(&key).await {
            Some(location) => {
                self.catalog.write().set_coordinates(&store.id, location);
                Some((store, location))
            }
            None => {
                debug!(store_id = %store.id, address = %key, "store location unavailable; omitting");
                None
            }
        }
    }
}

/// The id itself, plus its sibling under the other upstream numbering scheme:
/// five-digit ids starting with `9` also match the same id starting with `0`,
/// and vice versa.
pub fn product_id_variants(product_id: &str) -> Vec<String> {
    let id = product_id.trim();
    let mut variants = vec![id.to_string()];
    if id.len() == PRODUCT_ID_SCHEME_LEN && id.bytes().all(|b| b.is_ascii_digit()) {
        let swapped = match id.as_bytes().first() {
            Some(b'9') => Some('0'),
            Some(b'0') => Some('9'),
            _ => None,
        };
        if let Some(lead) = swapped {
            variants.push(format!("{lead}{}", &id[1..]));
        }
    }
    variants
}

fn ensure_user_location(user: Coordinates) -> AppResult<()> {
    let valid = user.lat.is_finite()
        && user.lon.is_finite()
        && (-90.0..=90.0).contains(&user.lat)
        && (-180.0..=180.0).contains(&user.lon);
    if valid {
        Ok(())
    } else {
        Err(AppError::invalid_input(format!(
            "invalid user location ({}, {})",
            user.lat, user.lon
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_leading_nine_and_zero_on_five_digit_ids() {
        assert_eq!(product_id_variants("09123"), vec!["09123", "99123"]);
        assert_eq!(product_id_variants("99123"), vec!["99123", "09123"]);
        assert_eq!(product_id_variants(" 01234 "), vec!["01234", "91234"]);
    }

    #[test]
    fn leaves_other_ids_alone() {
        assert_eq!(product_id_variants("12345"), vec!["12345"]);
        assert_eq!(product_id_variants("0912"), vec!["0912"]);
        assert_eq!(product_id_variants("091234"), vec!["091234"]);
        assert_eq!(product_id_variants("9A123"), vec!["9A123"]);
        assert_eq!(product_id_variants("９1234"), vec!["９1234"]);
    }

    #[test]
    fn rejects_out_of_range_user_locations() {
        assert!(ensure_user_location(Coordinates::new(-26.3, -48.84)).is_ok());
        assert!(ensure_user_location(Coordinates::new(0.0, 0.0)).is_ok());
        assert!(ensure_user_location(Coordinates::new(f64::NAN, 0.0)).is_err());
        assert!(ensure_user_location(Coordinates::new(95.0, 0.0)).is_err());
        assert!(ensure_user_location(Coordinates::new(0.0, -181.0)).is_err());
    }
}
