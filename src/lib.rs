mod address;
mod cache;
mod commands;
mod config;
mod distance;
mod errors;
mod geocode;
mod ingestion;
mod model;
mod postal;
mod resolver;
mod server;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use address::{normalize_address, postal_digits};
pub use cache::{CacheEntry, CacheStats, GeocodeCache, WarmSummary};
pub use commands::{
    nearest_stores, nearest_stores_by_cep, nearest_stores_by_coordinates, parse_location,
    CepQuery, CoordinatesQuery, NearestStoresQuery, ProductsQuery, ServiceHealth,
};
pub use config::{AppConfig, PublicAppConfig};
pub use distance::{distance_km, haversine_km, round_km, EARTH_RADIUS_KM};
pub use errors::{AppError, AppResult};
pub use geocode::{
    provider_from_config, GeocodeHit, GeocodeProvider, GoogleGeocoder, UnconfiguredGeocoder,
};
pub use ingestion::{
    parse_decimal, parse_flag, parse_links, parse_products, parse_stores, Catalog, CatalogSummary,
};
pub use model::{Coordinates, Product, ProductStoreLink, Store, StoreAddress};
pub use postal::{normalize_cep, AwesomeApiCepClient, PostalLookup};
pub use resolver::{product_id_variants, NearbyStore, StoreResolver};
pub use server::{router, serve};

pub struct AppState {
    config: AppConfig,
    resolver: StoreResolver,
}

impl AppState {
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let catalog = Catalog::load(&config)?;
        let provider = provider_from_config(&config)?;
        let cache = GeocodeCache::open(config.geocode_cache_path(), provider);
        let postal = AwesomeApiCepClient::from_config(&config)?;

        let summary = catalog.summary();
        info!(
            products = summary.products,
            stores = summary.stores,
            stores_with_coordinates = summary.stores_with_coordinates,
            links = summary.links,
            cached_addresses = cache.len(),
            cache_file = %cache.path().display(),
            "pdv locator initialized"
        );

        Ok(Self::from_parts(
            config,
            StoreResolver::new(catalog, cache, Arc::new(postal)),
        ))
    }

    pub fn from_parts(config: AppConfig, resolver: StoreResolver) -> Self {
        let resolver = resolver.with_limits(
            config.max_results,
            config.resolve_concurrency,
            config.cache_warm_workers,
        );
        Self { config, resolver }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn resolver(&self) -> &StoreResolver {
        &self.resolver
    }

    pub fn reload_catalog(&self) -> AppResult<CatalogSummary> {
        let catalog = Catalog::load(&self.config)?;
        Ok(self.resolver.reload_catalog(catalog))
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,pdv_locator=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
