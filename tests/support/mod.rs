#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pdv_locator::{
    AppError, AppResult, Catalog, Coordinates, GeocodeCache, GeocodeHit, GeocodeProvider,
    PostalLookup, ProductStoreLink, Store, StoreAddress, StoreResolver,
};

pub const USER: Coordinates = Coordinates {
    lat: -26.30,
    lon: -48.84,
};

/// Geocoder stub answering from a fixed table and counting every call.
pub struct StubGeocoder {
    answers: HashMap<String, Coordinates>,
    calls: AtomicUsize,
    delay: Duration,
}

impl StubGeocoder {
    pub fn new(answers: &[(&str, Coordinates)]) -> Arc<Self> {
        Self::delayed(answers, Duration::ZERO)
    }

    pub fn delayed(answers: &[(&str, Coordinates)], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answers: answers
                .iter()
                .map(|(key, coordinates)| (key.to_string(), *coordinates))
                .collect(),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeocodeProvider for StubGeocoder {
    async fn geocode(&self, address: &str) -> AppResult<Option<GeocodeHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.answers.get(address).map(|coordinates| GeocodeHit {
            coordinates: *coordinates,
            formatted_address: None,
        }))
    }
}

pub enum PostalAnswer {
    Found(Coordinates),
    Missing,
    Unreachable,
}

pub struct StubPostal {
    answer: PostalAnswer,
    calls: AtomicUsize,
}

impl StubPostal {
    pub fn new(answer: PostalAnswer) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostalLookup for StubPostal {
    async fn lookup(&self, _cep: &str) -> AppResult<Option<Coordinates>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            PostalAnswer::Found(coordinates) => Ok(Some(*coordinates)),
            PostalAnswer::Missing => Ok(None),
            PostalAnswer::Unreachable => Err(AppError::Provider("connection refused".into())),
        }
    }
}

/// Store `km` kilometres due north of [`USER`].
pub fn store_north_of_user(id: &str, km: f64) -> Store {
    let degrees = km / (pdv_locator::EARTH_RADIUS_KM * std::f64::consts::PI / 180.0);
    located_store(id, Coordinates::new(USER.lat + degrees, USER.lon))
}

pub fn located_store(id: &str, coordinates: Coordinates) -> Store {
    Store {
        id: id.to_string(),
        name: format!("Loja {id}"),
        address: StoreAddress {
            street: Some(format!("Rua {id}, 100")),
            neighborhood: Some("Centro".into()),
            city: Some("Joinville".into()),
            state: Some("SC".into()),
            postal_code: Some("89201-000".into()),
        },
        coordinates: Some(coordinates),
    }
}

pub fn unlocated_store(id: &str, street: &str) -> Store {
    Store {
        id: id.to_string(),
        name: format!("Loja {id}"),
        address: StoreAddress {
            street: Some(street.to_string()),
            neighborhood: None,
            city: Some("Joinville".into()),
            state: Some("SC".into()),
            postal_code: None,
        },
        coordinates: None,
    }
}

pub fn link(product_id: &str, store_id: &str) -> ProductStoreLink {
    ProductStoreLink {
        product_id: product_id.to_string(),
        store_id: store_id.to_string(),
    }
}

pub fn resolver(
    dir: &Path,
    stores: Vec<Store>,
    links: Vec<ProductStoreLink>,
    geocoder: Arc<dyn GeocodeProvider>,
    postal: Arc<dyn PostalLookup>,
) -> StoreResolver {
    let catalog = Catalog::new(Vec::new(), stores, links);
    let cache = GeocodeCache::open(dir.join("geocode-cache.json"), geocoder);
    StoreResolver::new(catalog, cache, postal)
}
