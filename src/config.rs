use std::path::PathBuf;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_GEOCODING_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
pub const DEFAULT_CEP_LOOKUP_ENDPOINT: &str = "https://cep.awesomeapi.com.br/json";
const DEFAULT_MAX_RESULTS: usize = 20;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub products_file: String,
    pub stores_file: String,
    pub links_file: String,
    pub geocode_cache_file: String,
    pub geocoding_endpoint: String,
    pub cep_lookup_endpoint: String,
    pub geocode_rate_limit_qps: u32,
    pub provider_timeout_ms: u64,
    pub resolve_concurrency: usize,
    pub cache_warm_workers: usize,
    pub max_results: usize,
    pub bind_addr: String,
    pub google_geocoding_api_key: Option<SecretString>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub data_dir: String,
    pub products_file: String,
    pub stores_file: String,
    pub links_file: String,
    pub geocode_cache_file: String,
    pub geocoding_endpoint: String,
    pub cep_lookup_endpoint: String,
    pub geocode_rate_limit_qps: u32,
    pub provider_timeout_ms: u64,
    pub resolve_concurrency: usize,
    pub cache_warm_workers: usize,
    pub max_results: usize,
    pub has_geocoding_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            data_dir: env::var("PDV_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            products_file: parse_string("PRODUCTS_FILE", "produtos.csv"),
            stores_file: parse_string("STORES_FILE", "pdvs.csv"),
            links_file: parse_string("LINKS_FILE", "produtos_pdvs.csv"),
            geocode_cache_file: parse_string("GEOCODE_CACHE_FILE", "geocode-cache.json"),
            geocoding_endpoint: parse_string("GEOCODING_ENDPOINT", DEFAULT_GEOCODING_ENDPOINT),
            cep_lookup_endpoint: parse_string("CEP_LOOKUP_ENDPOINT", DEFAULT_CEP_LOOKUP_ENDPOINT),
            geocode_rate_limit_qps: parse_u32("GEOCODE_RATE_LIMIT_QPS", 5).max(1),
            provider_timeout_ms: parse_u64("PROVIDER_TIMEOUT_MS", 8_000),
            resolve_concurrency: parse_usize("RESOLVE_CONCURRENCY", 8).max(1),
            cache_warm_workers: parse_usize("CACHE_WARM_WORKERS", 4).max(1),
            max_results: parse_usize("MAX_RESULTS", DEFAULT_MAX_RESULTS).max(1),
            bind_addr: parse_string("BIND_ADDR", "0.0.0.0:3000"),
            google_geocoding_api_key: env::var("GOOGLE_GEOCODING_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
        }
    }

    pub fn products_path(&self) -> PathBuf {
        self.data_dir.join(&self.products_file)
    }

    pub fn stores_path(&self) -> PathBuf {
        self.data_dir.join(&self.stores_file)
    }

    pub fn links_path(&self) -> PathBuf {
        self.data_dir.join(&self.links_file)
    }

    pub fn geocode_cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.geocode_cache_file)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            data_dir: self.data_dir.to_string_lossy().to_string(),
            products_file: self.products_file.clone(),
            stores_file: self.stores_file.clone(),
            links_file: self.links_file.clone(),
            geocode_cache_file: self.geocode_cache_file.clone(),
            geocoding_endpoint: self.geocoding_endpoint.clone(),
            cep_lookup_endpoint: self.cep_lookup_endpoint.clone(),
            geocode_rate_limit_qps: self.geocode_rate_limit_qps,
            provider_timeout_ms: self.provider_timeout_ms,
            resolve_concurrency: self.resolve_concurrency,
            cache_warm_workers: self.cache_warm_workers,
            max_results: self.max_results,
            has_geocoding_key: self.google_geocoding_api_key.is_some(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            products_file: "produtos.csv".into(),
            stores_file: "pdvs.csv".into(),
            links_file: "produtos_pdvs.csv".into(),
            geocode_cache_file: "geocode-cache.json".into(),
            geocoding_endpoint: DEFAULT_GEOCODING_ENDPOINT.into(),
            cep_lookup_endpoint: DEFAULT_CEP_LOOKUP_ENDPOINT.into(),
            geocode_rate_limit_qps: 5,
            provider_timeout_ms: 8_000,
            resolve_concurrency: 8,
            cache_warm_workers: 4,
            max_results: DEFAULT_MAX_RESULTS,
            bind_addr: "0.0.0.0:3000".into(),
            google_geocoding_api_key: None,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}
