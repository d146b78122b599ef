use std::io;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use crate::cache::WarmSummary;
use crate::commands::{
    self, CepQuery, CoordinatesQuery, NearestStoresQuery, ProductsQuery, ServiceHealth,
};
use crate::errors::AppError;
use crate::ingestion::{parse_flag, CatalogSummary};
use crate::model::Product;
use crate::resolver::NearbyStore;
use crate::AppState;

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match &err {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(?err, "request failed");
        }
        let message = match err {
            AppError::InvalidInput(message) | AppError::NotFound(message) => message,
            other => other.to_string(),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    cleared: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/products", get(products_handler))
        .route("/api/stores/nearest", get(nearest_handler))
        .route("/api/stores/nearest/cep", get(nearest_by_cep_handler))
        .route(
            "/api/stores/nearest/coordinates",
            get(nearest_by_coordinates_handler),
        )
        .route("/api/admin/geocode-cache/clear", post(clear_cache_handler))
        .route("/api/admin/geocode-cache/warm", post(warm_cache_handler))
        .route("/api/admin/catalog/reload", post(reload_catalog_handler))
        .with_state(state)
}

pub async fn serve(addr: &str, state: Arc<AppState>) -> io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "listening");
    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<ServiceHealth> {
    Json(ServiceHealth::new(
        state.config.public_profile(),
        state.resolver.catalog_summary(),
        state.resolver.cache().stats(),
    ))
}

async fn products_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductsQuery>,
) -> Json<Vec<Product>> {
    let highlighted_only = query.highlighted.as_deref().map(parse_flag).unwrap_or(false);
    Json(state.resolver.products(highlighted_only))
}

async fn nearest_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearestStoresQuery>,
) -> Result<Json<Vec<NearbyStore>>, ApiError> {
    let stores = commands::nearest_stores(&state.resolver, query).await?;
    Ok(Json(stores))
}

async fn nearest_by_cep_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CepQuery>,
) -> Result<Json<Vec<NearbyStore>>, ApiError> {
    let stores = commands::nearest_stores_by_cep(&state.resolver, query).await?;
    Ok(Json(stores))
}

async fn nearest_by_coordinates_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CoordinatesQuery>,
) -> Result<Json<Vec<NearbyStore>>, ApiError> {
    let stores = commands::nearest_stores_by_coordinates(&state.resolver, query).await?;
    Ok(Json(stores))
}

async fn clear_cache_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClearResponse>, ApiError> {
    state.resolver.cache().clear()?;
    Ok(Json(ClearResponse { cleared: true }))
}

async fn warm_cache_handler(State(state): State<Arc<AppState>>) -> Json<WarmSummary> {
    Json(state.resolver.warm_geocode_cache().await)
}

async fn reload_catalog_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CatalogSummary>, ApiError> {
    Ok(Json(state.reload_catalog()?))
}
