//! HTTP surface of the streaming service
//!
//! - `GET|POST /v1/stream` starts a pipeline and streams its output
//! - `POST /v1/streams/:id/layers` mixes another track into a running stream
//! - `DELETE /v1/streams/:id/layers[/:layer_id]` removes layers
//! - `PATCH /v1/streams/:id/filters` replaces the filter settings
//! - `GET /health` reports build info and buffer pool counters

pub mod handlers;
pub mod registry;

pub use registry::{StreamEntry, StreamRegistry};

use crate::error::Error;
use crate::source::TrackSource;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use lyre_common::api::ErrorResponse;
use lyre_common::config::StreamingConfig;
use lyre_common::ErrorKind;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StreamingConfig>,
    pub source: Arc<dyn TrackSource>,
    pub streams: StreamRegistry,
}

impl AppState {
    pub fn new(config: StreamingConfig, source: Arc<dyn TrackSource>) -> Self {
        Self {
            config: Arc::new(config),
            source,
            streams: StreamRegistry::default(),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/v1/stream",
            get(handlers::stream_get).post(handlers::stream_post),
        )
        .route(
            "/v1/streams/:stream_id/layers",
            post(handlers::add_layer).delete(handlers::clear_layers),
        )
        .route(
            "/v1/streams/:stream_id/layers/:layer_id",
            delete(handlers::remove_layer),
        )
        .route("/v1/streams/:stream_id/filters", patch(handlers::update_filters))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Engine error rendered as `{error, message}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            e => match e.kind() {
                ErrorKind::BadRequest
                | ErrorKind::UnsupportedFormat
                | ErrorKind::MalformedContainer => StatusCode::BAD_REQUEST,
                ErrorKind::Disabled => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        let body = ErrorResponse::new(self.0.kind(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}
