//! HTTP request handlers

use super::{ApiError, AppState, StreamEntry};
use crate::buffer::BufferPool;
use crate::error::Error;
use crate::pipeline::{pcm_byte_stream, run_pipeline, PipelineBuilder, PipelineOptions};
use crate::source::TrackHandle;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use lyre_common::api::{
    AddLayerRequest, AddLayerResponse, HealthResponse, OutputEncoding, PoolStatsResponse,
    StreamBody, StreamQuery, StreamRequest, MAX_VOLUME,
};
use lyre_common::filters::FilterSettings;
use lyre_common::{AudioFormat, LayerRemovedReason, PipelineEvent};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PCM_CONTENT_TYPE: &str = "audio/l16;rate=48000;channels=2";
pub const OPUS_CONTENT_TYPE: &str = "audio/opus";
pub const STREAM_ID_HEADER: &str = "x-stream-id";

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = BufferPool::global().stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "lyre-stream".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("LYRE_GIT_HASH").to_string(),
        build_timestamp: env!("LYRE_BUILD_TIMESTAMP").to_string(),
        active_streams: state.streams.len(),
        pool: PoolStatsResponse {
            pooled_bytes: pool.pooled_bytes,
            pooled_buffers: pool.pooled_buffers,
            hits: pool.hits,
            misses: pool.misses,
            drops: pool.drops,
        },
    })
}

// ============================================================================
// Track streaming
// ============================================================================

/// GET /v1/stream?encodedTrack=...&volume=...&position=...&filters=...
pub async fn stream_get(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| Error::BadRequest(e.body_text()))?;
    start_stream(state, StreamRequest::from(query)).await
}

/// POST /v1/stream with a JSON body
pub async fn stream_post(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body: StreamBody = parse_json(&body)?;
    start_stream(state, StreamRequest::from(body)).await
}

async fn start_stream(state: AppState, request: StreamRequest) -> Result<Response, ApiError> {
    if !state.config.enabled {
        return Err(Error::Disabled.into());
    }
    if request.volume > MAX_VOLUME {
        return Err(Error::BadRequest(format!(
            "volume {} is above the maximum of {}",
            request.volume, MAX_VOLUME
        ))
        .into());
    }

    let handle = TrackHandle::decode(&request.encoded_track)?;
    let opened = state.source.open(&handle).await?;
    let format = AudioFormat::classify(&opened.content_type)?;

    let options = PipelineOptions::from_config(&state.config)?.with_request(&request);
    let mut pipeline = PipelineBuilder::new(options).build(format)?;
    let stream_id = pipeline.id();

    state.streams.insert(
        stream_id,
        StreamEntry {
            track: handle.uri.clone(),
            mixer: pipeline.mixer().cloned(),
            filters: pipeline.filter_control(),
            started_at: chrono::Utc::now(),
        },
    );
    if let Some(events) = pipeline.take_events() {
        tokio::spawn(log_events(stream_id, events));
    }

    info!(
        "Stream {} started: {} as {:?} (volume {}, position {} ms)",
        stream_id, handle.uri, format, request.volume, request.position_ms
    );

    let (tx, rx) = mpsc::channel(state.config.output_queue_chunks.max(1));
    let streams = state.streams.clone();
    tokio::spawn(async move {
        let stats = run_pipeline(pipeline, opened.stream, tx).await;
        streams.remove(&stream_id);
        debug!("Stream {} ended: {:?}", stream_id, stats);
    });

    let content_type = match request.encoding {
        OutputEncoding::Pcm => PCM_CONTENT_TYPE,
        OutputEncoding::Opus => OPUS_CONTENT_TYPE,
    };
    let mut response = Body::from_stream(ReceiverStream::new(rx)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&stream_id.to_string()) {
        headers.insert(STREAM_ID_HEADER, value);
    }
    Ok(response)
}

async fn log_events(stream_id: Uuid, mut events: mpsc::Receiver<PipelineEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            PipelineEvent::Failed { .. } => warn!("Stream {}: {:?}", stream_id, event),
            _ => debug!("Stream {}: {:?}", stream_id, event),
        }
    }
}

// ============================================================================
// Layers
// ============================================================================

/// POST /v1/streams/:stream_id/layers
pub async fn add_layer(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<AddLayerResponse>, ApiError> {
    let request: AddLayerRequest = parse_json(&body)?;
    let entry = find_stream(&state, stream_id)?;
    let mixer = entry.mixer.ok_or(Error::Disabled)?;

    let handle = TrackHandle::decode(&request.encoded_track)?;
    let opened = state.source.open(&handle).await?;
    let format = AudioFormat::classify(&opened.content_type)?;

    let options = PipelineOptions {
        mixer: false,
        ..PipelineOptions::from_config(&state.config)?
    };
    let pipeline = PipelineBuilder::new(options).build(format)?;
    let pcm = pcm_byte_stream(pipeline, opened.stream, state.config.output_queue_chunks);

    let layer_id = mixer.add_layer(pcm, handle.uri, request.volume.unwrap_or(1.0))?;
    Ok(Json(AddLayerResponse { layer_id }))
}

/// DELETE /v1/streams/:stream_id/layers/:layer_id
pub async fn remove_layer(
    State(state): State<AppState>,
    Path((stream_id, layer_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let mixer = find_stream(&state, stream_id)?.mixer.ok_or(Error::Disabled)?;
    if mixer.remove_layer(layer_id, LayerRemovedReason::Removed, None) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound(format!("layer {}", layer_id)).into())
    }
}

/// DELETE /v1/streams/:stream_id/layers
pub async fn clear_layers(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mixer = find_stream(&state, stream_id)?.mixer.ok_or(Error::Disabled)?;
    mixer.clear();
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Filters
// ============================================================================

/// PATCH /v1/streams/:stream_id/filters
///
/// Replaces the whole filter set; effects missing from the body are switched
/// off.
pub async fn update_filters(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let settings: FilterSettings = parse_json(&body)?;
    find_stream(&state, stream_id)?.filters.set(settings);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn find_stream(state: &AppState, stream_id: Uuid) -> Result<StreamEntry, Error> {
    state
        .streams
        .get(&stream_id)
        .ok_or_else(|| Error::NotFound(format!("stream {}", stream_id)))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::BadRequest(format!("Invalid JSON body: {}", e)))
}
