//! Request and response bodies for the streaming service
//!
//! The GET and POST forms of `/v1/stream` differ only in how `filters` is
//! carried: a JSON-encoded query string for GET, a structured object for POST.
//! Both normalize into [`StreamRequest`].

use crate::filters::FilterSettings;
use crate::ErrorKind;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Upper bound for the `volume` parameter (10x gain)
pub const MAX_VOLUME: u32 = 1000;

/// Default `volume` (unity gain)
pub const DEFAULT_VOLUME: u32 = 100;

/// Output encoding of the stream body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// Raw 16-bit little-endian interleaved stereo at 48 kHz
    #[default]
    Pcm,
    /// Opus packets, each prefixed by a big-endian u16 length
    Opus,
}

/// Query parameters of `GET /v1/stream`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub encoded_track: String,
    #[serde(default)]
    pub volume: Option<u32>,
    #[serde(default)]
    pub position: Option<u64>,
    /// JSON-encoded [`FilterSettings`]
    #[serde(default)]
    pub filters: Option<String>,
    #[serde(default)]
    pub encoding: Option<OutputEncoding>,
}

/// Body of `POST /v1/stream`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamBody {
    pub encoded_track: String,
    #[serde(default)]
    pub volume: Option<u32>,
    #[serde(default)]
    pub position: Option<u64>,
    #[serde(default)]
    pub filters: Option<FilterSettings>,
    #[serde(default)]
    pub encoding: Option<OutputEncoding>,
}

/// Normalized stream request
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub encoded_track: String,
    /// 0..=1000, where 100 is unity
    pub volume: u32,
    /// Start offset in milliseconds
    pub position_ms: u64,
    pub filters: FilterSettings,
    pub encoding: OutputEncoding,
}

impl StreamRequest {
    /// Linear gain applied to decoded PCM
    pub fn gain(&self) -> f32 {
        self.volume as f32 / 100.0
    }
}

impl From<StreamQuery> for StreamRequest {
    fn from(q: StreamQuery) -> Self {
        let filters = match q.filters.as_deref() {
            Some(raw) if !raw.trim().is_empty() => match serde_json::from_str(raw) {
                Ok(f) => f,
                Err(e) => {
                    debug!("Ignoring unparseable filters parameter: {}", e);
                    FilterSettings::default()
                }
            },
            _ => FilterSettings::default(),
        };

        Self {
            encoded_track: q.encoded_track,
            volume: q.volume.unwrap_or(DEFAULT_VOLUME),
            position_ms: q.position.unwrap_or(0),
            filters,
            encoding: q.encoding.unwrap_or_default(),
        }
    }
}

impl From<StreamBody> for StreamRequest {
    fn from(b: StreamBody) -> Self {
        Self {
            encoded_track: b.encoded_track,
            volume: b.volume.unwrap_or(DEFAULT_VOLUME),
            position_ms: b.position.unwrap_or(0),
            filters: b.filters.unwrap_or_default(),
            encoding: b.encoding.unwrap_or_default(),
        }
    }
}

/// Body of `POST /v1/streams/{id}/layers`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLayerRequest {
    pub encoded_track: String,
    /// 0.0..=1.0, default 1.0
    #[serde(default)]
    pub volume: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLayerResponse {
    pub layer_id: Uuid,
}

/// Error body for every failed request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}

/// Buffer pool counters reported by `/health`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolStatsResponse {
    pub pooled_bytes: usize,
    pub pooled_buffers: usize,
    pub hits: u64,
    pub misses: u64,
    pub drops: u64,
}

/// `GET /health` response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub active_streams: usize,
    pub pool: PoolStatsResponse,
}
