//! Track handles and byte sources
//!
//! A track handle travels as standard base64 of a small JSON object
//! `{"uri": ..., "contentType": ...}`. Query strings turn `+` into spaces, so
//! spaces are mapped back before decoding.
//!
//! Opening a handle yields the content-type hint used for format
//! classification and a stream of raw container bytes.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use lyre_common::format::content_type_for_extension;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Chunked byte source feeding a pipeline
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Read size for local files
const FILE_CHUNK_BYTES: usize = 64 * 1024;

const USER_AGENT: &str = concat!("lyre-stream/", env!("CARGO_PKG_VERSION"));

/// Decoded track handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackHandle {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl TrackHandle {
    pub fn new(uri: impl Into<String>, content_type: Option<&str>) -> Self {
        Self {
            uri: uri.into(),
            content_type: content_type.map(str::to_string),
        }
    }

    /// Decode an opaque handle
    ///
    /// # Errors
    /// `BadRequest` when the handle is not base64 or not the expected JSON
    pub fn decode(encoded: &str) -> Result<Self> {
        let normalized = encoded.trim().replace(' ', "+");
        let raw = STANDARD
            .decode(normalized.as_bytes())
            .map_err(|e| Error::BadRequest(format!("Track handle is not valid base64: {}", e)))?;
        let handle: TrackHandle = serde_json::from_slice(&raw)
            .map_err(|e| Error::BadRequest(format!("Track handle is not valid JSON: {}", e)))?;
        if handle.uri.trim().is_empty() {
            return Err(Error::BadRequest("Track handle has an empty uri".to_string()));
        }
        Ok(handle)
    }

    pub fn encode(&self) -> String {
        // serializing two strings cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }
}

/// An opened track
pub struct OpenedTrack {
    pub content_type: String,
    pub stream: ByteStream,
}

impl std::fmt::Debug for OpenedTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedTrack")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Turns a track handle into bytes
pub trait TrackSource: Send + Sync {
    fn open<'a>(&'a self, handle: &'a TrackHandle) -> BoxFuture<'a, Result<OpenedTrack>>;
}

/// HTTP(S) via reqwest, everything else as a local path
pub struct DefaultTrackSource {
    client: reqwest::Client,
}

impl DefaultTrackSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn open_http(&self, handle: &TrackHandle) -> Result<OpenedTrack> {
        debug!("Opening {}", handle.uri);
        let response = self
            .client
            .get(&handle.uri)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("Request to {} failed: {}", handle.uri, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "{} answered {}",
                handle.uri,
                status.as_u16()
            )));
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = handle
            .content_type
            .clone()
            .or(header_type)
            .or_else(|| extension_content_type(&handle.uri))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Upstream(e.to_string())))
            .boxed();

        Ok(OpenedTrack {
            content_type,
            stream,
        })
    }

    async fn open_file(&self, handle: &TrackHandle) -> Result<OpenedTrack> {
        let path = handle
            .uri
            .strip_prefix("file://")
            .unwrap_or(&handle.uri)
            .to_string();
        debug!("Opening local file {}", path);

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::Upstream(format!("Cannot open {}: {}", path, e)))?;

        let content_type = handle
            .content_type
            .clone()
            .or_else(|| extension_content_type(&path))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Ok(OpenedTrack {
            content_type,
            stream: file_stream(file),
        })
    }
}

impl TrackSource for DefaultTrackSource {
    fn open<'a>(&'a self, handle: &'a TrackHandle) -> BoxFuture<'a, Result<OpenedTrack>> {
        async move {
            let uri = handle.uri.to_ascii_lowercase();
            if uri.starts_with("http://") || uri.starts_with("https://") {
                self.open_http(handle).await
            } else if uri.contains("://") && !uri.starts_with("file://") {
                Err(Error::BadRequest(format!(
                    "Unsupported uri scheme in {}",
                    handle.uri
                )))
            } else {
                self.open_file(handle).await
            }
        }
        .boxed()
    }
}

fn extension_content_type(uri: &str) -> Option<String> {
    let path = uri.split(|c| c == '?' || c == '#').next().unwrap_or(uri);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(content_type_for_extension)
        .map(str::to_string)
}

fn file_stream(mut file: tokio::fs::File) -> ByteStream {
    async_stream::try_stream! {
        let mut buf = vec![0u8; FILE_CHUNK_BYTES];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| Error::Upstream(format!("File read failed: {}", e)))?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    }
    .boxed()
}
