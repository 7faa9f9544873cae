//! HTTP API tests, driven through the router with `oneshot`

mod helpers;

use axum::body::Body;
use http::{Request, StatusCode};
use axum::Router;
use helpers::*;
use http_body_util::BodyExt;
use lyre_common::config::StreamingConfig;
use lyre_stream::api::{create_router, AppState};
use lyre_stream::source::{DefaultTrackSource, TrackHandle};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

fn app_with(config: StreamingConfig) -> (Router, AppState) {
    let source = DefaultTrackSource::new().unwrap();
    let state = AppState::new(config, Arc::new(source));
    (create_router(state.clone()), state)
}

fn app() -> (Router, AppState) {
    app_with(StreamingConfig::default())
}

fn handle_for(path: &Path, content_type: Option<&str>) -> String {
    TrackHandle::new(path.display().to_string(), content_type).encode()
}

fn wav_fixture(dir: &TempDir, frames: usize, value: i16) -> std::path::PathBuf {
    write_file(dir.path(), "track.wav", &constant_wav(48_000, frames, value))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn stream_uri(handle: &str) -> String {
    // '+' deliberately left unescaped: the query decoder turns it into a space
    format!("/v1/stream?encodedTrack={}", handle.replace('/', "%2F").replace('=', "%3D"))
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "lyre-stream");
    assert_eq!(body["active_streams"], 0);
    assert!(body["pool"]["pooled_bytes"].is_number());
    assert!(body["git_hash"].is_string());
}

#[tokio::test]
async fn test_get_stream_returns_pcm() {
    let dir = TempDir::new().unwrap();
    let path = wav_fixture(&dir, 48_000, 1000);
    let (app, _) = app();

    let response = app.oneshot(get(&stream_uri(&handle_for(&path, None)))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "audio/l16;rate=48000;channels=2"
    );
    let stream_id = response.headers()["x-stream-id"].to_str().unwrap().to_string();
    assert!(Uuid::parse_str(&stream_id).is_ok());

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 48_000 * 4);
    assert!(samples(&bytes).iter().all(|&s| (s - 1000).abs() <= 1));
}

#[tokio::test]
async fn test_post_stream_applies_volume_and_filters() {
    let dir = TempDir::new().unwrap();
    let path = wav_fixture(&dir, 4800, 1000);
    let (app, _) = app();

    let request = with_json(
        "POST",
        "/v1/stream",
        json!({
            "encodedTrack": handle_for(&path, Some("audio/wav")),
            "volume": 300,
            "position": 50,
            "filters": { "volume": 0.5 }
        }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), (4800 - 2400) * 4);
    assert!(samples(&bytes).iter().all(|&s| (s - 1500).abs() <= 2));
}

#[tokio::test]
async fn test_get_stream_with_filters_parameter() {
    let dir = TempDir::new().unwrap();
    let path = wav_fixture(&dir, 4800, 1000);
    let (app, _) = app();

    // filters={"volume":0.5}
    let uri = format!(
        "{}&filters=%7B%22volume%22%3A0.5%7D",
        stream_uri(&handle_for(&path, None))
    );
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 4800 * 4);
    assert!(samples(&bytes).iter().all(|&s| (s - 500).abs() <= 1));
}

#[tokio::test]
async fn test_bad_requests() {
    let dir = TempDir::new().unwrap();
    let path = wav_fixture(&dir, 480, 0);
    let handle = handle_for(&path, None);
    let (app, _) = app();

    let cases = vec![
        get("/v1/stream?encodedTrack=%%%"),
        get("/v1/stream"),
        get(&format!("{}&volume=1001", stream_uri(&handle))),
        with_json("POST", "/v1/stream", json!({ "volume": 100 })),
    ];
    for request in cases {
        let uri = request.uri().to_string();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let body = json_body(response).await;
        assert_eq!(body["error"], "BAD_REQUEST", "{}", uri);
        assert!(body["message"].is_string());
    }
}

#[tokio::test]
async fn test_unsupported_format_is_400() {
    let dir = TempDir::new().unwrap();
    let path = wav_fixture(&dir, 480, 0);
    let (app, _) = app();

    let response = app
        .oneshot(get(&stream_uri(&handle_for(&path, Some("text/html")))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "UNSUPPORTED_FORMAT");
    assert!(body["message"].as_str().unwrap().contains("flac"));
}

#[tokio::test]
async fn test_missing_source_is_500() {
    let (app, _) = app();
    let handle = TrackHandle::new("/no/such/track.mp3", None).encode();
    let response = app.oneshot(get(&stream_uri(&handle))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "UPSTREAM");
}

#[tokio::test]
async fn test_disabled_streaming_is_404() {
    let (app, _) = app_with(StreamingConfig {
        enabled: false,
        ..Default::default()
    });
    let handle = TrackHandle::new("/tmp/x.wav", None).encode();
    let response = app.oneshot(get(&stream_uri(&handle))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "DISABLED");
}

#[tokio::test]
async fn test_layer_endpoints_on_running_stream() {
    let dir = TempDir::new().unwrap();
    let path = wav_fixture(&dir, 5 * 48_000, 0);
    let handle = handle_for(&path, None);
    let (app, state) = app();

    // keep the body unread so the stream stays alive
    let response = app.clone().oneshot(get(&stream_uri(&handle))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stream_id = response.headers()["x-stream-id"].to_str().unwrap().to_string();
    assert_eq!(state.streams.len(), 1);

    let layers = format!("/v1/streams/{}/layers", stream_id);
    let added = app
        .clone()
        .oneshot(with_json("POST", &layers, json!({ "encodedTrack": handle, "volume": 0.5 })))
        .await
        .unwrap();
    assert_eq!(added.status(), StatusCode::OK);
    let layer_id = json_body(added).await["layerId"].as_str().unwrap().to_string();

    let one = format!("{}/{}", layers, layer_id);
    let removed = app.clone().oneshot(delete(&one)).await.unwrap();
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    let again = app.clone().oneshot(delete(&one)).await.unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let cleared = app.clone().oneshot(delete(&layers)).await.unwrap();
    assert_eq!(cleared.status(), StatusCode::NO_CONTENT);

    let filters = format!("/v1/streams/{}/filters", stream_id);
    let patched = app
        .clone()
        .oneshot(with_json("PATCH", &filters, json!({ "rotation": { "rotationHz": 0.2 } })))
        .await
        .unwrap();
    assert_eq!(patched.status(), StatusCode::NO_CONTENT);

    // the client goes away; the stream unregisters itself
    drop(response);
    for _ in 0..200 {
        if state.streams.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(state.streams.is_empty());
}

#[tokio::test]
async fn test_layers_on_unknown_stream_or_without_mixer() {
    let (app, _) = app();
    let uri = format!("/v1/streams/{}/layers", Uuid::new_v4());
    let response = app
        .oneshot(with_json("POST", &uri, json!({ "encodedTrack": "abc" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let dir = TempDir::new().unwrap();
    let path = wav_fixture(&dir, 5 * 48_000, 0);
    let handle = handle_for(&path, None);
    let (app, _) = app_with(StreamingConfig {
        mixer_enabled: false,
        ..Default::default()
    });
    let stream = app.clone().oneshot(get(&stream_uri(&handle))).await.unwrap();
    let stream_id = stream.headers()["x-stream-id"].to_str().unwrap().to_string();

    let response = app
        .oneshot(with_json(
            "POST",
            &format!("/v1/streams/{}/layers", stream_id),
            json!({ "encodedTrack": handle }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "DISABLED");
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
