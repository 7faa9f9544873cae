//! Shared HTTP API types
//!
//! Framework-free request/response bodies; the service wraps them with axum.

pub mod types;

pub use types::{
    AddLayerRequest, AddLayerResponse, ErrorResponse, HealthResponse, OutputEncoding,
    PoolStatsResponse, StreamBody, StreamQuery, StreamRequest,
};
