//! # Lyre Common Library
//!
//! Shared code for the Lyre streaming service:
//! - Error taxonomy (`ErrorKind`) and common error type
//! - Content-type classification
//! - Filter parameter schema
//! - Pipeline lifecycle events
//! - API request/response types
//! - Bootstrap configuration loading

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod filters;
pub mod format;

pub use error::{Error, ErrorKind, Result};
pub use events::{LayerRemovedReason, PipelineEvent};
pub use format::{AacContainer, AudioFormat};
