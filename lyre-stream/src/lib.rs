//! # Lyre Stream
//!
//! Audio ingestion and transform engine.
//!
//! Compressed audio (WebM/Opus, AAC in ADTS/MPEG-TS/MP4/fMP4, FLV, MP3, FLAC,
//! Ogg, WAV) is demuxed, decoded and resampled to 48 kHz stereo 16-bit PCM,
//! then run through track volume, a multi-layer mixer and an ordered DSP
//! filter chain, and optionally re-encoded to Opus.
//!
//! **Architecture:** one tokio task per pipeline, symphonia + rubato + opus
//! for codecs, axum for the HTTP surface.

pub mod api;
pub mod audio;
pub mod buffer;
pub mod config;
pub mod demux;
pub mod error;
pub mod filters;
pub mod mixer;
pub mod pipeline;
pub mod source;

pub use error::{Error, Result};
pub use mixer::AudioMixer;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineOptions};
