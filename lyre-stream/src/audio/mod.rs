//! Decode, resample and codec adapters
//!
//! Everything here converges on one output contract: interleaved stereo
//! 16-bit PCM at 48 kHz.

pub mod aac;
pub mod decode_stage;
pub mod decoder;
pub mod flv_audio;
pub mod opus_adapter;
pub mod resampler;
pub mod stream_decoder;
pub mod types;

pub use decode_stage::{Backpressure, DecodeOptions, DecodeStage};
pub use opus_adapter::{OpusFrameEncoder, OpusPacketDecoder, OpusSettings, OPUS_FRAME_BYTES};
pub use resampler::{ResamplerQuality, StreamResampler};
pub use types::{PcmBlock, BYTES_PER_FRAME, TARGET_CHANNELS, TARGET_SAMPLE_RATE};
