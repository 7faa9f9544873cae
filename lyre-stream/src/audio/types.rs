//! Core PCM types and sample conversions
//!
//! Decoders produce [`PcmBlock`]s: interleaved stereo `f32` at the source
//! sample rate. After resampling, everything downstream works on interleaved
//! stereo `i16` at 48 kHz, serialized little-endian on the wire.

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};

/// Output sample rate for every pipeline
pub const TARGET_SAMPLE_RATE: u32 = 48000;

/// Output channel count for every pipeline
pub const TARGET_CHANNELS: usize = 2;

/// Bytes in one stereo i16 sample pair
pub const BYTES_PER_FRAME: usize = TARGET_CHANNELS * 2;

/// Stereo samples in 20 ms at 48 kHz
pub const SAMPLES_PER_20MS: usize = 960;

const CENTER_GAIN: f32 = 0.7071;
const SURROUND_GAIN: f32 = 0.7071;
const LFE_GAIN: f32 = 0.5;

/// Decoded audio before resampling
///
/// **Format:**
/// - Interleaved stereo: [L, R, L, R, ...]
/// - Nominal range -1.0..=1.0
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Number of stereo sample pairs
    pub fn frames(&self) -> usize {
        self.samples.len() / TARGET_CHANNELS
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Fold interleaved `channels`-channel audio into stereo, appending to `out`
///
/// Channel order follows the decoder's layout: L R C, L R C S, L R C Ls Rs,
/// L R C LFE Ls Rs. Center and surround are mixed at -3 dB, LFE at -6 dB.
/// Layouts wider than 6 channels keep the front pair.
pub fn downmix_to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 0 {
        return;
    }
    let frames = samples.len() / channels;
    out.reserve(frames * TARGET_CHANNELS);

    for frame in samples.chunks_exact(channels) {
        let (l, r) = match channels {
            1 => (frame[0], frame[0]),
            2 => (frame[0], frame[1]),
            3 => {
                let c = frame[2] * CENTER_GAIN;
                (frame[0] + c, frame[1] + c)
            }
            4 => {
                let c = frame[2] * CENTER_GAIN;
                let s = frame[3] * SURROUND_GAIN;
                (frame[0] + c + s, frame[1] + c + s)
            }
            5 => {
                let c = frame[2] * CENTER_GAIN;
                (
                    frame[0] + c + frame[3] * SURROUND_GAIN,
                    frame[1] + c + frame[4] * SURROUND_GAIN,
                )
            }
            6 => {
                let c = frame[2] * CENTER_GAIN;
                let lfe = frame[3] * LFE_GAIN;
                (
                    frame[0] + c + lfe + frame[4] * SURROUND_GAIN,
                    frame[1] + c + lfe + frame[5] * SURROUND_GAIN,
                )
            }
            _ => (frame[0], frame[1]),
        };
        out.push(l.clamp(-1.0, 1.0));
        out.push(r.clamp(-1.0, 1.0));
    }
}

/// Convert any symphonia buffer to interleaved stereo `f32`, appending to `out`
///
/// # Returns
/// Source channel count
pub fn convert_to_stereo_f32(decoded: AudioBufferRef<'_>, out: &mut Vec<f32>) -> usize {
    let spec = *decoded.spec();
    let channels = spec.channels.count();
    if decoded.frames() == 0 || channels == 0 {
        return channels;
    }

    let mut interleaved = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    interleaved.copy_interleaved_ref(decoded);
    let samples = interleaved.samples();

    if channels == TARGET_CHANNELS {
        out.extend_from_slice(samples);
    } else {
        downmix_to_stereo(samples, channels, out);
    }
    channels
}

/// Float sample to i16 with saturation
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Saturating conversion back from a widened or scaled sample
#[inline]
pub fn clamp_i16(sample: f32) -> i16 {
    sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn f32_to_i16_vec(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16(s)).collect()
}

/// Serialize samples as little-endian bytes
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Parse little-endian bytes; a trailing odd byte is ignored
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Stereo sample pairs covering `ms` milliseconds at 48 kHz
pub fn frames_for_ms(ms: u64) -> u64 {
    ms * TARGET_SAMPLE_RATE as u64 / 1000
}
