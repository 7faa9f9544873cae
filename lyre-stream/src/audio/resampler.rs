//! Streaming sample-rate conversion to 48 kHz using rubato
//!
//! rubato's fixed-input resamplers consume exact chunks, so incoming blocks
//! are staged per channel and converted one chunk at a time. The remainder
//! is pushed through `process_partial` at end of stream.

use crate::audio::types::{TARGET_CHANNELS, TARGET_SAMPLE_RATE};
use crate::error::{Error, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Input frames per rubato call
const CHUNK_FRAMES: usize = 1024;

/// Named resampling algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerQuality {
    /// Long sinc kernel
    Best,
    /// Medium sinc kernel
    Medium,
    /// Septic polynomial interpolation
    #[default]
    Fastest,
    /// Sample-and-hold
    ZeroOrderHold,
    /// Linear interpolation
    Linear,
}

impl FromStr for ResamplerQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(Self::Best),
            "medium" => Ok(Self::Medium),
            "fastest" => Ok(Self::Fastest),
            "zero_order_hold" => Ok(Self::ZeroOrderHold),
            "linear" => Ok(Self::Linear),
            other => Err(Error::BadRequest(format!(
                "unknown resampler quality '{}' (best, medium, fastest, zero_order_hold, linear)",
                other
            ))),
        }
    }
}

impl fmt::Display for ResamplerQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Best => "best",
            Self::Medium => "medium",
            Self::Fastest => "fastest",
            Self::ZeroOrderHold => "zero_order_hold",
            Self::Linear => "linear",
        };
        f.write_str(name)
    }
}

enum Engine {
    Sinc(SincFixedIn<f32>),
    Fast(FastFixedIn<f32>),
}

impl Engine {
    fn process(&mut self, input: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let result = match self {
            Engine::Sinc(r) => r.process(input, None),
            Engine::Fast(r) => r.process(input, None),
        };
        result.map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))
    }

    fn process_partial(&mut self, input: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let result = match self {
            Engine::Sinc(r) => r.process_partial(Some(input), None),
            Engine::Fast(r) => r.process_partial(Some(input), None),
        };
        result.map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))
    }
}

/// Stereo resampler from one source rate to 48 kHz
pub struct StreamResampler {
    engine: Engine,
    input_rate: u32,
    staged: Vec<Vec<f32>>,
}

impl StreamResampler {
    /// Create a resampler for `input_rate`
    ///
    /// # Arguments
    /// * `input_rate` - Source sample rate in Hz
    /// * `quality` - Algorithm to use
    pub fn new(input_rate: u32, quality: ResamplerQuality) -> Result<Self> {
        let ratio = TARGET_SAMPLE_RATE as f64 / input_rate as f64;
        let engine = match quality {
            ResamplerQuality::Best | ResamplerQuality::Medium => {
                let params = if quality == ResamplerQuality::Best {
                    SincInterpolationParameters {
                        sinc_len: 256,
                        f_cutoff: 0.95,
                        interpolation: SincInterpolationType::Cubic,
                        oversampling_factor: 256,
                        window: WindowFunction::BlackmanHarris2,
                    }
                } else {
                    SincInterpolationParameters {
                        sinc_len: 128,
                        f_cutoff: 0.925,
                        interpolation: SincInterpolationType::Linear,
                        oversampling_factor: 128,
                        window: WindowFunction::Blackman2,
                    }
                };
                Engine::Sinc(
                    SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, TARGET_CHANNELS)
                        .map_err(|e| Error::Resample(format!("Failed to create sinc resampler: {}", e)))?,
                )
            }
            ResamplerQuality::Fastest | ResamplerQuality::ZeroOrderHold | ResamplerQuality::Linear => {
                let degree = match quality {
                    ResamplerQuality::ZeroOrderHold => PolynomialDegree::Nearest,
                    ResamplerQuality::Linear => PolynomialDegree::Linear,
                    _ => PolynomialDegree::Septic,
                };
                Engine::Fast(
                    FastFixedIn::<f32>::new(ratio, 1.0, degree, CHUNK_FRAMES, TARGET_CHANNELS)
                        .map_err(|e| Error::Resample(format!("Failed to create resampler: {}", e)))?,
                )
            }
        };

        debug!(
            "Resampler {}Hz -> {}Hz ({})",
            input_rate, TARGET_SAMPLE_RATE, quality
        );

        Ok(Self {
            engine,
            input_rate,
            staged: vec![Vec::with_capacity(CHUNK_FRAMES * 2); TARGET_CHANNELS],
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Resample interleaved stereo, returning whatever output is ready
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        for (staged, channel) in self.staged.iter_mut().zip(deinterleave(interleaved, TARGET_CHANNELS)) {
            staged.extend(channel);
        }

        let mut out = Vec::new();
        while self.staged[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .staged
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_FRAMES).collect())
                .collect();
            let planar = self.engine.process(&chunk)?;
            interleave_into(&planar, &mut out);
        }
        Ok(out)
    }

    /// Convert the staged remainder at end of stream
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        if self.staged[0].is_empty() {
            return Ok(out);
        }
        let rest: Vec<Vec<f32>> = self.staged.iter_mut().map(std::mem::take).collect();
        let planar = self.engine.process_partial(&rest)?;

        // partial output covers the whole chunk length; keep the share for real input
        let expected = (rest[0].len() as f64 * TARGET_SAMPLE_RATE as f64 / self.input_rate as f64)
            .ceil() as usize;
        let planar: Vec<Vec<f32>> = planar
            .into_iter()
            .map(|mut ch| {
                ch.truncate(expected);
                ch
            })
            .collect();
        interleave_into(&planar, &mut out);
        Ok(out)
    }
}

/// Convert interleaved samples to planar format.
///
/// Input:  [L, R, L, R, L, R, ...]
/// Output: [[L, L, L, ...], [R, R, R, ...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            planar[ch].push(s);
        }
    }
    planar
}

/// Convert planar samples to interleaved format, appending to `out`
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let Some(first) = planar.first() else {
        return;
    };
    out.reserve(first.len() * planar.len());
    for i in 0..first.len() {
        for ch in planar {
            out.push(ch.get(i).copied().unwrap_or(0.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, frames: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5;
            out.push(s);
            out.push(s);
        }
        out
    }

    #[test]
    fn test_quality_names() {
        for name in ["best", "medium", "fastest", "zero_order_hold", "linear"] {
            let q: ResamplerQuality = name.parse().unwrap();
            assert_eq!(q.to_string(), name);
        }
        assert_eq!(ResamplerQuality::default(), ResamplerQuality::Fastest);
        assert!("sinc".parse::<ResamplerQuality>().is_err());
    }

    #[test]
    fn test_deinterleave() {
        let planar = deinterleave(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);

        let mut out = Vec::new();
        interleave_into(&planar, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_streaming_output_length() {
        for quality in [
            ResamplerQuality::Fastest,
            ResamplerQuality::Linear,
            ResamplerQuality::ZeroOrderHold,
            ResamplerQuality::Medium,
        ] {
            let mut resampler = StreamResampler::new(44100, quality).unwrap();
            let input = sine(44100, 44100);
            let mut out = Vec::new();
            for block in input.chunks(2 * 700) {
                out.extend(resampler.process(block).unwrap());
            }
            out.extend(resampler.flush().unwrap());

            let frames = out.len() / 2;
            assert!(
                (47000..=49000).contains(&frames),
                "{}: expected ~48000 frames, got {}",
                quality,
                frames
            );
            assert!(out.iter().all(|s| s.is_finite()));
        }
    }
}
