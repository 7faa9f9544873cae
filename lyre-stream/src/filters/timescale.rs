//! Variable-rate playback by cubic Hermite interpolation
//!
//! Input frames accumulate in a history buffer that is read at a fractional
//! position advancing by `speed * pitch * rate` per output sample. The output
//! length of each call is therefore roughly the input length divided by the
//! ratio, and some input is always held back for the interpolator.

use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, TimescaleParams};

const MIN_FACTOR: f32 = 0.1;
const MAX_FACTOR: f32 = 5.0;

#[derive(Debug, Clone)]
pub struct TimescaleFilter {
    ratio: f64,
    /// Read position in frames, relative to `pending`
    position: f64,
    /// Interleaved stereo input not yet consumed
    pending: Vec<f32>,
}

impl TimescaleFilter {
    pub fn new(params: &TimescaleParams) -> Self {
        let mut filter = Self {
            ratio: 1.0,
            position: 0.0,
            pending: Vec::new(),
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, params: &TimescaleParams) {
        let speed = params.speed.clamp(MIN_FACTOR, MAX_FACTOR) as f64;
        let pitch = params.pitch.clamp(MIN_FACTOR, MAX_FACTOR) as f64;
        let rate = params.rate.clamp(MIN_FACTOR, MAX_FACTOR) as f64;
        self.ratio = speed * pitch * rate;
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    #[inline]
    fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.pending[frame * 2 + channel]
    }
}

/// Catmull-Rom spline through four neighbours at offset `t` from `x0`
#[inline]
fn hermite(t: f32, xm1: f32, x0: f32, x1: f32, x2: f32) -> f32 {
    let c1 = 0.5 * (x1 - xm1);
    let c2 = xm1 - 2.5 * x0 + 2.0 * x1 - 0.5 * x2;
    let c3 = 0.5 * (x2 - xm1) + 1.5 * (x0 - x1);
    ((c3 * t + c2) * t + c1) * t + x0
}

impl Filter for TimescaleFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Timescale
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Timescale(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        if self.ratio == 1.0 && self.pending.is_empty() {
            return;
        }

        self.pending.extend(frame.iter().map(|&s| s as f32));
        let available = self.pending.len() / 2;

        let mut out = Vec::with_capacity((frame.len() as f64 / self.ratio) as usize + 4);
        // the interpolator needs one frame behind and two ahead of the read position
        while (self.position as usize) + 2 < available {
            let i = self.position as usize;
            let t = (self.position - i as f64) as f32;
            for ch in 0..2 {
                let x0 = self.sample(i, ch);
                let xm1 = if i == 0 { x0 } else { self.sample(i - 1, ch) };
                let x1 = self.sample(i + 1, ch);
                let x2 = self.sample(i + 2, ch);
                out.push(clamp_i16(hermite(t, xm1, x0, x1, x2)));
            }
            self.position += self.ratio;
        }

        // keep one frame of history behind the read position
        let consumed = (self.position as usize).saturating_sub(1).min(available);
        self.pending.drain(..consumed * 2);
        self.position -= consumed as f64;

        *frame = out;
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
