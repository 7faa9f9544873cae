//! One-pole low-pass and its complementary high-pass
//!
//! `smoothing` is the reciprocal of the one-pole coefficient: each sample the
//! smoothed value moves `1 / smoothing` of the way towards the input. The
//! high-pass output is the input minus that smoothed value.

use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, SmoothingParams};

const MIN_SMOOTHING: f32 = 1.0;
const MAX_SMOOTHING: f32 = 100.0;

#[derive(Debug, Clone)]
struct OnePole {
    coefficient: f32,
    state: [f32; 2],
}

impl OnePole {
    fn new(params: &SmoothingParams) -> Self {
        let mut pole = Self {
            coefficient: 1.0,
            state: [0.0; 2],
        };
        pole.set(params);
        pole
    }

    fn set(&mut self, params: &SmoothingParams) {
        self.coefficient = 1.0 / params.smoothing.clamp(MIN_SMOOTHING, MAX_SMOOTHING);
    }

    #[inline]
    fn process(&mut self, channel: usize, x: f32) -> f32 {
        let state = &mut self.state[channel];
        *state += (x - *state) * self.coefficient;
        *state
    }
}

#[derive(Debug, Clone)]
pub struct LowPassFilter {
    pole: OnePole,
}

impl LowPassFilter {
    pub fn new(params: &SmoothingParams) -> Self {
        Self {
            pole: OnePole::new(params),
        }
    }
}

impl Filter for LowPassFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::LowPass
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::LowPass(p) = params {
            self.pole.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        for pair in frame.chunks_exact_mut(2) {
            for (ch, sample) in pair.iter_mut().enumerate() {
                *sample = clamp_i16(self.pole.process(ch, *sample as f32));
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct HighPassFilter {
    pole: OnePole,
}

impl HighPassFilter {
    pub fn new(params: &SmoothingParams) -> Self {
        Self {
            pole: OnePole::new(params),
        }
    }
}

impl Filter for HighPassFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::HighPass
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::HighPass(p) = params {
            self.pole.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        for pair in frame.chunks_exact_mut(2) {
            for (ch, sample) in pair.iter_mut().enumerate() {
                let x = *sample as f32;
                *sample = clamp_i16(x - self.pole.process(ch, x));
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
