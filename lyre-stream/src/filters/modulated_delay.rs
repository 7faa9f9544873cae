//! Chorus and flanger
//!
//! Both read a delay line at a position swept by an LFO around a base delay,
//! feed part of the delayed signal back into the line and blend it with the
//! dry input. They differ in their delay ranges and in stereo phase: the
//! chorus runs the right channel's LFO a quarter cycle ahead.

use super::dsp::{ms_to_samples, DelayLine, Lfo};
use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, ModulationParams};
use std::f32::consts::FRAC_PI_2;

const MIN_RATE: f32 = 0.01;
const MAX_RATE: f32 = 10.0;
const MAX_FEEDBACK: f32 = 0.95;

#[derive(Debug, Clone, Copy)]
struct DelayRange {
    min_ms: f32,
    max_ms: f32,
}

const CHORUS_RANGE: DelayRange = DelayRange {
    min_ms: 1.0,
    max_ms: 50.0,
};

const FLANGER_RANGE: DelayRange = DelayRange {
    min_ms: 0.1,
    max_ms: 10.0,
};

#[derive(Debug, Clone)]
struct ModulatedDelay {
    range: DelayRange,
    base: f32,
    excursion: f32,
    feedback: f32,
    mix: f32,
    lfos: [Lfo; 2],
    lines: [DelayLine; 2],
}

impl ModulatedDelay {
    fn new(range: DelayRange, right_phase: f32, params: &ModulationParams) -> Self {
        // base + excursion never exceeds 1.5x the longest base delay
        let capacity = ms_to_samples(range.max_ms * 1.5).ceil() as usize + 4;
        let mut delay = Self {
            range,
            base: 0.0,
            excursion: 0.0,
            feedback: 0.0,
            mix: 0.0,
            lfos: [Lfo::new(params.rate), Lfo::with_phase(params.rate, right_phase)],
            lines: [DelayLine::new(capacity), DelayLine::new(capacity)],
        };
        delay.set(params);
        delay
    }

    fn set(&mut self, params: &ModulationParams) {
        let rate = params.rate.clamp(MIN_RATE, MAX_RATE);
        for lfo in &mut self.lfos {
            lfo.set_frequency(rate);
        }
        self.base = ms_to_samples(params.delay.clamp(self.range.min_ms, self.range.max_ms));
        self.excursion = self.base * 0.5 * params.depth.clamp(0.0, 1.0);
        self.feedback = params.feedback.clamp(-MAX_FEEDBACK, MAX_FEEDBACK);
        self.mix = params.mix.clamp(0.0, 1.0);
    }

    fn process(&mut self, frame: &mut [i16]) {
        for pair in frame.chunks_exact_mut(2) {
            for ch in 0..2 {
                let x = pair[ch] as f32;
                let delay = self.base + self.excursion * self.lfos[ch].next();
                let wet = self.lines[ch].read(delay);
                self.lines[ch].push(x + wet * self.feedback);
                pair[ch] = clamp_i16(x * (1.0 - self.mix) + wet * self.mix);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChorusFilter {
    inner: ModulatedDelay,
}

impl ChorusFilter {
    pub fn new(params: &ModulationParams) -> Self {
        Self {
            inner: ModulatedDelay::new(CHORUS_RANGE, FRAC_PI_2, params),
        }
    }
}

impl Filter for ChorusFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Chorus
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Chorus(p) = params {
            self.inner.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        self.inner.process(frame);
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FlangerFilter {
    inner: ModulatedDelay,
}

impl FlangerFilter {
    pub fn new(params: &ModulationParams) -> Self {
        Self {
            inner: ModulatedDelay::new(FLANGER_RANGE, 0.0, params),
        }
    }
}

impl Filter for FlangerFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Flanger
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Flanger(p) = params {
            self.inner.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        self.inner.process(frame);
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
