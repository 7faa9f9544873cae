//! Swept all-pass phaser
//!
//! A cascade of first-order all-pass stages shares one coefficient
//! `a = (t - 1) / (t + 1)` with `t = tan(pi * f / fs)`, where `f` sweeps
//! around the centre frequency by up to two octaves at full depth.

use super::dsp::{Lfo, SAMPLE_RATE};
use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, PhaserParams};
use std::f32::consts::PI;

pub const MIN_STAGES: usize = 2;
pub const MAX_STAGES: usize = 12;
const MIN_RATE: f32 = 0.01;
const MAX_RATE: f32 = 10.0;
const MAX_FEEDBACK: f32 = 0.95;
const SWEEP_OCTAVES: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default)]
struct AllPassState {
    x1: f32,
    y1: f32,
}

#[derive(Debug, Clone)]
pub struct PhaserFilter {
    stages: usize,
    depth: f32,
    feedback: f32,
    mix: f32,
    center: f32,
    lfo: Lfo,
    state: [[AllPassState; MAX_STAGES]; 2],
    last: [f32; 2],
}

impl PhaserFilter {
    pub fn new(params: &PhaserParams) -> Self {
        let mut filter = Self {
            stages: 4,
            depth: 0.0,
            feedback: 0.0,
            mix: 0.0,
            center: 1000.0,
            lfo: Lfo::new(0.5),
            state: [[AllPassState::default(); MAX_STAGES]; 2],
            last: [0.0; 2],
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, p: &PhaserParams) {
        // odd counts round down to an even number of stages
        self.stages = (p.stages as usize).clamp(MIN_STAGES, MAX_STAGES) & !1;
        self.lfo.set_frequency(p.rate.clamp(MIN_RATE, MAX_RATE));
        self.depth = p.depth.clamp(0.0, 1.0);
        self.feedback = p.feedback.clamp(-MAX_FEEDBACK, MAX_FEEDBACK);
        self.mix = p.mix.clamp(0.0, 1.0);
        self.center = p.center_frequency.clamp(100.0, 8000.0);
    }

    pub fn stages(&self) -> usize {
        self.stages
    }

    #[inline]
    fn coefficient(&self, sweep: f32) -> f32 {
        let frequency = (self.center * (SWEEP_OCTAVES * self.depth * sweep).exp2())
            .clamp(20.0, SAMPLE_RATE * 0.45);
        let t = (PI * frequency / SAMPLE_RATE).tan();
        (t - 1.0) / (t + 1.0)
    }
}

impl Filter for PhaserFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Phaser
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Phaser(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        for pair in frame.chunks_exact_mut(2) {
            let a = self.coefficient(self.lfo.next());
            for ch in 0..2 {
                let dry = pair[ch] as f32;
                let mut signal = dry + self.last[ch] * self.feedback;
                for stage in self.state[ch].iter_mut().take(self.stages) {
                    let y = a * signal + stage.x1 - a * stage.y1;
                    stage.x1 = signal;
                    stage.y1 = y;
                    signal = y;
                }
                self.last[ch] = signal;
                pair[ch] = clamp_i16(dry * (1.0 - self.mix) + signal * self.mix);
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::peak;

    #[test]
    fn test_stage_count_clamped_and_even() {
        let stages = |n: u8| PhaserFilter::new(&PhaserParams { stages: n, ..Default::default() }).stages();
        assert_eq!(stages(0), 2);
        assert_eq!(stages(5), 4);
        assert_eq!(stages(12), 12);
        assert_eq!(stages(200), 12);
    }

    #[test]
    fn test_coefficient_is_stable() {
        let filter = PhaserFilter::new(&PhaserParams {
            depth: 1.0,
            center_frequency: 8000.0,
            ..Default::default()
        });
        for sweep in [-1.0, 0.0, 1.0] {
            assert!(filter.coefficient(sweep).abs() < 1.0);
        }
    }

    #[test]
    fn test_all_pass_keeps_level_without_feedback() {
        let mut filter = PhaserFilter::new(&PhaserParams {
            feedback: 0.0,
            mix: 1.0,
            depth: 0.0,
            ..Default::default()
        });
        let mut frame: Vec<i16> = (0..9600)
            .flat_map(|i| {
                let s = ((2.0 * PI * 500.0 * i as f32 / 48_000.0).sin() * 10_000.0) as i16;
                [s, s]
            })
            .collect();
        filter.process(&mut frame);
        let settled = peak(&frame[9600..]);
        assert!((9_500..=10_500).contains(&settled), "peak {}", settled);
    }
}
