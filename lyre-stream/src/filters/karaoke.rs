//! Centre-channel cancellation
//!
//! Each channel subtracts the opposite one, which removes content panned to
//! the centre (usually the vocal). The mid signal restricted to the band
//! `filterBand ± filterWidth / 2` by a high-pass/low-pass pair is mixed back in
//! so that band survives. A slow energy follower then matches the output
//! loudness to the input.

use super::dsp::{Biquad, SAMPLE_RATE};
use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, KaraokeParams};
use std::f32::consts::FRAC_1_SQRT_2;

/// Energy follower coefficient per sample (about 50 ms)
const ENERGY_SMOOTHING: f32 = 1.0 / 2400.0;
const MIN_AUTO_GAIN: f32 = 0.25;
const MAX_AUTO_GAIN: f32 = 4.0;

#[derive(Debug, Clone)]
pub struct KaraokeFilter {
    level: f32,
    mono_level: f32,
    band_low: Biquad,
    band_high: Biquad,
    energy_in: f32,
    energy_out: f32,
}

impl KaraokeFilter {
    pub fn new(params: &KaraokeParams) -> Self {
        let mut filter = Self {
            level: 1.0,
            mono_level: 1.0,
            band_low: Biquad::high_pass(170.0, FRAC_1_SQRT_2),
            band_high: Biquad::low_pass(270.0, FRAC_1_SQRT_2),
            energy_in: 0.0,
            energy_out: 0.0,
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, params: &KaraokeParams) {
        self.level = params.level.clamp(0.0, 1.0);
        self.mono_level = params.mono_level.clamp(0.0, 1.0);
        let band = params.filter_band.clamp(20.0, 20_000.0);
        let width = params.filter_width.clamp(1.0, 10_000.0);

        let low = (band - width / 2.0).max(10.0);
        let high = (band + width / 2.0).min(SAMPLE_RATE * 0.45).max(low + 1.0);
        self.band_low = Biquad::high_pass(low, FRAC_1_SQRT_2);
        self.band_high = Biquad::low_pass(high, FRAC_1_SQRT_2);
    }

    fn auto_gain(&mut self, input: f32, output: f32) -> f32 {
        self.energy_in += (input - self.energy_in) * ENERGY_SMOOTHING;
        self.energy_out += (output - self.energy_out) * ENERGY_SMOOTHING;
        if self.energy_out <= f32::EPSILON {
            return 1.0;
        }
        (self.energy_in / self.energy_out)
            .sqrt()
            .clamp(MIN_AUTO_GAIN, MAX_AUTO_GAIN)
    }
}

impl Filter for KaraokeFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Karaoke
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Karaoke(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        if self.level == 0.0 {
            return;
        }

        for pair in frame.chunks_exact_mut(2) {
            let left = pair[0] as f32;
            let right = pair[1] as f32;

            let mid = (left + right) * 0.5;
            let band = self.band_high.process(0, self.band_low.process(0, mid));
            let keep = band * self.mono_level * self.level;

            let out_l = left - right * self.level + keep;
            let out_r = right - left * self.level + keep;

            let gain = self.auto_gain(
                left * left + right * right,
                out_l * out_l + out_r * out_r,
            );
            pair[0] = clamp_i16(out_l * gain);
            pair[1] = clamp_i16(out_r * gain);
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
