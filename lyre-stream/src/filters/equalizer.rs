//! 15-band equalizer
//!
//! Each band is a band-pass biquad whose output is added back to the dry
//! signal scaled by the band gain. When the positive band gains sum past 1.0
//! the whole output is scaled down by that sum to keep boosts from clipping.

use super::dsp::Biquad;
use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{EqualizerBand, FilterKind, FilterParams, EQUALIZER_BANDS};
use tracing::debug;

/// Band centre frequencies in Hz
pub const BAND_FREQUENCIES: [f32; EQUALIZER_BANDS] = [
    25.0, 40.0, 63.0, 100.0, 160.0, 250.0, 400.0, 630.0, 1000.0, 1600.0, 2500.0, 4000.0, 6300.0,
    10000.0, 16000.0,
];

const BAND_Q: f32 = 1.2;
const MIN_GAIN: f32 = -0.25;
const MAX_GAIN: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct EqualizerFilter {
    gains: [f32; EQUALIZER_BANDS],
    bands: Vec<Biquad>,
    makeup: f32,
}

impl EqualizerFilter {
    pub fn new(bands: &[EqualizerBand]) -> Self {
        let mut filter = Self {
            gains: [0.0; EQUALIZER_BANDS],
            bands: BAND_FREQUENCIES
                .iter()
                .map(|&f| Biquad::band_pass(f, BAND_Q))
                .collect(),
            makeup: 1.0,
        };
        filter.set(bands);
        filter
    }

    /// Later entries for the same band win; out-of-range bands are ignored
    fn set(&mut self, bands: &[EqualizerBand]) {
        self.gains = [0.0; EQUALIZER_BANDS];
        for band in bands {
            match self.gains.get_mut(band.band as usize) {
                Some(gain) => *gain = band.gain.clamp(MIN_GAIN, MAX_GAIN),
                None => debug!("Ignoring equalizer band {}", band.band),
            }
        }

        let boost: f32 = self.gains.iter().filter(|&&g| g > 0.0).sum();
        self.makeup = if boost > 1.0 { 1.0 / boost } else { 1.0 };
    }

    pub fn gain(&self, band: usize) -> Option<f32> {
        self.gains.get(band).copied()
    }

    pub fn makeup(&self) -> f32 {
        self.makeup
    }
}

impl Filter for EqualizerFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Equalizer
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Equalizer(bands) = params {
            self.set(bands);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        if self.gains.iter().all(|&g| g == 0.0) {
            return;
        }

        for pair in frame.chunks_exact_mut(2) {
            for (ch, sample) in pair.iter_mut().enumerate() {
                let x = *sample as f32;
                let mut acc = x;
                for (band, &gain) in self.bands.iter_mut().zip(self.gains.iter()) {
                    if gain != 0.0 {
                        acc += gain * band.process(ch, x);
                    }
                }
                *sample = clamp_i16(acc * self.makeup);
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
