//! Pitch modulation through a delay line whose length follows an LFO

use super::dsp::{ms_to_samples, DelayLine, Lfo};
use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, VibratoParams};

const MIN_FREQUENCY: f32 = 0.01;
const MAX_FREQUENCY: f32 = 14.0;
const MIN_DEPTH: f32 = 0.001;
/// Delay excursion at full depth
const MAX_SWEEP_MS: f32 = 4.0;

#[derive(Debug, Clone)]
pub struct VibratoFilter {
    sweep: f32,
    lfo: Lfo,
    lines: [DelayLine; 2],
}

impl VibratoFilter {
    pub fn new(params: &VibratoParams) -> Self {
        let capacity = ms_to_samples(MAX_SWEEP_MS).ceil() as usize + 4;
        let mut filter = Self {
            sweep: 0.0,
            lfo: Lfo::new(2.0),
            lines: [DelayLine::new(capacity), DelayLine::new(capacity)],
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, params: &VibratoParams) {
        self.lfo
            .set_frequency(params.frequency.clamp(MIN_FREQUENCY, MAX_FREQUENCY));
        self.sweep = ms_to_samples(MAX_SWEEP_MS) * params.depth.clamp(MIN_DEPTH, 1.0);
    }
}

impl Filter for VibratoFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Vibrato
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Vibrato(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        for pair in frame.chunks_exact_mut(2) {
            let delay = 1.0 + self.sweep * 0.5 * (1.0 + self.lfo.next());
            for (line, sample) in self.lines.iter_mut().zip(pair.iter_mut()) {
                line.push(*sample as f32);
                *sample = clamp_i16(line.read(delay));
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

    #[test]
    fn test_constant_input_passes_unchanged() {
        let mut filter = VibratoFilter::new(&VibratoParams::default());
        let mut frame = vec![1234i16; 2 * 2000];
        filter.process(&mut frame);
        // once the line is full the delayed signal equals the input
        assert!(frame[2 * 300..].iter().all(|&s| s == 1234));
    }

    #[test]
    fn test_output_is_delayed_input() {
        let mut filter = VibratoFilter::new(&VibratoParams {
            frequency: 5.0,
            depth: 1.0,
        });
        let mut frame: Vec<i16> = (0..2000).flat_map(|i| [i as i16, i as i16]).collect();
        filter.process(&mut frame);
        for (i, pair) in frame.chunks_exact(2).enumerate().skip(300) {
            let lag = i as i32 - pair[0] as i32;
            assert!((0..=200).contains(&lag), "lag {} at {}", lag, i);
        }
    }
}
