//! Amplitude modulation

use super::dsp::Lfo;
use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, TremoloParams};

const MIN_FREQUENCY: f32 = 0.01;
const MAX_FREQUENCY: f32 = 20.0;
const MIN_DEPTH: f32 = 0.001;

#[derive(Debug, Clone)]
pub struct TremoloFilter {
    depth: f32,
    lfo: Lfo,
}

impl TremoloFilter {
    pub fn new(params: &TremoloParams) -> Self {
        let mut filter = Self {
            depth: 0.5,
            lfo: Lfo::new(2.0),
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, params: &TremoloParams) {
        self.lfo
            .set_frequency(params.frequency.clamp(MIN_FREQUENCY, MAX_FREQUENCY));
        self.depth = params.depth.clamp(MIN_DEPTH, 1.0);
    }
}

impl Filter for TremoloFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Tremolo
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Tremolo(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        for pair in frame.chunks_exact_mut(2) {
            // gain swings between 1 - depth and 1
            let gain = 1.0 - self.depth * 0.5 * (1.0 + self.lfo.next());
            for sample in pair.iter_mut() {
                *sample = clamp_i16(*sample as f32 * gain);
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
    fn test_full_depth_reaches_silence_and_unity() {
        let mut filter = TremoloFilter::new(&TremoloParams {
            frequency: 10.0,
            depth: 1.0,
        });
        let mut frame = vec![10_000i16; 2 * 4800];
        filter.process(&mut frame);
        let min = frame.iter().copied().min().unwrap_or(0);
        let max = frame.iter().copied().max().unwrap_or(0);
        assert!(min < 50);
        assert!(max > 9_950);
    }

    #[test]
    fn test_never_amplifies() {
        let mut filter = TremoloFilter::new(&TremoloParams::default());
        for _ in 0..100 {
            let mut frame = vec![-20_000, 20_000];
            filter.process(&mut frame);
            assert!((-20_000..=0).contains(&frame[0]));
            assert!((0..=20_000).contains(&frame[1]));
        }
    }

    #[test]
    fn test_ranges_clamped() {
        let filter = TremoloFilter::new(&TremoloParams {
            frequency: 0.0,
            depth: 0.0,
        });
        assert_eq!(filter.depth, MIN_DEPTH);
    }
}
