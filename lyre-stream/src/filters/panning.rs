//! Auto-pan rotation and LFO-driven pseudo-3D spatialization

use super::dsp::{ms_to_samples, DelayLine, Lfo};
use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, RotationParams, SpatialParams};

const MAX_ROTATION_HZ: f32 = 5.0;

/// Sweeps the stereo image from side to side
#[derive(Debug, Clone)]
pub struct RotationFilter {
    lfo: Lfo,
    enabled: bool,
}

impl RotationFilter {
    pub fn new(params: &RotationParams) -> Self {
        let mut filter = Self {
            lfo: Lfo::new(0.0),
            enabled: false,
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, params: &RotationParams) {
        let hz = params.rotation_hz.clamp(0.0, MAX_ROTATION_HZ);
        self.lfo.set_frequency(hz);
        self.enabled = hz > 0.0;
    }
}

impl Filter for RotationFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Rotation
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Rotation(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        if !self.enabled {
            return;
        }
        for pair in frame.chunks_exact_mut(2) {
            // pan -1 is hard left, +1 hard right; the centre keeps both at unity
            let pan = self.lfo.next();
            let left_gain = (1.0 - pan).min(1.0);
            let right_gain = (1.0 + pan).min(1.0);
            pair[0] = clamp_i16(pair[0] as f32 * left_gain);
            pair[1] = clamp_i16(pair[1] as f32 * right_gain);
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

const MIN_SPATIAL_RATE: f32 = 0.01;
const MAX_SPATIAL_RATE: f32 = 5.0;
/// Largest interaural delay used
const MAX_ITD_MS: f32 = 0.7;

/// Opposed, slowly modulated inter-channel delays
#[derive(Debug, Clone)]
pub struct SpatialFilter {
    depth: f32,
    max_delay: f32,
    lfo: Lfo,
    lines: [DelayLine; 2],
}

impl SpatialFilter {
    pub fn new(params: &SpatialParams) -> Self {
        let max_delay = ms_to_samples(MAX_ITD_MS);
        let capacity = max_delay.ceil() as usize + 2;
        let mut filter = Self {
            depth: 0.0,
            max_delay,
            lfo: Lfo::new(0.15),
            lines: [DelayLine::new(capacity), DelayLine::new(capacity)],
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, params: &SpatialParams) {
        self.lfo
            .set_frequency(params.rate.clamp(MIN_SPATIAL_RATE, MAX_SPATIAL_RATE));
        self.depth = params.depth.clamp(0.0, 1.0);
    }
}

impl Filter for SpatialFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Spatial
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Spatial(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        let wet = self.depth * 0.5;
        for pair in frame.chunks_exact_mut(2) {
            let sweep = self.lfo.next();
            let swing = self.depth * self.max_delay * 0.5;
            let delays = [1.0 + swing * (1.0 + sweep), 1.0 + swing * (1.0 - sweep)];
            for ch in 0..2 {
                let x = pair[ch] as f32;
                self.lines[ch].push(x);
                let delayed = self.lines[ch].read(delays[ch]);
                pair[ch] = clamp_i16(x * (1.0 - wet) + delayed * wet);
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
    fn test_rotation_zero_is_passthrough() {
        let mut filter = RotationFilter::new(&RotationParams { rotation_hz: 0.0 });
        let input = vec![1000, -1000, 2000, -2000];
        let mut frame = input.clone();
        filter.process(&mut frame);
        assert_eq!(frame, input);
    }

    #[test]
    fn test_rotation_moves_between_channels() {
        let mut filter = RotationFilter::new(&RotationParams { rotation_hz: 5.0 });
        let mut frame = vec![10_000i16; 2 * 9600];
        filter.process(&mut frame);
        let left: Vec<i16> = frame.iter().step_by(2).copied().collect();
        let right: Vec<i16> = frame.iter().skip(1).step_by(2).copied().collect();
        assert!(left.iter().any(|&s| s < 100));
        assert!(right.iter().any(|&s| s < 100));
        assert!(peak(&left) <= 10_000 && peak(&right) <= 10_000);
    }

    #[test]
    fn test_spatial_delay_stays_small() {
        let filter = SpatialFilter::new(&SpatialParams { rate: 1.0, depth: 1.0 });
        assert!(filter.max_delay <= ms_to_samples(0.7) + 1e-3);
    }

    #[test]
    fn test_spatial_zero_depth_is_passthrough() {
        let mut filter = SpatialFilter::new(&SpatialParams { rate: 1.0, depth: 0.0 });
        let input: Vec<i16> = (0..200).map(|i| (i * 50) as i16).collect();
        let mut frame = input.clone();
        filter.process(&mut frame);
        assert_eq!(frame, input);
    }
}
