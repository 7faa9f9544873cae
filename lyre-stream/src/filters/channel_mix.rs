//! Stereo matrix: each output channel is a weighted sum of both inputs

use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{ChannelMixParams, FilterKind, FilterParams};

#[derive(Debug, Clone)]
pub struct ChannelMixFilter {
    left_to_left: f32,
    left_to_right: f32,
    right_to_left: f32,
    right_to_right: f32,
}

impl ChannelMixFilter {
    pub fn new(params: &ChannelMixParams) -> Self {
        let mut filter = Self {
            left_to_left: 1.0,
            left_to_right: 0.0,
            right_to_left: 0.0,
            right_to_right: 1.0,
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, p: &ChannelMixParams) {
        self.left_to_left = p.left_to_left.clamp(0.0, 1.0);
        self.left_to_right = p.left_to_right.clamp(0.0, 1.0);
        self.right_to_left = p.right_to_left.clamp(0.0, 1.0);
        self.right_to_right = p.right_to_right.clamp(0.0, 1.0);
    }
}

impl Filter for ChannelMixFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::ChannelMix
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::ChannelMix(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        for pair in frame.chunks_exact_mut(2) {
            let l = pair[0] as f32;
            let r = pair[1] as f32;
            pair[0] = clamp_i16(l * self.left_to_left + r * self.right_to_left);
            pair[1] = clamp_i16(l * self.left_to_right + r * self.right_to_right);
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
    fn test_default_is_identity() {
        let mut filter = ChannelMixFilter::new(&ChannelMixParams::default());
        let mut frame = vec![100, -200, 300, -400];
        filter.process(&mut frame);
        assert_eq!(frame, vec![100, -200, 300, -400]);
    }

    #[test]
    fn test_swap_channels() {
        let mut filter = ChannelMixFilter::new(&ChannelMixParams {
            left_to_left: 0.0,
            left_to_right: 1.0,
            right_to_left: 1.0,
            right_to_right: 0.0,
        });
        let mut frame = vec![100, -200];
        filter.process(&mut frame);
        assert_eq!(frame, vec![-200, 100]);
    }

    #[test]
    fn test_mono_sum_saturates() {
        let mut filter = ChannelMixFilter::new(&ChannelMixParams {
            left_to_left: 5.0,
            left_to_right: 1.0,
            right_to_left: 1.0,
            right_to_right: 1.0,
        });
        let mut frame = vec![30_000, 30_000, -30_000, -30_000];
        filter.process(&mut frame);
        assert_eq!(frame, vec![i16::MAX, i16::MAX, i16::MIN, i16::MIN]);
    }
}
