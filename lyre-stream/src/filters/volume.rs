//! Final gain stage of the chain

use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams};

pub const MAX_VOLUME: f32 = 5.0;

#[derive(Debug, Clone)]
pub struct VolumeFilter {
    volume: f32,
}

impl VolumeFilter {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, MAX_VOLUME),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl Filter for VolumeFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Volume
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Volume(v) = params {
            self.volume = v.clamp(0.0, MAX_VOLUME);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        if self.volume == 1.0 {
            return;
        }
        for sample in frame.iter_mut() {
            *sample = clamp_i16(*sample as f32 * self.volume);
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
