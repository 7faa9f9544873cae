//! Trigonometric waveshaper
//!
//! On the normalized sample `x`:
//! `y = offset + scale * (sinOffset + sin(x * sinScale)) * (cosOffset + cos(x * cosScale)) * (tanOffset + tan(x * tanScale))`

use super::Filter;
use crate::audio::types::{f32_to_i16, i16_to_f32};
use lyre_common::filters::{DistortionParams, FilterKind, FilterParams};

const LIMIT: f32 = 10.0;

#[derive(Debug, Clone)]
pub struct DistortionFilter {
    params: DistortionParams,
}

impl DistortionFilter {
    pub fn new(params: &DistortionParams) -> Self {
        let mut filter = Self { params: *params };
        filter.set(params);
        filter
    }

    fn set(&mut self, p: &DistortionParams) {
        let c = |v: f32| v.clamp(-LIMIT, LIMIT);
        self.params = DistortionParams {
            sin_offset: c(p.sin_offset),
            sin_scale: c(p.sin_scale),
            cos_offset: c(p.cos_offset),
            cos_scale: c(p.cos_scale),
            tan_offset: c(p.tan_offset),
            tan_scale: c(p.tan_scale),
            offset: c(p.offset),
            scale: c(p.scale),
        };
    }

    #[inline]
    fn shape(&self, x: f32) -> f32 {
        let p = &self.params;
        let sin = p.sin_offset + (x * p.sin_scale).sin();
        let cos = p.cos_offset + (x * p.cos_scale).cos();
        let tan = p.tan_offset + (x * p.tan_scale).tan();
        let y = p.offset + p.scale * sin * cos * tan;
        if y.is_finite() {
            y.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Filter for DistortionFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Distortion
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Distortion(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        for sample in frame.iter_mut() {
            *sample = f32_to_i16(self.shape(i16_to_f32(*sample)));
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
