//! Freeverb-style stereo reverb
//!
//! Eight damped feedback combs in parallel followed by four all-pass
//! diffusers per channel. The right channel's delay lines are slightly longer
//! to decorrelate the two sides.

use super::dsp::SAMPLE_RATE;
use super::Filter;
use crate::audio::types::clamp_i16;
use lyre_common::filters::{FilterKind, FilterParams, ReverbParams};

/// Comb lengths tuned at 44.1 kHz
const COMB_LENGTHS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_LENGTHS: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;

const FIXED_GAIN: f32 = 0.015;
const WET_SCALE: f32 = 3.0;
const DAMP_SCALE: f32 = 0.4;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const ALLPASS_FEEDBACK: f32 = 0.5;

fn scaled(length: usize) -> usize {
    ((length as f32 * SAMPLE_RATE / 44_100.0) as usize).max(1)
}

#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    store: f32,
}

impl Comb {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; scaled(length)],
            pos: 0,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.store = output * (1.0 - damp) + self.store * damp;
        self.buffer[self.pos] = input + self.store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

#[derive(Debug, Clone)]
struct AllPass {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllPass {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; scaled(length)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        self.buffer[self.pos] = input + buffered * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        buffered - input
    }
}

#[derive(Debug, Clone)]
struct Channel {
    combs: Vec<Comb>,
    allpasses: Vec<AllPass>,
}

impl Channel {
    fn new(spread: usize) -> Self {
        Self {
            combs: COMB_LENGTHS.iter().map(|&l| Comb::new(l + spread)).collect(),
            allpasses: ALLPASS_LENGTHS.iter().map(|&l| AllPass::new(l + spread)).collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let mut out: f32 = self
            .combs
            .iter_mut()
            .map(|c| c.process(input, feedback, damp))
            .sum();
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ReverbFilter {
    feedback: f32,
    damp: f32,
    dry: f32,
    wet1: f32,
    wet2: f32,
    channels: [Channel; 2],
}

impl ReverbFilter {
    pub fn new(params: &ReverbParams) -> Self {
        let mut filter = Self {
            feedback: 0.0,
            damp: 0.0,
            dry: 1.0,
            wet1: 0.0,
            wet2: 0.0,
            channels: [Channel::new(0), Channel::new(STEREO_SPREAD)],
        };
        filter.set(params);
        filter
    }

    fn set(&mut self, p: &ReverbParams) {
        let mix = p.mix.clamp(0.0, 1.0);
        let width = p.width.clamp(0.0, 1.0);
        self.feedback = ROOM_OFFSET + p.room_size.clamp(0.0, 1.0) * ROOM_SCALE;
        self.damp = p.damping.clamp(0.0, 1.0) * DAMP_SCALE;
        self.dry = 1.0 - mix;
        let wet = mix * WET_SCALE;
        self.wet1 = wet * (width / 2.0 + 0.5);
        self.wet2 = wet * ((1.0 - width) / 2.0);
    }
}

impl Filter for ReverbFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Reverb
    }

    fn update(&mut self, params: &FilterParams) {
        if let FilterParams::Reverb(p) = params {
            self.set(p);
        }
    }

    fn process(&mut self, frame: &mut Vec<i16>) {
        for pair in frame.chunks_exact_mut(2) {
            let l = pair[0] as f32;
            let r = pair[1] as f32;
            let input = (l + r) * FIXED_GAIN;

            let [left, right] = &mut self.channels;
            let out_l = left.process(input, self.feedback, self.damp);
            let out_r = right.process(input, self.feedback, self.damp);

            pair[0] = clamp_i16(out_l * self.wet1 + out_r * self.wet2 + l * self.dry);
            pair[1] = clamp_i16(out_r * self.wet1 + out_l * self.wet2 + r * self.dry);
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
