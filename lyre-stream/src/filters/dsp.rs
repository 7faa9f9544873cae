//! Building blocks shared by the time-varying effects

use std::f32::consts::{PI, TAU};

/// Processing rate of every filter
pub const SAMPLE_RATE: f32 = 48_000.0;

/// Samples covering `ms` milliseconds
#[inline]
pub fn ms_to_samples(ms: f32) -> f32 {
    ms * SAMPLE_RATE / 1000.0
}

/// Sine low-frequency oscillator
#[derive(Debug, Clone)]
pub struct Lfo {
    phase: f32,
    increment: f32,
}

impl Lfo {
    pub fn new(frequency: f32) -> Self {
        Self::with_phase(frequency, 0.0)
    }

    /// Start at `phase` radians
    pub fn with_phase(frequency: f32, phase: f32) -> Self {
        let mut lfo = Self {
            phase: phase.rem_euclid(TAU),
            increment: 0.0,
        };
        lfo.set_frequency(frequency);
        lfo
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.increment = TAU * frequency / SAMPLE_RATE;
    }

    /// Current value in -1..=1, then advance one sample
    #[inline]
    pub fn next(&mut self) -> f32 {
        let value = self.phase.sin();
        self.phase += self.increment;
        if self.phase >= TAU {
            self.phase -= TAU;
        }
        value
    }
}

/// Circular delay line with fractional reads
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    /// Next slot to write
    pos: usize,
}

impl DelayLine {
    /// Line able to delay by up to `max_delay` samples
    pub fn new(max_delay: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay.max(2) + 1],
            pos: 0,
        }
    }

    pub fn max_delay(&self) -> f32 {
        (self.buffer.len() - 1) as f32
    }

    /// Sample written `delay` samples ago, linearly interpolated
    ///
    /// A delay of 1 is the most recent push. Delays outside the line are clamped.
    #[inline]
    pub fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1.0, self.max_delay());
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let newer = self.buffer[(self.pos + len - whole) % len];
        let older = self.buffer[(self.pos + len - whole - 1) % len];
        newer + (older - newer) * frac
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.buffer[self.pos] = sample;
        self.pos = (self.pos + 1) % self.buffer.len();
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

/// Second-order section in direct form I, one state per channel
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    state: [[f32; 4]; 2],
}

impl Biquad {
    fn from_coefficients(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            state: [[0.0; 4]; 2],
        }
    }

    fn omega(frequency: f32, q: f32) -> (f32, f32) {
        let frequency = frequency.clamp(10.0, SAMPLE_RATE * 0.49);
        let w0 = 2.0 * PI * frequency / SAMPLE_RATE;
        (w0.cos(), w0.sin() / (2.0 * q))
    }

    /// Band-pass with 0 dB peak gain
    pub fn band_pass(frequency: f32, q: f32) -> Self {
        let (cos, alpha) = Self::omega(frequency, q);
        Self::from_coefficients(alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
    }

    pub fn low_pass(frequency: f32, q: f32) -> Self {
        let (cos, alpha) = Self::omega(frequency, q);
        let b1 = 1.0 - cos;
        Self::from_coefficients(b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
    }

    pub fn high_pass(frequency: f32, q: f32) -> Self {
        let (cos, alpha) = Self::omega(frequency, q);
        let b1 = -(1.0 + cos);
        Self::from_coefficients(-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
    }

    #[inline]
    pub fn process(&mut self, channel: usize, x: f32) -> f32 {
        let [x1, x2, y1, y2] = self.state[channel];
        let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
        self.state[channel] = [x, x1, y, y1];
        y
    }

    pub fn reset(&mut self) {
        self.state = [[0.0; 4]; 2];
    }
}
