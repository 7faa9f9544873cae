//! DSP filter chain
//!
//! Filters transform interleaved stereo i16 PCM at 48 kHz. They run in
//! ascending priority order; timescale has the lowest priority because it is
//! the only filter allowed to change the frame length.
//!
//! Parameters are clamped when applied through [`Filter::update`]. `process`
//! depends only on the filter's own state and the input frame, and every
//! output sample is saturated to the i16 range.

mod channel_mix;
mod distortion;
pub mod dsp;
mod equalizer;
mod karaoke;
mod modulated_delay;
mod panning;
mod phaser;
mod reverb;
mod smoothing;
mod timescale;
mod tremolo;
mod vibrato;
mod volume;

pub use channel_mix::ChannelMixFilter;
pub use distortion::DistortionFilter;
pub use equalizer::{EqualizerFilter, BAND_FREQUENCIES};
pub use karaoke::KaraokeFilter;
pub use modulated_delay::{ChorusFilter, FlangerFilter};
pub use panning::{RotationFilter, SpatialFilter};
pub use phaser::PhaserFilter;
pub use reverb::ReverbFilter;
pub use smoothing::{HighPassFilter, LowPassFilter};
pub use timescale::TimescaleFilter;
pub use tremolo::TremoloFilter;
pub use vibrato::VibratoFilter;
pub use volume::VolumeFilter;

use lyre_common::filters::{FilterKind, FilterParams, FilterSettings};
use tracing::debug;

/// Execution order of each effect, lowest first
pub fn priority(kind: FilterKind) -> u8 {
    match kind {
        FilterKind::Timescale => 0,
        FilterKind::Equalizer => 10,
        FilterKind::Karaoke => 20,
        FilterKind::LowPass => 30,
        FilterKind::HighPass => 31,
        FilterKind::Distortion => 40,
        FilterKind::ChannelMix => 50,
        FilterKind::Tremolo => 60,
        FilterKind::Vibrato => 61,
        FilterKind::Chorus => 70,
        FilterKind::Flanger => 71,
        FilterKind::Phaser => 72,
        FilterKind::Rotation => 80,
        FilterKind::Spatial => 81,
        FilterKind::Reverb => 90,
        FilterKind::Volume => 100,
    }
}

/// A stateful effect over interleaved stereo frames
pub trait Filter: Send {
    fn kind(&self) -> FilterKind;

    fn priority(&self) -> u8 {
        priority(self.kind())
    }

    /// Apply new parameters, clamping each into its range
    ///
    /// Parameters for a different effect are ignored.
    fn update(&mut self, params: &FilterParams);

    /// Transform one frame in place
    fn process(&mut self, frame: &mut Vec<i16>);

    /// Copy of the filter including its internal state
    fn clone_box(&self) -> Box<dyn Filter>;
}

/// Construct the filter for one enabled effect
pub fn build(params: &FilterParams) -> Box<dyn Filter> {
    match params {
        FilterParams::Timescale(p) => Box::new(TimescaleFilter::new(p)),
        FilterParams::Equalizer(bands) => Box::new(EqualizerFilter::new(bands)),
        FilterParams::Karaoke(p) => Box::new(KaraokeFilter::new(p)),
        FilterParams::LowPass(p) => Box::new(LowPassFilter::new(p)),
        FilterParams::HighPass(p) => Box::new(HighPassFilter::new(p)),
        FilterParams::Distortion(p) => Box::new(DistortionFilter::new(p)),
        FilterParams::ChannelMix(p) => Box::new(ChannelMixFilter::new(p)),
        FilterParams::Tremolo(p) => Box::new(TremoloFilter::new(p)),
        FilterParams::Vibrato(p) => Box::new(VibratoFilter::new(p)),
        FilterParams::Chorus(p) => Box::new(ChorusFilter::new(p)),
        FilterParams::Flanger(p) => Box::new(FlangerFilter::new(p)),
        FilterParams::Phaser(p) => Box::new(PhaserFilter::new(p)),
        FilterParams::Rotation(p) => Box::new(RotationFilter::new(p)),
        FilterParams::Spatial(p) => Box::new(SpatialFilter::new(p)),
        FilterParams::Reverb(p) => Box::new(ReverbFilter::new(p)),
        FilterParams::Volume(v) => Box::new(VolumeFilter::new(*v)),
    }
}

/// Ordered set of enabled filters
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new(settings: &FilterSettings) -> Self {
        let mut chain = Self::default();
        chain.update(settings);
        chain
    }

    /// Reconcile the chain with `settings`
    ///
    /// Filters that stay enabled keep their state and receive the new
    /// parameters; newly enabled filters start fresh; absent ones are dropped.
    pub fn update(&mut self, settings: &FilterSettings) {
        let enabled = settings.enabled();
        self.filters
            .retain(|f| enabled.iter().any(|p| p.kind() == f.kind()));

        for params in &enabled {
            match self.filters.iter_mut().find(|f| f.kind() == params.kind()) {
                Some(filter) => filter.update(params),
                None => {
                    debug!("Enabling {:?} filter", params.kind());
                    self.filters.push(build(params));
                }
            }
        }
        self.filters.sort_by_key(|f| f.priority());
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Enabled effects in execution order
    pub fn kinds(&self) -> Vec<FilterKind> {
        self.filters.iter().map(|f| f.kind()).collect()
    }

    pub fn process(&mut self, frame: &mut Vec<i16>) {
        for filter in &mut self.filters {
            filter.process(frame);
        }
    }
}

impl Clone for FilterChain {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.iter().map(|f| f.clone_box()).collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Loud stereo test signal: detuned sines with hard-clipped bursts
    pub fn signal(frames: usize) -> Vec<i16> {
        let mut out = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f32 / 48_000.0;
            let l = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 30_000.0;
            let r = (2.0 * std::f32::consts::PI * 663.0 * t).sin() * 30_000.0;
            if (i / 200) % 5 == 0 {
                out.push(if l >= 0.0 { i16::MAX } else { i16::MIN });
                out.push(if r >= 0.0 { i16::MAX } else { i16::MIN });
            } else {
                out.push(l as i16);
                out.push(r as i16);
            }
        }
        out
    }

    /// Peak absolute sample
    pub fn peak(frame: &[i16]) -> i32 {
        frame.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::signal;
    use super::*;
    use lyre_common::filters::*;

    /// Every effect enabled with strong settings
    fn everything() -> FilterSettings {
        FilterSettings {
            volume: Some(4.0),
            equalizer: Some(vec![
                EqualizerBand { band: 0, gain: 1.0 },
                EqualizerBand { band: 7, gain: 0.5 },
                EqualizerBand { band: 14, gain: -0.25 },
            ]),
            karaoke: Some(KaraokeParams::default()),
            timescale: Some(TimescaleParams {
                speed: 1.25,
                pitch: 1.0,
                rate: 1.0,
            }),
            tremolo: Some(TremoloParams::default()),
            vibrato: Some(VibratoParams::default()),
            rotation: Some(RotationParams::default()),
            distortion: Some(DistortionParams::default()),
            channel_mix: Some(ChannelMixParams {
                left_to_left: 1.0,
                left_to_right: 1.0,
                right_to_left: 1.0,
                right_to_right: 1.0,
            }),
            low_pass: Some(SmoothingParams::default()),
            high_pass: Some(SmoothingParams { smoothing: 2.0 }),
            reverb: Some(ReverbParams { mix: 1.0, room_size: 1.0, damping: 0.0, width: 1.0 }),
            chorus: Some(ModulationParams { feedback: 0.95, ..Default::default() }),
            flanger: Some(ModulationParams { feedback: -0.95, delay: 2.0, ..Default::default() }),
            phaser: Some(PhaserParams { feedback: 0.95, ..Default::default() }),
            spatial: Some(SpatialParams::default()),
        }
    }

    #[test]
    fn test_priorities_are_distinct_and_timescale_first() {
        let mut seen = std::collections::HashSet::new();
        for params in everything().enabled() {
            assert!(seen.insert(priority(params.kind())));
        }
        assert_eq!(seen.len(), 16);
        assert_eq!(priority(FilterKind::Timescale), 0);
        assert_eq!(priority(FilterKind::Volume), 100);
    }

    #[test]
    fn test_chain_runs_in_priority_order() {
        let chain = FilterChain::new(&everything());
        let kinds = chain.kinds();
        assert_eq!(kinds.len(), 16);
        assert_eq!(kinds.first(), Some(&FilterKind::Timescale));
        assert_eq!(kinds.last(), Some(&FilterKind::Volume));
        let priorities: Vec<u8> = kinds.iter().map(|&k| priority(k)).collect();
        assert!(priorities.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_every_filter_is_deterministic() {
        for params in everything().enabled() {
            let mut filter = build(&params);
            // build some history first
            let mut warmup = signal(2048);
            filter.process(&mut warmup);

            let mut twin = filter.clone_box();
            let mut a = signal(960);
            let mut b = a.clone();
            filter.process(&mut a);
            twin.process(&mut b);
            assert_eq!(a, b, "{:?} is not deterministic", params.kind());
        }
    }

    #[test]
    fn test_only_timescale_changes_length() {
        for params in everything().enabled() {
            let mut filter = build(&params);
            let mut total_out = 0;
            for _ in 0..10 {
                let mut frame = signal(960);
                filter.process(&mut frame);
                assert_eq!(frame.len() % 2, 0);
                total_out += frame.len();
            }
            if params.kind() == FilterKind::Timescale {
                assert_ne!(total_out, 10 * 960 * 2);
            } else {
                assert_eq!(total_out, 10 * 960 * 2, "{:?} changed the length", params.kind());
            }
        }
    }

    #[test]
    fn test_full_chain_survives_extreme_input() {
        let mut chain = FilterChain::new(&everything());
        for _ in 0..50 {
            let mut frame = signal(960);
            chain.process(&mut frame);
            assert_eq!(frame.len() % 2, 0);
        }
    }

    #[test]
    fn test_update_keeps_and_drops_filters() {
        let mut settings = FilterSettings {
            volume: Some(0.5),
            reverb: Some(ReverbParams::default()),
            ..Default::default()
        };
        let mut chain = FilterChain::new(&settings);
        assert_eq!(chain.kinds(), vec![FilterKind::Reverb, FilterKind::Volume]);

        settings.reverb = None;
        settings.timescale = Some(TimescaleParams::default());
        chain.update(&settings);
        assert_eq!(chain.kinds(), vec![FilterKind::Timescale, FilterKind::Volume]);

        chain.update(&FilterSettings::default());
        assert!(chain.is_empty());
    }

    #[test]
    fn test_update_applies_new_parameters() {
        let mut chain = FilterChain::new(&FilterSettings {
            volume: Some(1.0),
            ..Default::default()
        });
        chain.update(&FilterSettings {
            volume: Some(0.5),
            ..Default::default()
        });
        let mut frame = vec![1000, -1000];
        chain.process(&mut frame);
        assert_eq!(frame, vec![500, -500]);
    }
}
