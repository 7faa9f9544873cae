//! PCM stages between decode and output

use crate::audio::types::{clamp_i16, BYTES_PER_FRAME};
use crate::error::Result;
use crate::filters::FilterChain;
use crate::mixer::AudioMixer;
use lyre_common::filters::FilterSettings;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One step over 48 kHz stereo i16 PCM
pub trait PcmStage: Send {
    fn name(&self) -> &'static str;

    /// Transform one burst of interleaved samples
    ///
    /// Stages may return the input allocation unchanged.
    fn process(&mut self, pcm: Vec<i16>) -> Result<Vec<i16>>;

    /// Release resources; called once during pipeline teardown
    fn destroy(&mut self) {}
}

/// Track gain, 0..=10x
pub struct VolumeStage {
    gain: f32,
}

impl VolumeStage {
    pub const MAX_GAIN: f32 = 10.0;

    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, Self::MAX_GAIN),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl PcmStage for VolumeStage {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn process(&mut self, mut pcm: Vec<i16>) -> Result<Vec<i16>> {
        if self.gain != 1.0 {
            for sample in pcm.iter_mut() {
                *sample = clamp_i16(*sample as f32 * self.gain);
            }
        }
        Ok(pcm)
    }
}

/// Blends mixer layers into the primary stream, one burst at a time
pub struct MixerStage {
    mixer: AudioMixer,
}

impl MixerStage {
    pub fn new(mixer: AudioMixer) -> Self {
        Self { mixer }
    }
}

impl PcmStage for MixerStage {
    fn name(&self) -> &'static str {
        "mixer"
    }

    fn process(&mut self, pcm: Vec<i16>) -> Result<Vec<i16>> {
        let chunk_size = pcm.len() * 2;
        let chunk_size = chunk_size - chunk_size % BYTES_PER_FRAME;
        let chunks = self.mixer.read_layer_chunks(chunk_size);
        Ok(self.mixer.mix_buffers(pcm, &chunks))
    }

    fn destroy(&mut self) {
        self.mixer.clear();
    }
}

/// Pending filter settings for a running pipeline
///
/// Settings stored here are applied by the filter stage before its next burst.
#[derive(Clone, Default)]
pub struct FilterControl {
    pending: Arc<Mutex<Option<FilterSettings>>>,
}

impl FilterControl {
    pub fn set(&self, settings: FilterSettings) {
        *self.pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(settings);
    }

    fn take(&self) -> Option<FilterSettings> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

/// Runs the DSP filter chain
pub struct FilterStage {
    chain: FilterChain,
    control: FilterControl,
}

impl FilterStage {
    pub fn new(settings: &FilterSettings, control: FilterControl) -> Self {
        Self {
            chain: FilterChain::new(settings),
            control,
        }
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }
}

impl PcmStage for FilterStage {
    fn name(&self) -> &'static str {
        "filters"
    }

    fn process(&mut self, mut pcm: Vec<i16>) -> Result<Vec<i16>> {
        if let Some(settings) = self.control.take() {
            self.chain.update(&settings);
            debug!("Filter chain updated: {:?}", self.chain.kinds());
        }
        self.chain.process(&mut pcm);
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_common::filters::FilterKind;

    #[test]
    fn test_volume_stage_scales_and_saturates() {
        let mut stage = VolumeStage::new(2.5);
        let out = stage.process(vec![100, -100, 20_000]).unwrap();
        assert_eq!(out, vec![250, -250, i16::MAX]);
        assert_eq!(VolumeStage::new(50.0).gain(), VolumeStage::MAX_GAIN);
    }

    #[test]
    fn test_unity_volume_keeps_allocation() {
        let mut stage = VolumeStage::new(1.0);
        let pcm = vec![1i16, 2, 3, 4];
        let ptr = pcm.as_ptr();
        assert_eq!(stage.process(pcm).unwrap().as_ptr(), ptr);
    }

    #[test]
    fn test_mixer_stage_without_layers_is_passthrough() {
        let mut stage = MixerStage::new(AudioMixer::new(None));
        let pcm = vec![5i16; 1920];
        let ptr = pcm.as_ptr();
        let out = stage.process(pcm).unwrap();
        assert_eq!(out.as_ptr(), ptr);
    }

    #[test]
    fn test_filter_control_applies_before_next_burst() {
        let control = FilterControl::default();
        let mut stage = FilterStage::new(&FilterSettings::default(), control.clone());
        assert!(stage.chain().is_empty());

        control.set(FilterSettings {
            volume: Some(0.5),
            ..Default::default()
        });
        let out = stage.process(vec![1000, -1000]).unwrap();
        assert_eq!(out, vec![500, -500]);
        assert_eq!(stage.chain().kinds(), vec![FilterKind::Volume]);
    }
}
