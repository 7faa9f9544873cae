//! Wiring a pipeline from a format and a set of options

use super::stages::{FilterControl, FilterStage, MixerStage, PcmStage, VolumeStage};
use super::Pipeline;
use crate::audio::types::{frames_for_ms, TARGET_CHANNELS};
use crate::audio::{DecodeOptions, DecodeStage, OpusFrameEncoder, OpusSettings, ResamplerQuality};
use crate::error::Result;
use crate::mixer::AudioMixer;
use lyre_common::api::{OutputEncoding, StreamRequest};
use lyre_common::config::StreamingConfig;
use lyre_common::filters::FilterSettings;
use lyre_common::AudioFormat;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle events buffered per pipeline before new ones are dropped
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Everything that shapes one pipeline
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Linear track gain, 1.0 is unity
    pub gain: f32,
    /// Decoded audio before this offset is discarded
    pub position_ms: u64,
    pub filters: FilterSettings,
    /// Attach a mixer so layers can be added
    pub mixer: bool,
    pub encoding: OutputEncoding,
    pub decode: DecodeOptions,
    pub opus: OpusSettings,
    pub event_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            gain: 1.0,
            position_ms: 0,
            filters: FilterSettings::default(),
            mixer: false,
            encoding: OutputEncoding::Pcm,
            decode: DecodeOptions::default(),
            opus: OpusSettings::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl PipelineOptions {
    /// Engine-wide settings from the service configuration
    pub fn from_config(config: &StreamingConfig) -> Result<Self> {
        let quality: ResamplerQuality = config.resampler_quality.parse()?;
        Ok(Self {
            mixer: config.mixer_enabled,
            decode: DecodeOptions {
                quality,
                high_water_bytes: config.high_water_bytes,
                low_water_bytes: config.low_water_bytes,
                max_decode_ops: config.max_decode_ops,
            },
            opus: OpusSettings {
                bitrate: config.opus_bitrate,
                ..OpusSettings::default()
            },
            ..Self::default()
        })
    }

    /// Apply the per-request parts of a stream request
    pub fn with_request(mut self, request: &StreamRequest) -> Self {
        self.gain = request.gain();
        self.position_ms = request.position_ms;
        self.filters = request.filters.clone();
        self.encoding = request.encoding;
        self
    }
}

/// Builds [`Pipeline`]s
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    options: PipelineOptions,
}

impl PipelineBuilder {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Assemble the stages for `format`
    ///
    /// Stage order is decode, volume, mixer (when enabled), filters, then the
    /// Opus encoder for Opus output.
    pub fn build(&self, format: AudioFormat) -> Result<Pipeline> {
        let options = &self.options;
        let id = Uuid::new_v4();
        let (events, event_rx) = mpsc::channel(options.event_capacity.max(1));

        let decode = DecodeStage::new(format, options.decode)?;

        let mut stages: Vec<Box<dyn PcmStage>> = Vec::with_capacity(3);
        stages.push(Box::new(VolumeStage::new(options.gain)));

        let mixer = if options.mixer {
            let mixer = AudioMixer::new(Some(events.clone()));
            stages.push(Box::new(MixerStage::new(mixer.clone())));
            Some(mixer)
        } else {
            None
        };

        let filters = FilterControl::default();
        stages.push(Box::new(FilterStage::new(&options.filters, filters.clone())));

        let encoder = match options.encoding {
            OutputEncoding::Opus => Some(OpusFrameEncoder::new(options.opus)?),
            OutputEncoding::Pcm => None,
        };

        let pipeline = Pipeline {
            id,
            decode: Some(decode),
            stages,
            encoder,
            mixer,
            filters,
            events,
            event_rx: Some(event_rx),
            skip_samples: frames_for_ms(options.position_ms) * TARGET_CHANNELS as u64,
            destroyed: false,
        };
        debug!(
            "Pipeline {} built for {:?}: {}",
            id,
            format,
            pipeline.stage_names().join(" -> ")
        );
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_common::PipelineEvent;

    fn destroyed_stages(rx: &mut mpsc::Receiver<PipelineEvent>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StageDestroyed { stage } = event {
                names.push(stage);
            }
        }
        names
    }

    #[test]
    fn test_stage_order() {
        let builder = PipelineBuilder::new(PipelineOptions {
            mixer: true,
            encoding: OutputEncoding::Opus,
            ..Default::default()
        });
        let pipeline = builder.build(AudioFormat::Aac(lyre_common::AacContainer::Adts)).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec!["decode", "volume", "mixer", "filters", "opus"]
        );
        assert!(pipeline.mixer().is_some());
        assert!(pipeline.encodes_opus());
    }

    #[test]
    fn test_teardown_is_reverse_order_and_once() {
        let builder = PipelineBuilder::new(PipelineOptions {
            mixer: true,
            ..Default::default()
        });
        let mut pipeline = builder.build(AudioFormat::Flv).unwrap();
        let mut rx = pipeline.take_events().unwrap();
        assert!(pipeline.take_events().is_none());

        pipeline.destroy();
        pipeline.destroy();
        assert!(pipeline.is_destroyed());
        assert!(pipeline.stage_names().is_empty());
        assert!(pipeline.push_input(&[0u8; 4]).is_err());
        drop(pipeline);

        assert_eq!(
            destroyed_stages(&mut rx),
            vec!["filters", "mixer", "volume", "decode"]
        );
    }

    #[test]
    fn test_drop_tears_down() {
        let mut pipeline = PipelineBuilder::default()
            .build(AudioFormat::Aac(lyre_common::AacContainer::MpegTs))
            .unwrap();
        let mut rx = pipeline.take_events().unwrap();
        drop(pipeline);
        assert_eq!(destroyed_stages(&mut rx), vec!["filters", "volume", "decode"]);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = StreamingConfig::default();
        config.resampler_quality = "best".to_string();
        config.mixer_enabled = false;
        let options = PipelineOptions::from_config(&config).unwrap();
        assert_eq!(options.decode.quality, ResamplerQuality::Best);
        assert!(!options.mixer);

        config.resampler_quality = "cubic".to_string();
        assert!(PipelineOptions::from_config(&config).is_err());
    }
}
