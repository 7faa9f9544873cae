//! Pipeline assembly and teardown
//!
//! A pipeline owns one [`DecodeStage`], an ordered list of [`PcmStage`]s and
//! an optional Opus encoder:
//!
//! ```text
//! bytes -> decode/resample -> volume -> mixer -> filters -> [opus] -> output
//! ```
//!
//! Teardown runs exactly once, in reverse construction order, either through
//! [`Pipeline::destroy`] or on drop.

pub mod builder;
pub mod runner;
pub mod stages;

pub use builder::{PipelineBuilder, PipelineOptions};
pub use runner::{pcm_byte_stream, run_pipeline, PipelineOutcome, PipelineStats};
pub use stages::{FilterControl, FilterStage, MixerStage, PcmStage, VolumeStage};

use crate::audio::types::i16_to_le_bytes;
use crate::audio::{DecodeStage, OpusFrameEncoder};
use crate::error::{Error, Result};
use crate::mixer::AudioMixer;
use bytes::{BufMut, Bytes, BytesMut};
use lyre_common::PipelineEvent;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// An assembled, runnable pipeline
pub struct Pipeline {
    id: Uuid,
    decode: Option<DecodeStage>,
    stages: Vec<Box<dyn PcmStage>>,
    encoder: Option<OpusFrameEncoder>,
    mixer: Option<AudioMixer>,
    filters: FilterControl,
    events: mpsc::Sender<PipelineEvent>,
    event_rx: Option<mpsc::Receiver<PipelineEvent>>,
    /// Decoded samples still to drop for the start position
    skip_samples: u64,
    destroyed: bool,
}

impl Pipeline {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Mixer handle, when the pipeline was built with one
    pub fn mixer(&self) -> Option<&AudioMixer> {
        self.mixer.as_ref()
    }

    /// Handle for replacing the filter settings while running
    pub fn filter_control(&self) -> FilterControl {
        self.filters.clone()
    }

    /// Take the lifecycle event receiver; later calls return `None`
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<PipelineEvent>> {
        self.event_rx.take()
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Pipeline {} event dropped: {}", self.id, e);
        }
    }

    /// Whether the output is Opus packets
    pub fn encodes_opus(&self) -> bool {
        self.encoder.is_some()
    }

    /// Stage names in construction order
    pub fn stage_names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(self.stages.len() + 2);
        if self.decode.is_some() {
            names.push("decode");
        }
        names.extend(self.stages.iter().map(|s| s.name()));
        if self.encoder.is_some() {
            names.push("opus");
        }
        names
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn decode_stage(&mut self) -> Result<&mut DecodeStage> {
        self.decode
            .as_mut()
            .ok_or_else(|| Error::Internal(format!("pipeline {} already destroyed", self.id)))
    }

    /// Whether upstream may deliver another chunk
    pub fn wants_input(&mut self) -> bool {
        self.decode.as_mut().is_some_and(|d| d.wants_input())
    }

    /// Compressed bytes waiting in the decode stage
    pub fn buffered_bytes(&self) -> usize {
        self.decode.as_ref().map_or(0, |d| d.buffered_bytes())
    }

    pub fn push_input(&mut self, chunk: &[u8]) -> Result<()> {
        self.decode_stage()?.push(chunk)
    }

    pub fn end_of_input(&mut self) -> Result<()> {
        self.decode_stage()?.end_of_input()
    }

    /// The decode stage has emitted its last samples
    pub fn is_finished(&self) -> bool {
        self.decode.as_ref().map_or(true, |d| d.is_finished())
    }

    /// Run one decode burst through every stage
    ///
    /// # Returns
    /// Wire bytes (PCM or length-prefixed Opus packets), or `None` when the
    /// burst produced nothing to send
    pub fn process_burst(&mut self) -> Result<Option<Bytes>> {
        let mut pcm = self.decode_stage()?.decode_burst()?;

        if self.skip_samples > 0 && !pcm.is_empty() {
            let drop = (self.skip_samples as usize).min(pcm.len());
            pcm.drain(..drop);
            self.skip_samples -= drop as u64;
            if self.skip_samples == 0 {
                debug!("Pipeline {} reached start position", self.id);
            }
        }
        if pcm.is_empty() {
            return Ok(None);
        }

        for stage in &mut self.stages {
            pcm = stage.process(pcm)?;
        }
        self.encode(&pcm, false)
    }

    /// Encode the trailing partial Opus frame, if any
    pub fn finish_output(&mut self) -> Result<Option<Bytes>> {
        self.encode(&[], true)
    }

    fn encode(&mut self, pcm: &[i16], flush: bool) -> Result<Option<Bytes>> {
        let bytes = i16_to_le_bytes(pcm);
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(if bytes.is_empty() {
                None
            } else {
                Some(Bytes::from(bytes))
            });
        };

        let mut packets = Vec::new();
        encoder.push(&bytes, &mut packets)?;
        if flush {
            encoder.flush(&mut packets)?;
        }
        if packets.is_empty() {
            return Ok(None);
        }
        Ok(Some(frame_packets(&packets)))
    }

    /// Tear every stage down in reverse construction order
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if self.encoder.take().is_some() {
            self.emit(PipelineEvent::StageDestroyed {
                stage: "opus".to_string(),
            });
        }
        while let Some(mut stage) = self.stages.pop() {
            stage.destroy();
            self.emit(PipelineEvent::StageDestroyed {
                stage: stage.name().to_string(),
            });
        }
        if self.decode.take().is_some() {
            self.emit(PipelineEvent::StageDestroyed {
                stage: "decode".to_string(),
            });
        }
        self.mixer = None;
        debug!("Pipeline {} destroyed", self.id);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Prefix each packet with its big-endian u16 length
pub fn frame_packets(packets: &[Bytes]) -> Bytes {
    let total: usize = packets.iter().map(|p| p.len() + 2).sum();
    let mut out = BytesMut::with_capacity(total);
    for packet in packets {
        out.put_u16(packet.len() as u16);
        out.put_slice(packet);
    }
    out.freeze()
}

/// Split a length-prefixed packet stream back into packets
///
/// A trailing incomplete packet is left out.
pub fn split_packets(mut data: &[u8]) -> Vec<&[u8]> {
    let mut packets = Vec::new();
    while data.len() >= 2 {
        let len = u16::from_be_bytes([data[0], data[1]]) as usize;
        if data.len() < 2 + len {
            break;
        }
        packets.push(&data[2..2 + len]);
        data = &data[2 + len..];
    }
    packets
}
