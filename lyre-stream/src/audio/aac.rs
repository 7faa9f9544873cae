//! AAC frame decoding
//!
//! Every frame is decoded on its own. The decoder is configured from the
//! frame's ADTS header and rebuilt whenever profile, rate or channel layout
//! changes mid-stream.

use crate::audio::decoder::PacketDecoder;
use crate::audio::types::PcmBlock;
use crate::demux::adts::{AdtsHeader, AudioSpecificConfig};
use crate::error::{Error, Result};
use symphonia::core::codecs::CODEC_TYPE_AAC;
use tracing::{debug, info};

pub struct AacFrameDecoder {
    decoder: Option<PacketDecoder>,
    config: Option<AudioSpecificConfig>,
    frames: u64,
}

impl AacFrameDecoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            config: None,
            frames: 0,
        }
    }

    /// Decoder configured from an AudioSpecificConfig up front
    pub fn with_config(config: AudioSpecificConfig) -> Result<Self> {
        let mut decoder = Self::new();
        decoder.configure(config)?;
        Ok(decoder)
    }

    pub fn config(&self) -> Option<AudioSpecificConfig> {
        self.config
    }

    /// (Re)build the inner decoder unless `config` is already active
    pub fn configure(&mut self, config: AudioSpecificConfig) -> Result<()> {
        if self.config == Some(config) && self.decoder.is_some() {
            return Ok(());
        }
        if self.config.is_some() {
            info!(
                "AAC config changed to type {} / {} Hz / {} ch, rebuilding decoder",
                config.object_type,
                config.sample_rate(),
                config.channels
            );
        } else {
            debug!(
                "AAC config: type {} / {} Hz / {} ch",
                config.object_type,
                config.sample_rate(),
                config.channels
            );
        }
        let asc = config.to_bytes();
        self.decoder = Some(PacketDecoder::new(
            CODEC_TYPE_AAC,
            config.sample_rate(),
            Some(&asc),
        )?);
        self.config = Some(config);
        Ok(())
    }

    /// Decode one ADTS frame
    pub fn decode_adts(&mut self, frame: &[u8]) -> Result<PcmBlock> {
        let header = AdtsHeader::parse(frame)
            .ok_or_else(|| Error::CorruptFrame("missing ADTS header".to_string()))?;
        if frame.len() < header.frame_length {
            return Err(Error::CorruptFrame(format!(
                "ADTS frame truncated: {} of {} bytes",
                frame.len(),
                header.frame_length
            )));
        }
        self.configure(header.config())?;
        self.decode_raw(header.payload(frame))
    }

    /// Decode one raw access unit with the current configuration
    pub fn decode_raw(&mut self, payload: &[u8]) -> Result<PcmBlock> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::CorruptFrame("AAC frame before configuration".to_string()))?;
        self.frames += 1;
        decoder.decode(payload)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for AacFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
