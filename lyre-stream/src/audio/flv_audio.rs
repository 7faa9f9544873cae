//! FLV audio tag payload decoding
//!
//! The first byte of every audio tag describes the payload:
//! `format:4 | rate:2 | size:1 | type:1`. AAC tags add a packet-type byte
//! (0 = AudioSpecificConfig, 1 = raw frame). Linear PCM is converted
//! directly; MP3 frames go through the shared codec registry.

use crate::audio::aac::AacFrameDecoder;
use crate::audio::decoder::PacketDecoder;
use crate::audio::types::PcmBlock;
use crate::demux::adts::AudioSpecificConfig;
use crate::error::{Error, Result};
use symphonia::core::codecs::CODEC_TYPE_MP3;
use tracing::{debug, warn};

pub const SOUND_FORMAT_PCM_PLATFORM: u8 = 0;
pub const SOUND_FORMAT_MP3: u8 = 2;
pub const SOUND_FORMAT_PCM_LE: u8 = 3;
pub const SOUND_FORMAT_AAC: u8 = 10;

const AAC_SEQUENCE_HEADER: u8 = 0;
const AAC_RAW: u8 = 1;

const FLV_RATES: [u32; 4] = [5512, 11025, 22050, 44100];

/// Parsed audio tag flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvAudioHeader {
    pub format: u8,
    pub sample_rate: u32,
    pub sixteen_bit: bool,
    pub stereo: bool,
}

impl FlvAudioHeader {
    pub fn parse(byte: u8) -> Self {
        Self {
            format: byte >> 4,
            sample_rate: FLV_RATES[((byte >> 2) & 0x03) as usize],
            sixteen_bit: byte & 0x02 != 0,
            stereo: byte & 0x01 != 0,
        }
    }
}

pub struct FlvAudioDecoder {
    aac: AacFrameDecoder,
    mp3: Option<PacketDecoder>,
    unsupported_logged: bool,
}

impl FlvAudioDecoder {
    pub fn new() -> Self {
        Self {
            aac: AacFrameDecoder::new(),
            mp3: None,
            unsupported_logged: false,
        }
    }

    /// Decode one audio tag payload
    ///
    /// # Returns
    /// `None` for tags that carry configuration only
    pub fn decode(&mut self, tag: &[u8]) -> Result<Option<PcmBlock>> {
        let Some((&flags, body)) = tag.split_first() else {
            return Ok(None);
        };
        let header = FlvAudioHeader::parse(flags);

        match header.format {
            SOUND_FORMAT_AAC => {
                let Some((&packet_type, payload)) = body.split_first() else {
                    return Err(Error::CorruptFrame("AAC tag without packet type".to_string()));
                };
                match packet_type {
                    AAC_SEQUENCE_HEADER => {
                        let config = AudioSpecificConfig::parse(payload)?;
                        self.aac.configure(config)?;
                        Ok(None)
                    }
                    AAC_RAW => self.aac.decode_raw(payload).map(Some),
                    other => {
                        debug!("Ignoring AAC packet type {}", other);
                        Ok(None)
                    }
                }
            }
            SOUND_FORMAT_PCM_PLATFORM | SOUND_FORMAT_PCM_LE => Ok(Some(decode_linear_pcm(&header, body))),
            SOUND_FORMAT_MP3 => {
                if self.mp3.is_none() {
                    self.mp3 = Some(PacketDecoder::new(CODEC_TYPE_MP3, header.sample_rate, None)?);
                }
                match self.mp3.as_mut() {
                    Some(mp3) => mp3.decode(body).map(Some),
                    None => Ok(None),
                }
            }
            other => {
                if !self.unsupported_logged {
                    warn!("FLV sound format {} is not supported, skipping its tags", other);
                    self.unsupported_logged = true;
                }
                Err(Error::CorruptFrame(format!("unsupported FLV sound format {}", other)))
            }
        }
    }
}

impl Default for FlvAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// 8-bit unsigned or 16-bit little-endian PCM, mono or stereo
fn decode_linear_pcm(header: &FlvAudioHeader, body: &[u8]) -> PcmBlock {
    let mono: Vec<f32> = if header.sixteen_bit {
        body.chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect()
    } else {
        body.iter().map(|&b| (b as i32 - 128) as f32 / 128.0).collect()
    };

    let samples = if header.stereo {
        let mut s = mono;
        s.truncate(s.len() / 2 * 2);
        s
    } else {
        mono.iter().flat_map(|&s| [s, s]).collect()
    };
    PcmBlock::new(samples, header.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_byte() {
        let h = FlvAudioHeader::parse(0xAF);
        assert_eq!(h.format, SOUND_FORMAT_AAC);
        assert_eq!(h.sample_rate, 44100);
        assert!(h.sixteen_bit);
        assert!(h.stereo);

        let h = FlvAudioHeader::parse(0x30 | 0x04);
        assert_eq!(h.format, SOUND_FORMAT_PCM_LE);
        assert_eq!(h.sample_rate, 11025);
        assert!(!h.sixteen_bit);
        assert!(!h.stereo);
    }

    #[test]
    fn test_pcm16_stereo_tag() {
        let mut tag = vec![0x3F];
        for s in [1000i16, -1000, 16384, -16384] {
            tag.extend_from_slice(&s.to_le_bytes());
        }
        let mut decoder = FlvAudioDecoder::new();
        let block = decoder.decode(&tag).unwrap().unwrap();
        assert_eq!(block.sample_rate, 44100);
        assert_eq!(block.frames(), 2);
        assert!((block.samples[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pcm8_mono_duplicates() {
        let mut decoder = FlvAudioDecoder::new();
        let block = decoder.decode(&[0x08, 128, 255, 0]).unwrap().unwrap();
        assert_eq!(block.sample_rate, 22050);
        assert_eq!(block.samples.len(), 6);
        assert_eq!(block.samples[0], 0.0);
        assert_eq!(block.samples[4], block.samples[5]);
        assert_eq!(block.samples[4], -1.0);
    }

    #[test]
    fn test_aac_sequence_header_configures() {
        let mut decoder = FlvAudioDecoder::new();
        assert!(decoder.decode(&[0xAF, 0x00, 0x12, 0x10]).unwrap().is_none());
        assert_eq!(decoder.aac.config().map(|c| c.sample_rate()), Some(44100));
    }

    #[test]
    fn test_unsupported_format_is_corrupt_frame() {
        let mut decoder = FlvAudioDecoder::new();
        let err = decoder.decode(&[0xB2, 1, 2, 3]).unwrap_err();
        assert!(err.is_recoverable());
    }
}
