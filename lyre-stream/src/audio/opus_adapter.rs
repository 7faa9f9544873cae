//! Opus encode/decode adapter
//!
//! The encoder accepts PCM in any chunk size. Bytes are staged in a ring
//! buffer and pulled out in exact 20 ms frames (960 samples x 2 channels x
//! 2 bytes); a partial frame stays in the ring until the next call. Frames
//! straddling the ring's wrap point are read through its linear scratch copy.
//!
//! Decoding is one packet in, one 48 kHz stereo frame out.

use crate::audio::types::{SAMPLES_PER_20MS, TARGET_CHANNELS, TARGET_SAMPLE_RATE};
use crate::buffer::RingBuffer;
use crate::error::{Error, Result};
use bytes::Bytes;
use opus::{Application, Bitrate, Channels};
use tracing::debug;

/// Bytes in one encoder input frame
pub const OPUS_FRAME_BYTES: usize = SAMPLES_PER_20MS * TARGET_CHANNELS * 2;

/// Largest packet libopus produces
const MAX_PACKET_BYTES: usize = 4000;

/// Largest decoded frame: 120 ms at 48 kHz stereo
const MAX_DECODED_SAMPLES: usize = 5760 * TARGET_CHANNELS;

/// Silent frames sent before transmission is suppressed
const DTX_HANGOVER_FRAMES: u32 = 5;

const STAGING_FRAMES: usize = 4;

/// Encoder control knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusSettings {
    pub bitrate: i32,
    pub inband_fec: bool,
    pub packet_loss_perc: u8,
    pub dtx: bool,
}

impl Default for OpusSettings {
    fn default() -> Self {
        Self {
            bitrate: 128_000,
            inband_fec: false,
            packet_loss_perc: 0,
            dtx: false,
        }
    }
}

/// Fixed-frame Opus encoder over arbitrary PCM chunks
pub struct OpusFrameEncoder {
    encoder: opus::Encoder,
    staging: RingBuffer,
    frame: Vec<i16>,
    packet: Vec<u8>,
    settings: OpusSettings,
    silent_run: u32,
    frames_encoded: u64,
    frames_suppressed: u64,
}

impl OpusFrameEncoder {
    pub fn new(settings: OpusSettings) -> Result<Self> {
        let encoder = opus::Encoder::new(TARGET_SAMPLE_RATE, Channels::Stereo, Application::Audio)
            .map_err(|e| Error::Encode(format!("Failed to create Opus encoder: {}", e)))?;
        let mut adapter = Self {
            encoder,
            staging: RingBuffer::new(OPUS_FRAME_BYTES * STAGING_FRAMES),
            frame: vec![0; SAMPLES_PER_20MS * TARGET_CHANNELS],
            packet: vec![0; MAX_PACKET_BYTES],
            settings,
            silent_run: 0,
            frames_encoded: 0,
            frames_suppressed: 0,
        };
        adapter.apply(settings)?;
        Ok(adapter)
    }

    /// Push settings to the codec
    pub fn apply(&mut self, settings: OpusSettings) -> Result<()> {
        let map = |e: opus::Error| Error::Encode(e.to_string());
        self.encoder
            .set_bitrate(Bitrate::Bits(settings.bitrate))
            .map_err(map)?;
        self.encoder.set_inband_fec(settings.inband_fec).map_err(map)?;
        self.encoder
            .set_packet_loss_perc(settings.packet_loss_perc.min(100) as i32)
            .map_err(map)?;
        self.settings = settings;
        debug!("Opus encoder settings: {:?}", settings);
        Ok(())
    }

    pub fn settings(&self) -> OpusSettings {
        self.settings
    }

    /// Bytes waiting for a complete frame
    pub fn pending_bytes(&self) -> usize {
        self.staging.len()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn frames_suppressed(&self) -> u64 {
        self.frames_suppressed
    }

    /// Stage `pcm` and encode every complete frame into `out`
    pub fn push(&mut self, pcm: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        let mut rest = pcm;
        while !rest.is_empty() {
            let n = rest.len().min(self.staging.available());
            self.staging.write(&rest[..n]);
            rest = &rest[n..];
            self.drain_frames(out)?;
        }
        Ok(())
    }

    /// Pad the trailing partial frame with silence and encode it
    pub fn flush(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        let partial = self.staging.len() % OPUS_FRAME_BYTES;
        if partial > 0 {
            let pad = vec![0u8; OPUS_FRAME_BYTES - partial];
            self.push(&pad, out)?;
        }
        Ok(())
    }

    fn drain_frames(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        while self.staging.len() >= OPUS_FRAME_BYTES {
            let bytes = match self.staging.get_contiguous(OPUS_FRAME_BYTES) {
                Some(bytes) => bytes,
                None => break,
            };
            for (dst, src) in self.frame.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = i16::from_le_bytes([src[0], src[1]]);
            }
            self.staging.skip(OPUS_FRAME_BYTES);

            let silent = self.frame.iter().all(|&s| s == 0);
            self.silent_run = if silent { self.silent_run + 1 } else { 0 };
            if self.settings.dtx && self.silent_run > DTX_HANGOVER_FRAMES {
                self.frames_suppressed += 1;
                continue;
            }

            let len = self
                .encoder
                .encode(&self.frame, &mut self.packet)
                .map_err(|e| Error::Encode(format!("Opus encode failed: {}", e)))?;
            self.frames_encoded += 1;
            out.push(Bytes::copy_from_slice(&self.packet[..len]));
        }
        Ok(())
    }
}

/// Opus packet decoder producing 48 kHz stereo
pub struct OpusPacketDecoder {
    decoder: opus::Decoder,
    pcm: Vec<i16>,
}

impl OpusPacketDecoder {
    pub fn new() -> Result<Self> {
        let decoder = opus::Decoder::new(TARGET_SAMPLE_RATE, Channels::Stereo)
            .map_err(|e| Error::Decode(format!("Failed to create Opus decoder: {}", e)))?;
        Ok(Self {
            decoder,
            pcm: vec![0; MAX_DECODED_SAMPLES],
        })
    }

    /// Decode one packet into interleaved stereo samples
    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>> {
        let per_channel = self
            .decoder
            .decode(packet, &mut self.pcm, false)
            .map_err(|e| Error::Decode(format!("Opus decode failed: {}", e)))?;
        Ok(self.pcm[..per_channel * TARGET_CHANNELS].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frames: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(frames * 4);
        for i in 0..frames {
            let s = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            out.extend_from_slice(&s.to_le_bytes());
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_framing_across_chunk_sizes() {
        let pcm = tone(SAMPLES_PER_20MS * 5 + 100);
        for chunk in [1usize, 3, 997, OPUS_FRAME_BYTES, 20_000] {
            let mut encoder = OpusFrameEncoder::new(OpusSettings::default()).unwrap();
            let mut packets = Vec::new();
            for c in pcm.chunks(chunk) {
                encoder.push(c, &mut packets).unwrap();
            }
            assert_eq!(packets.len(), 5, "chunk {}", chunk);
            assert_eq!(encoder.pending_bytes(), 100 * 4);
        }
    }

    #[test]
    fn test_flush_pads_partial_frame() {
        let mut encoder = OpusFrameEncoder::new(OpusSettings::default()).unwrap();
        let mut packets = Vec::new();
        encoder.push(&tone(100), &mut packets).unwrap();
        assert!(packets.is_empty());
        encoder.flush(&mut packets).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(encoder.pending_bytes(), 0);
    }

    #[test]
    fn test_dtx_suppresses_long_silence() {
        let settings = OpusSettings {
            dtx: true,
            ..OpusSettings::default()
        };
        let mut encoder = OpusFrameEncoder::new(settings).unwrap();
        let mut packets = Vec::new();
        encoder
            .push(&vec![0u8; OPUS_FRAME_BYTES * 10], &mut packets)
            .unwrap();
        assert_eq!(packets.len(), DTX_HANGOVER_FRAMES as usize);
        assert_eq!(encoder.frames_suppressed(), 5);

        encoder.push(&tone(SAMPLES_PER_20MS), &mut packets).unwrap();
        assert_eq!(packets.len(), DTX_HANGOVER_FRAMES as usize + 1);
    }

    #[test]
    fn test_decode_round_trip_frame_size() {
        let mut encoder = OpusFrameEncoder::new(OpusSettings {
            inband_fec: true,
            packet_loss_perc: 10,
            ..OpusSettings::default()
        })
        .unwrap();
        let mut packets = Vec::new();
        encoder.push(&tone(SAMPLES_PER_20MS * 2), &mut packets).unwrap();

        let mut decoder = OpusPacketDecoder::new().unwrap();
        for packet in &packets {
            let pcm = decoder.decode(packet).unwrap();
            assert_eq!(pcm.len(), SAMPLES_PER_20MS * 2);
        }
    }

    #[test]
    fn test_decode_failure_is_an_error() {
        let mut decoder = OpusPacketDecoder::new().unwrap();
        assert!(decoder.decode(&[0xFF, 0xFF, 0xFF]).is_err());
    }
}
