//! ADTS framing for AAC
//!
//! Provides the 13-entry sampling-frequency table, AudioSpecificConfig parsing,
//! ADTS header parse/synthesis, and a streaming framer that cuts a raw ADTS
//! byte stream into whole frames.

use super::Demuxer;
use crate::error::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

/// MPEG-4 sampling frequency table, indexed by `sampling_frequency_index`
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC audio object type
pub const AOT_AAC_LC: u8 = 2;

/// Size of an ADTS header without CRC
pub const ADTS_HEADER_LEN: usize = 7;

/// Largest value of the 13-bit frame length field
const MAX_FRAME_LEN: usize = 0x1FFF;

/// Table index for an exact sample rate
pub fn sample_rate_index(rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|&r| r == rate).map(|i| i as u8)
}

/// Sample rate for a table index
pub fn sample_rate_for_index(index: u8) -> Option<u32> {
    SAMPLE_RATES.get(index as usize).copied()
}

/// Table index for the closest listed rate (for non-standard rates)
pub fn nearest_sample_rate_index(rate: u32) -> u8 {
    SAMPLE_RATES
        .iter()
        .enumerate()
        .min_by_key(|(_, &r)| r.abs_diff(rate))
        .map(|(i, _)| i as u8)
        .unwrap_or(4)
}

/// Decoded MPEG-4 AudioSpecificConfig (the fields ADTS can carry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub channels: u8,
}

impl AudioSpecificConfig {
    /// Parse the leading fields of an AudioSpecificConfig
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::malformed("aac", "AudioSpecificConfig shorter than 2 bytes"));
        }
        let mut bits = BitReader::new(data);
        let mut object_type = bits.read(5)? as u8;
        if object_type == 31 {
            object_type = 32 + bits.read(6)? as u8;
        }
        let mut sample_rate_index = bits.read(4)? as u8;
        if sample_rate_index == 15 {
            let rate = bits.read(24)?;
            sample_rate_index = nearest_sample_rate_index(rate);
        }
        if sample_rate_for_index(sample_rate_index).is_none() {
            return Err(Error::malformed(
                "aac",
                format!("reserved sampling frequency index {}", sample_rate_index),
            ));
        }
        let channels = bits.read(4)? as u8;
        Ok(Self {
            object_type,
            sample_rate_index,
            channels,
        })
    }

    /// Two-byte encoding, as used for decoder extra data
    pub fn to_bytes(&self) -> [u8; 2] {
        let v: u16 = ((self.object_type as u16 & 0x1F) << 11)
            | ((self.sample_rate_index as u16 & 0x0F) << 7)
            | ((self.channels as u16 & 0x0F) << 3);
        v.to_be_bytes()
    }

    pub fn sample_rate(&self) -> u32 {
        sample_rate_for_index(self.sample_rate_index).unwrap_or(44100)
    }
}

/// Parsed fixed + variable ADTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// Audio object type (profile + 1)
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub channel_config: u8,
    /// Whole frame length including header
    pub frame_length: usize,
    /// 7, or 9 with CRC
    pub header_length: usize,
}

impl AdtsHeader {
    /// Parse a header at the start of `data`; `None` if there is no valid header
    pub fn parse(data: &[u8]) -> Option<AdtsHeader> {
        if data.len() < ADTS_HEADER_LEN {
            return None;
        }
        if data[0] != 0xFF || (data[1] & 0xF6) != 0xF0 {
            return None;
        }
        let protection_absent = data[1] & 0x01 == 1;
        let profile = (data[2] >> 6) & 0x03;
        let sample_rate_index = (data[2] >> 2) & 0x0F;
        let channel_config = ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03);
        let frame_length = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] as usize) >> 5);
        let header_length = if protection_absent { 7 } else { 9 };

        if sample_rate_for_index(sample_rate_index).is_none() || frame_length < header_length {
            return None;
        }

        Some(AdtsHeader {
            object_type: profile + 1,
            sample_rate_index,
            channel_config,
            frame_length,
            header_length,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        sample_rate_for_index(self.sample_rate_index).unwrap_or(44100)
    }

    pub fn config(&self) -> AudioSpecificConfig {
        AudioSpecificConfig {
            object_type: self.object_type,
            sample_rate_index: self.sample_rate_index,
            channels: self.channel_config,
        }
    }

    /// Raw AAC payload of a whole frame
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let end = self.frame_length.min(frame.len());
        &frame[self.header_length.min(end)..end]
    }
}

/// Prefix a raw AAC payload with a 7-byte ADTS header
///
/// # Arguments
/// * `object_type` - Audio object type (2 = AAC-LC); ADTS stores it as profile = type - 1
/// * `sample_rate_index` - Index into [`SAMPLE_RATES`]
/// * `channels` - Channel configuration (1..=7)
/// * `payload` - Raw AAC access unit
pub fn synthesize(object_type: u8, sample_rate_index: u8, channels: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let frame_length = payload.len() + ADTS_HEADER_LEN;
    if frame_length > MAX_FRAME_LEN {
        return Err(Error::CorruptFrame(format!(
            "AAC sample of {} bytes does not fit an ADTS frame",
            payload.len()
        )));
    }
    let profile = object_type.saturating_sub(1).min(3);

    let mut frame = Vec::with_capacity(frame_length);
    frame.push(0xFF);
    frame.push(0xF1);
    frame.push((profile << 6) | ((sample_rate_index & 0x0F) << 2) | ((channels >> 2) & 0x01));
    frame.push(((channels & 0x03) << 6) | ((frame_length >> 11) & 0x03) as u8);
    frame.push(((frame_length >> 3) & 0xFF) as u8);
    frame.push((((frame_length & 0x07) << 5) as u8) | 0x1F);
    frame.push(0xFC);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Cuts a raw ADTS stream into whole frames, resyncing past garbage
pub struct AdtsFramer {
    buf: BytesMut,
    frames: u64,
    discarded: u64,
}

impl AdtsFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            frames: 0,
            discarded: 0,
        }
    }

    /// Frames emitted so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes dropped while searching for sync
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn discard(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if self.discarded == 0 {
            warn!("ADTS stream out of sync, discarding {} bytes", n);
        }
        self.discarded += n as u64;
        self.buf.advance(n);
    }
}

impl Default for AdtsFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for AdtsFramer {
    fn name(&self) -> &'static str {
        "adts"
    }

    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.buf.extend_from_slice(chunk);

        loop {
            // find a sync word
            let sync = self
                .buf
                .windows(2)
                .position(|w| w[0] == 0xFF && (w[1] & 0xF6) == 0xF0);
            match sync {
                Some(pos) => self.discard(pos),
                None => {
                    // keep a trailing 0xFF, it may start the next sync word
                    let keep = usize::from(self.buf.last() == Some(&0xFF));
                    let drop = self.buf.len() - keep;
                    self.discard(drop);
                    return Ok(());
                }
            }

            if self.buf.len() < ADTS_HEADER_LEN {
                return Ok(());
            }

            let header = match AdtsHeader::parse(&self.buf) {
                Some(h) => h,
                None => {
                    // false sync
                    self.discard(1);
                    continue;
                }
            };

            if self.buf.len() < header.frame_length {
                return Ok(());
            }

            out.push(self.buf.split_to(header.frame_length).freeze());
            self.frames += 1;
        }
    }

    fn finish(&mut self, _out: &mut Vec<Bytes>) -> Result<()> {
        if !self.buf.is_empty() {
            debug!("ADTS stream ended with {} bytes of partial frame", self.buf.len());
            self.buf.clear();
        }
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

/// MSB-first bit reader over a byte slice
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    pub(crate) fn read(&mut self, count: u32) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self
                .data
                .get(self.bit / 8)
                .ok_or_else(|| Error::malformed("aac", "bitstream ended early"))?;
            let bit = (byte >> (7 - (self.bit % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.bit += 1;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_rates_survive_synthesis() {
        for (index, &rate) in SAMPLE_RATES.iter().enumerate() {
            let payload = vec![0xAB; 100 + index];
            let frame = synthesize(AOT_AAC_LC, index as u8, 2, &payload).unwrap();
            let header = AdtsHeader::parse(&frame).unwrap();
            assert_eq!(header.sample_rate(), rate);
            assert_eq!(header.channel_config, 2);
            assert_eq!(header.object_type, AOT_AAC_LC);
            assert_eq!(header.frame_length, payload.len() + 7);
            assert_eq!(header.payload(&frame), &payload[..]);
        }
    }

    #[test]
    fn test_rate_index_lookup() {
        assert_eq!(sample_rate_index(44100), Some(4));
        assert_eq!(sample_rate_index(48000), Some(3));
        assert_eq!(sample_rate_index(12345), None);
        assert_eq!(nearest_sample_rate_index(47000), 3);
    }

    #[test]
    fn test_audio_specific_config_round_trip() {
        let asc = AudioSpecificConfig {
            object_type: 2,
            sample_rate_index: 4,
            channels: 2,
        };
        assert_eq!(asc.to_bytes(), [0x12, 0x10]);
        assert_eq!(AudioSpecificConfig::parse(&asc.to_bytes()).unwrap(), asc);
    }

    #[test]
    fn test_framer_across_arbitrary_chunks() {
        let mut stream = Vec::new();
        for i in 0..5u8 {
            stream.extend(synthesize(AOT_AAC_LC, 4, 2, &vec![i; 50 + i as usize]).unwrap());
        }

        let mut framer = AdtsFramer::new();
        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            framer.feed(chunk, &mut frames).unwrap();
        }
        framer.finish(&mut frames).unwrap();

        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            let header = AdtsHeader::parse(frame).unwrap();
            assert_eq!(header.payload(frame), &vec![i as u8; 50 + i][..]);
        }
        assert_eq!(framer.pending_bytes(), 0);
    }

    #[test]
    fn test_framer_resyncs_past_garbage() {
        let mut stream = vec![0x00, 0x12, 0xFF, 0x00, 0x34];
        stream.extend(synthesize(AOT_AAC_LC, 3, 1, &[1, 2, 3]).unwrap());

        let mut framer = AdtsFramer::new();
        let mut frames = Vec::new();
        framer.feed(&stream, &mut frames).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(framer.discarded(), 5);
    }

    #[test]
    fn test_partial_frame_is_not_emitted() {
        let frame = synthesize(AOT_AAC_LC, 4, 2, &[9; 40]).unwrap();
        let mut framer = AdtsFramer::new();
        let mut frames = Vec::new();
        framer.feed(&frame[..30], &mut frames).unwrap();
        assert!(frames.is_empty());
        assert_eq!(framer.pending_bytes(), 30);
    }
}
