//! MP4 and fragmented MP4 demuxers producing ADTS-framed AAC
//!
//! Both read the audio track's configuration from `moov` (channel count,
//! sample rate, object type from `esds`) and prefix every sample with a
//! synthesized ADTS header, so the decode stage sees one stream shape
//! whatever the container.

pub mod boxes;
pub mod fragmented;
pub mod track;

pub use fragmented::FragmentedMp4Demuxer;
pub use track::Mp4Demuxer;

use super::adts::{self, AudioSpecificConfig};
use crate::error::Result;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::warn;

/// Audio parameters needed to build ADTS headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacTrackConfig {
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub channels: u8,
}

impl AacTrackConfig {
    /// Configuration from `mp4a` fields, refined by the `esds` config when present
    pub fn new(sample_rate: u32, channels: u16, asc: Option<AudioSpecificConfig>) -> Self {
        match asc {
            Some(asc) => Self {
                object_type: asc.object_type,
                sample_rate_index: asc.sample_rate_index,
                channels: if asc.channels == 0 { channels as u8 } else { asc.channels },
            },
            None => Self {
                object_type: adts::AOT_AAC_LC,
                sample_rate_index: adts::nearest_sample_rate_index(sample_rate),
                channels: channels as u8,
            },
        }
    }

    pub fn sample_rate(&self) -> u32 {
        adts::sample_rate_for_index(self.sample_rate_index).unwrap_or(44100)
    }

    /// Wrap one raw AAC sample in ADTS
    pub fn frame(&self, sample: &[u8]) -> Result<Bytes> {
        adts::synthesize(self.object_type, self.sample_rate_index, self.channels, sample)
            .map(Bytes::from)
    }
}

/// One sample's absolute position in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLocation {
    pub offset: u64,
    pub size: u32,
}

/// Cuts samples out of contiguous body bytes as they arrive
///
/// Holds at most the bytes of the sample being assembled; bytes between
/// samples are dropped.
#[derive(Debug, Default)]
pub struct SampleCursor {
    samples: VecDeque<SampleLocation>,
    buf: BytesMut,
    /// Absolute offset of `buf[0]`, valid while `buf` is non-empty
    buf_offset: u64,
    missed: u64,
}

impl SampleCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue sample locations, in ascending offset order
    pub fn extend(&mut self, samples: impl IntoIterator<Item = SampleLocation>) {
        self.samples.extend(samples);
    }

    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop queued samples and buffered bytes
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buf.clear();
    }

    /// Offer body bytes starting at absolute `offset`; completed samples go to `out`
    pub fn push(&mut self, offset: u64, data: &[u8], out: &mut Vec<Bytes>) {
        if self.buf.is_empty() {
            self.buf_offset = offset;
        }
        self.buf.extend_from_slice(data);

        while let Some(&sample) = self.samples.front() {
            if sample.offset < self.buf_offset {
                self.samples.pop_front();
                self.missed += 1;
                if self.missed == 1 {
                    warn!("MP4 sample at offset {} lies outside received data", sample.offset);
                }
                continue;
            }

            let end = self.buf_offset + self.buf.len() as u64;
            let gap = (sample.offset - self.buf_offset).min(self.buf.len() as u64) as usize;
            if gap > 0 {
                self.buf.advance(gap);
                self.buf_offset += gap as u64;
            }
            if sample.offset + sample.size as u64 > end {
                return;
            }

            out.push(self.buf.split_to(sample.size as usize).freeze());
            self.buf_offset += sample.size as u64;
            self.samples.pop_front();
        }

        // nothing left to wait for
        self.buf_offset += self.buf.len() as u64;
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_cuts_samples_across_pushes() {
        let mut cursor = SampleCursor::new();
        cursor.extend([
            SampleLocation { offset: 102, size: 3 },
            SampleLocation { offset: 105, size: 4 },
            SampleLocation { offset: 112, size: 2 },
        ]);

        let body: Vec<u8> = (100u8..120).collect();
        let mut out = Vec::new();
        for (i, chunk) in body.chunks(3).enumerate() {
            cursor.push(100 + (i * 3) as u64, chunk, &mut out);
        }

        assert_eq!(out.len(), 3);
        assert_eq!(&out[0][..], &[102, 103, 104]);
        assert_eq!(&out[1][..], &[105, 106, 107, 108]);
        assert_eq!(&out[2][..], &[112, 113]);
        assert_eq!(cursor.pending_samples(), 0);
        assert_eq!(cursor.buffered(), 0);
    }

    #[test]
    fn test_config_from_asc_or_fields() {
        let from_fields = AacTrackConfig::new(44100, 2, None);
        assert_eq!(from_fields.object_type, 2);
        assert_eq!(from_fields.sample_rate(), 44100);

        let asc = AudioSpecificConfig {
            object_type: 5,
            sample_rate_index: 6,
            channels: 1,
        };
        let from_asc = AacTrackConfig::new(48000, 2, Some(asc));
        assert_eq!(from_asc.object_type, 5);
        assert_eq!(from_asc.sample_rate(), 24000);
        assert_eq!(from_asc.channels, 1);
    }
}
