//! FLV tag extractor
//!
//! State machine: file header, then alternating tag header / tag body. Audio
//! tag payloads are forwarded untouched (their first byte still carries the
//! sound format); every other tag type is skipped without buffering.

use super::Demuxer;
use crate::error::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

const FLV_HEADER_LEN: usize = 9;
const TAG_HEADER_LEN: usize = 11;
const PREVIOUS_TAG_SIZE_LEN: usize = 4;

/// FLV tag type for audio
pub const TAG_AUDIO: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    /// Discard bytes up to the first tag header
    SkipToFirstTag(usize),
    TagHeader,
    AudioBody(usize),
    SkipBody(usize),
}

pub struct FlvDemuxer {
    buf: BytesMut,
    state: State,
    audio_tags: u64,
    other_tags: u64,
}

impl FlvDemuxer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            state: State::Header,
            audio_tags: 0,
            other_tags: 0,
        }
    }

    /// Audio tags forwarded so far
    pub fn audio_tags(&self) -> u64 {
        self.audio_tags
    }
}

impl Default for FlvDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for FlvDemuxer {
    fn name(&self) -> &'static str {
        "flv"
    }

    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.buf.extend_from_slice(chunk);

        loop {
            match self.state {
                State::Header => {
                    if self.buf.len() < FLV_HEADER_LEN {
                        return Ok(());
                    }
                    if &self.buf[..3] != b"FLV" {
                        return Err(Error::malformed("flv", "bad signature"));
                    }
                    let data_offset = super::be_uint(&self.buf[5..9]) as usize;
                    if data_offset < FLV_HEADER_LEN {
                        return Err(Error::malformed(
                            "flv",
                            format!("header data offset {} too small", data_offset),
                        ));
                    }
                    debug!(
                        "FLV header: version {}, flags 0x{:02X}",
                        self.buf[3], self.buf[4]
                    );
                    self.buf.advance(FLV_HEADER_LEN);
                    self.state =
                        State::SkipToFirstTag(data_offset - FLV_HEADER_LEN + PREVIOUS_TAG_SIZE_LEN);
                }
                State::SkipToFirstTag(remaining) | State::SkipBody(remaining) => {
                    let n = remaining.min(self.buf.len());
                    self.buf.advance(n);
                    if n < remaining {
                        self.state = match self.state {
                            State::SkipBody(_) => State::SkipBody(remaining - n),
                            _ => State::SkipToFirstTag(remaining - n),
                        };
                        return Ok(());
                    }
                    self.state = State::TagHeader;
                }
                State::TagHeader => {
                    if self.buf.len() < TAG_HEADER_LEN {
                        return Ok(());
                    }
                    let tag_type = self.buf[0] & 0x1F;
                    let size = super::be_uint(&self.buf[1..4]) as usize;
                    self.buf.advance(TAG_HEADER_LEN);
                    if tag_type == TAG_AUDIO {
                        self.state = State::AudioBody(size);
                    } else {
                        self.other_tags += 1;
                        self.state = State::SkipBody(size + PREVIOUS_TAG_SIZE_LEN);
                    }
                }
                State::AudioBody(size) => {
                    if self.buf.len() < size + PREVIOUS_TAG_SIZE_LEN {
                        return Ok(());
                    }
                    let payload = self.buf.split_to(size).freeze();
                    self.buf.advance(PREVIOUS_TAG_SIZE_LEN);
                    if !payload.is_empty() {
                        out.push(payload);
                        self.audio_tags += 1;
                    }
                    self.state = State::TagHeader;
                }
            }
        }
    }

    fn finish(&mut self, _out: &mut Vec<Bytes>) -> Result<()> {
        debug!(
            "FLV demuxer done: {} audio tags, {} other tags",
            self.audio_tags, self.other_tags
        );
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}
