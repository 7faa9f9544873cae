//! WebM (EBML) demuxer for Opus audio
//!
//! Walks the element tree incrementally. Containers are descended into by
//! consuming only their header; leaves the demuxer cares about are buffered
//! whole; everything else is skipped by declared length, and a skip that runs
//! past the current chunk carries over to the next ones.

use super::Demuxer;
use crate::error::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, info, warn};

const ID_EBML: u32 = 0x1A45_DFA3;
const ID_SEGMENT: u32 = 0x1853_8067;
const ID_CLUSTER: u32 = 0x1F43_B675;
const ID_TRACKS: u32 = 0x1654_AE6B;
const ID_TRACK_ENTRY: u32 = 0xAE;
const ID_BLOCK_GROUP: u32 = 0xA0;
const ID_TRACK_NUMBER: u32 = 0xD7;
const ID_TRACK_TYPE: u32 = 0x83;
const ID_CODEC_PRIVATE: u32 = 0x63A2;
const ID_SIMPLE_BLOCK: u32 = 0xA3;
const ID_BLOCK: u32 = 0xA1;

/// Largest leaf element the demuxer will buffer
pub const MAX_ELEMENT_SIZE: u64 = 32 * 1024 * 1024;

const TRACK_TYPE_AUDIO: u64 = 2;
const OPUS_HEAD: &[u8] = b"OpusHead";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Container,
    Leaf,
    Unknown,
}

fn element_kind(id: u32) -> ElementKind {
    match id {
        ID_EBML | ID_SEGMENT | ID_CLUSTER | ID_TRACKS | ID_TRACK_ENTRY | ID_BLOCK_GROUP => {
            ElementKind::Container
        }
        ID_TRACK_NUMBER | ID_TRACK_TYPE | ID_CODEC_PRIVATE | ID_SIMPLE_BLOCK | ID_BLOCK => {
            ElementKind::Leaf
        }
        _ => ElementKind::Unknown,
    }
}

/// Fields of the Opus identification header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusHead {
    pub channels: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
}

impl OpusHead {
    fn parse(data: &[u8]) -> Option<OpusHead> {
        if data.len() < 19 || !data.starts_with(OPUS_HEAD) {
            return None;
        }
        Some(OpusHead {
            channels: data[9],
            pre_skip: u16::from_le_bytes([data[10], data[11]]),
            input_sample_rate: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
        })
    }
}

#[derive(Debug, Default)]
struct PendingTrack {
    number: Option<u64>,
    track_type: Option<u64>,
    opus_head: Option<OpusHead>,
    /// Absolute end offset when the entry size is known
    end: Option<u64>,
}

/// Variable-length integer as read from the stream
enum Vint {
    NeedMore,
    Value { value: u64, len: usize, all_ones: bool },
}

/// Read an EBML vint; with `keep_marker` the length marker bit stays (element IDs)
fn read_vint(data: &[u8], keep_marker: bool, max_len: usize) -> Result<Vint> {
    let first = match data.first() {
        Some(&b) => b,
        None => return Ok(Vint::NeedMore),
    };
    if first == 0 {
        return Err(Error::malformed("webm", "invalid vint (zero lead byte)"));
    }
    let len = first.leading_zeros() as usize + 1;
    if len > max_len {
        return Err(Error::malformed("webm", format!("vint of {} bytes", len)));
    }
    if data.len() < len {
        return Ok(Vint::NeedMore);
    }

    let marker_mask = if len == 8 { 0 } else { 0xFFu8 >> len };
    let mut value = if keep_marker { first as u64 } else { (first & marker_mask) as u64 };
    let mut all_ones = (first & marker_mask) == marker_mask;
    for &b in &data[1..len] {
        value = (value << 8) | b as u64;
        all_ones &= b == 0xFF;
    }
    Ok(Vint::Value { value, len, all_ones })
}

/// Streaming WebM parser forwarding the Opus track's packets
pub struct WebmOpusDemuxer {
    buf: BytesMut,
    /// Absolute stream offset of `buf[0]`
    offset: u64,
    /// Bytes still to discard from upcoming input
    skip_remaining: u64,
    header_seen: bool,
    pending_track: Option<PendingTrack>,
    opus_track: Option<u64>,
    opus_head: Option<OpusHead>,
    packets: u64,
}

impl WebmOpusDemuxer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            offset: 0,
            skip_remaining: 0,
            header_seen: false,
            pending_track: None,
            opus_track: None,
            opus_head: None,
            packets: 0,
        }
    }

    /// Opus header of the selected track, once known
    pub fn opus_head(&self) -> Option<OpusHead> {
        self.opus_head
    }

    /// Track number being forwarded, once known
    pub fn opus_track(&self) -> Option<u64> {
        self.opus_track
    }

    fn consume(&mut self, n: usize) {
        self.buf.advance(n);
        self.offset += n as u64;
    }

    fn finalize_track(&mut self) {
        let Some(track) = self.pending_track.take() else {
            return;
        };
        if self.opus_track.is_some() {
            return;
        }
        match (track.number, track.track_type, track.opus_head) {
            (Some(number), Some(TRACK_TYPE_AUDIO), Some(head)) => {
                info!(
                    "WebM Opus track {} selected ({} channels, pre-skip {})",
                    number, head.channels, head.pre_skip
                );
                self.opus_track = Some(number);
                self.opus_head = Some(head);
            }
            (number, track_type, _) => {
                debug!("Ignoring WebM track {:?} (type {:?})", number, track_type);
            }
        }
    }

    fn handle_leaf(&mut self, id: u32, data: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        match id {
            ID_TRACK_NUMBER => {
                if let Some(t) = self.pending_track.as_mut() {
                    t.number = Some(super::be_uint(&data[..data.len().min(8)]));
                }
            }
            ID_TRACK_TYPE => {
                if let Some(t) = self.pending_track.as_mut() {
                    t.track_type = Some(super::be_uint(&data[..data.len().min(8)]));
                }
            }
            ID_CODEC_PRIVATE => {
                if let Some(t) = self.pending_track.as_mut() {
                    t.opus_head = OpusHead::parse(data);
                }
            }
            ID_SIMPLE_BLOCK | ID_BLOCK => {
                // blocks can only follow the track list
                self.finalize_track();
                if let Some(track) = self.opus_track {
                    self.forward_block(track, data, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn forward_block(&mut self, track: u64, data: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        let (number, vlen) = match read_vint(data, false, 8)? {
            Vint::Value { value, len, .. } => (value, len),
            Vint::NeedMore => return Err(Error::malformed("webm", "truncated block header")),
        };
        if number != track {
            return Ok(());
        }
        // track number, 16-bit timecode, flags
        let header_len = vlen + 3;
        if data.len() < header_len {
            return Err(Error::malformed("webm", "truncated block header"));
        }
        let flags = data[vlen + 2];
        let body = &data[header_len..];

        let lacing = (flags >> 1) & 0x03;
        if lacing == 0 {
            if !body.is_empty() {
                out.push(Bytes::copy_from_slice(body));
                self.packets += 1;
            }
            return Ok(());
        }

        for frame in split_laced(lacing, body)? {
            out.push(Bytes::copy_from_slice(frame));
            self.packets += 1;
        }
        Ok(())
    }
}

impl Default for WebmOpusDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a laced block body into frames
///
/// `lacing`: 1 = Xiph, 2 = fixed-size, 3 = EBML
fn split_laced(lacing: u8, body: &[u8]) -> Result<Vec<&[u8]>> {
    let bad = || Error::malformed("webm", "invalid block lacing");
    let count = *body.first().ok_or_else(bad)? as usize + 1;
    let mut pos = 1;
    let mut sizes = Vec::with_capacity(count);

    match lacing {
        1 => {
            for _ in 0..count - 1 {
                let mut size = 0usize;
                loop {
                    let b = *body.get(pos).ok_or_else(bad)?;
                    pos += 1;
                    size += b as usize;
                    if b != 0xFF {
                        break;
                    }
                }
                sizes.push(size);
            }
        }
        2 => {
            let total = body.len() - pos;
            if total % count != 0 {
                return Err(bad());
            }
            sizes.extend(std::iter::repeat(total / count).take(count - 1));
        }
        _ => {
            if count > 1 {
                let (first, len) = match read_vint(&body[pos..], false, 8)? {
                    Vint::Value { value, len, .. } => (value as i64, len),
                    Vint::NeedMore => return Err(bad()),
                };
                pos += len;
                sizes.push(usize::try_from(first).map_err(|_| bad())?);
                let mut prev = first;
                for _ in 1..count - 1 {
                    let (raw, len) = match read_vint(&body[pos..], false, 8)? {
                        Vint::Value { value, len, .. } => (value as i64, len),
                        Vint::NeedMore => return Err(bad()),
                    };
                    pos += len;
                    // signed difference: subtract half the range
                    let bias = (1i64 << (7 * len - 1)) - 1;
                    let size = prev.checked_add(raw - bias).ok_or_else(bad)?;
                    sizes.push(usize::try_from(size).map_err(|_| bad())?);
                    prev = size;
                }
            }
        }
    }

    let laced = sizes
        .iter()
        .try_fold(pos, |acc, &size| acc.checked_add(size))
        .ok_or_else(bad)?;
    let last = body.len().checked_sub(laced).ok_or_else(bad)?;
    sizes.push(last);

    let mut frames = Vec::with_capacity(count);
    for size in sizes {
        frames.push(&body[pos..pos + size]);
        pos += size;
    }
    Ok(frames)
}

impl Demuxer for WebmOpusDemuxer {
    fn name(&self) -> &'static str {
        "webm"
    }

    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        let mut chunk = chunk;

        // deferred skip from a previous chunk
        if self.skip_remaining > 0 {
            let n = (self.skip_remaining.min(chunk.len() as u64)) as usize;
            chunk = &chunk[n..];
            self.skip_remaining -= n as u64;
            self.offset += n as u64;
        }
        self.buf.extend_from_slice(chunk);

        loop {
            if self.skip_remaining > 0 {
                let n = (self.skip_remaining.min(self.buf.len() as u64)) as usize;
                self.consume(n);
                self.skip_remaining -= n as u64;
                if self.skip_remaining > 0 {
                    return Ok(());
                }
            }

            if let Some(end) = self.pending_track.as_ref().and_then(|t| t.end) {
                if self.offset >= end {
                    self.finalize_track();
                }
            }

            let (id, id_len) = match read_vint(&self.buf, true, 4)? {
                Vint::Value { value, len, .. } => (value as u32, len),
                Vint::NeedMore => return Ok(()),
            };
            let (size, size_len, unknown_size) = match read_vint(&self.buf[id_len..], false, 8)? {
                Vint::Value { value, len, all_ones } => (value, len, all_ones),
                Vint::NeedMore => return Ok(()),
            };
            let header_len = id_len + size_len;

            if !self.header_seen {
                if id != ID_EBML {
                    return Err(Error::malformed(
                        "webm",
                        format!("expected EBML header, found element 0x{:X}", id),
                    ));
                }
                self.header_seen = true;
            }

            match element_kind(id) {
                ElementKind::Container => {
                    if id == ID_TRACK_ENTRY || id == ID_CLUSTER {
                        self.finalize_track();
                    }
                    self.consume(header_len);
                    if id == ID_TRACK_ENTRY {
                        self.pending_track = Some(PendingTrack {
                            end: (!unknown_size).then_some(self.offset + size),
                            ..Default::default()
                        });
                    }
                }
                ElementKind::Leaf => {
                    if unknown_size || size > MAX_ELEMENT_SIZE {
                        return Err(Error::malformed(
                            "webm",
                            format!("element 0x{:X} has unusable size {}", id, size),
                        ));
                    }
                    let total = header_len + size as usize;
                    if self.buf.len() < total {
                        return Ok(());
                    }
                    let element = self.buf.split_to(total).freeze();
                    self.offset += total as u64;
                    self.handle_leaf(id, &element[header_len..], out)?;
                }
                ElementKind::Unknown => {
                    if unknown_size {
                        return Err(Error::malformed(
                            "webm",
                            format!("unknown element 0x{:X} with unknown size", id),
                        ));
                    }
                    self.consume(header_len);
                    self.skip_remaining = size;
                }
            }
        }
    }

    fn finish(&mut self, _out: &mut Vec<Bytes>) -> Result<()> {
        if self.opus_track.is_none() {
            warn!("WebM stream ended without an Opus track");
        }
        debug!("WebM demuxer forwarded {} Opus packets", self.packets);
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}
