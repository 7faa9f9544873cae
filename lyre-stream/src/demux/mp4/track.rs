//! Whole-file MP4 / M4A demuxer
//!
//! Builds a sample table for the first AAC sound track from `moov` and cuts
//! samples out of `mdat` one at a time. When `mdat` arrives before `moov` the
//! body is held until the table is known.

use super::boxes::{find_box, find_path, iter_boxes, BoxEvent, BoxPolicy, BoxStream, FourCc, Reader};
use super::{AacTrackConfig, SampleCursor, SampleLocation};
use crate::demux::adts::AudioSpecificConfig;
use crate::demux::Demuxer;
use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

/// Most `mdat` bytes held while waiting for a trailing `moov`
pub const MAX_HELD_MDAT_BYTES: usize = 256 * 1024 * 1024;

/// Most samples accepted in one track's sample table
pub const MAX_TABLE_SAMPLES: usize = 1 << 22;

/// Audio track identity and configuration from `moov`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTrackInfo {
    pub track_id: u32,
    pub timescale: u32,
    pub config: AacTrackConfig,
}

/// Find the first sound track carrying `mp4a`
///
/// # Returns
/// Track info plus the body of its `stbl` box
pub fn find_audio_track(moov: &[u8]) -> Result<Option<(AudioTrackInfo, &[u8])>> {
    for item in iter_boxes(moov) {
        let (kind, trak) = item?;
        if &kind != b"trak" {
            continue;
        }

        let handler = match find_path(trak, &[b"mdia", b"hdlr"])? {
            Some(hdlr) => {
                let mut r = Reader::new(hdlr);
                r.full_box()?;
                r.skip(4)?;
                r.u32()?.to_be_bytes()
            }
            None => continue,
        };
        if &handler != b"soun" {
            continue;
        }

        let stbl = match find_path(trak, &[b"mdia", b"minf", b"stbl"])? {
            Some(stbl) => stbl,
            None => continue,
        };
        let config = match parse_stsd(stbl)? {
            Some(config) => config,
            None => {
                debug!("Sound track without mp4a entry, skipping");
                continue;
            }
        };

        let track_id = match find_box(trak, b"tkhd")? {
            Some(tkhd) => {
                let mut r = Reader::new(tkhd);
                let (version, _) = r.full_box()?;
                r.skip(if version == 1 { 16 } else { 8 })?;
                r.u32()?
            }
            None => 0,
        };
        let timescale = match find_path(trak, &[b"mdia", b"mdhd"])? {
            Some(mdhd) => {
                let mut r = Reader::new(mdhd);
                let (version, _) = r.full_box()?;
                r.skip(if version == 1 { 16 } else { 8 })?;
                r.u32()?
            }
            None => config.sample_rate(),
        };

        return Ok(Some((
            AudioTrackInfo {
                track_id,
                timescale,
                config,
            },
            stbl,
        )));
    }
    Ok(None)
}

/// AAC configuration from the first `mp4a` sample entry
fn parse_stsd(stbl: &[u8]) -> Result<Option<AacTrackConfig>> {
    let stsd = match find_box(stbl, b"stsd")? {
        Some(stsd) => stsd,
        None => return Ok(None),
    };
    let mut r = Reader::new(stsd);
    r.full_box()?;
    r.u32()?; // entry count

    for item in iter_boxes(r.remaining()) {
        let (kind, entry) = item?;
        if &kind != b"mp4a" {
            continue;
        }
        let mut r = Reader::new(entry);
        r.skip(6)?; // reserved
        r.u16()?; // data reference index
        let version = r.u16()?;
        r.skip(6)?; // revision + vendor
        let channels = r.u16()?;
        r.u16()?; // sample size
        r.skip(4)?; // pre-defined + reserved
        let sample_rate = r.u32()? >> 16;
        match version {
            1 => r.skip(16)?,
            2 => r.skip(36)?,
            _ => {}
        }

        let asc = match find_box(r.remaining(), b"esds")? {
            Some(esds) => parse_esds(esds)?,
            None => None,
        };
        return Ok(Some(AacTrackConfig::new(sample_rate, channels, asc)));
    }
    Ok(None)
}

fn read_descriptor_header(r: &mut Reader<'_>) -> Result<(u8, usize)> {
    let tag = r.u8()?;
    let mut len = 0usize;
    for _ in 0..4 {
        let b = r.u8()?;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok((tag, len))
}

/// DecoderSpecificInfo (AudioSpecificConfig) from an `esds` body
pub fn parse_esds(esds: &[u8]) -> Result<Option<AudioSpecificConfig>> {
    let mut r = Reader::new(esds);
    r.full_box()?;

    let (tag, _) = read_descriptor_header(&mut r)?;
    if tag != 0x03 {
        return Ok(None);
    }
    r.u16()?; // ES_ID
    let flags = r.u8()?;
    if flags & 0x80 != 0 {
        r.skip(2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = r.u8()? as usize;
        r.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        r.skip(2)?;
    }

    let (tag, _) = read_descriptor_header(&mut r)?;
    if tag != 0x04 {
        return Ok(None);
    }
    r.u8()?; // object type indication
    r.skip(12)?; // stream type, buffer size, bitrates

    let (tag, len) = read_descriptor_header(&mut r)?;
    if tag != 0x05 || len < 2 {
        return Ok(None);
    }
    let asc = r.remaining();
    AudioSpecificConfig::parse(&asc[..len.min(asc.len())]).map(Some)
}

/// Absolute sample locations from `stsz`, `stsc` and `stco`/`co64`, in file order
pub fn build_sample_table(stbl: &[u8]) -> Result<Vec<SampleLocation>> {
    let missing = |name: &str| Error::malformed("mp4", format!("audio track has no {}", name));

    let stsz = find_box(stbl, b"stsz")?.ok_or_else(|| missing("stsz"))?;
    let mut r = Reader::new(stsz);
    r.full_box()?;
    let uniform = r.u32()?;
    let count = r.u32()? as usize;
    if count > MAX_TABLE_SAMPLES {
        return Err(Error::malformed(
            "mp4",
            format!("stsz declares {} samples, limit is {}", count, MAX_TABLE_SAMPLES),
        ));
    }
    let sizes: Vec<u32> = if uniform != 0 {
        vec![uniform; count]
    } else {
        check_table(count, 4, r.remaining().len())?;
        (0..count).map(|_| r.u32()).collect::<Result<_>>()?
    };

    let stsc = find_box(stbl, b"stsc")?.ok_or_else(|| missing("stsc"))?;
    let mut r = Reader::new(stsc);
    r.full_box()?;
    let entries = r.u32()? as usize;
    check_table(entries, 12, r.remaining().len())?;
    let mut runs = Vec::with_capacity(entries);
    for _ in 0..entries {
        let first_chunk = r.u32()?;
        let per_chunk = r.u32()?;
        r.u32()?; // sample description index
        runs.push((first_chunk, per_chunk));
    }

    let chunk_offsets: Vec<u64> = if let Some(stco) = find_box(stbl, b"stco")? {
        let mut r = Reader::new(stco);
        r.full_box()?;
        let n = r.u32()? as usize;
        check_table(n, 4, r.remaining().len())?;
        (0..n).map(|_| r.u32().map(u64::from)).collect::<Result<_>>()?
    } else if let Some(co64) = find_box(stbl, b"co64")? {
        let mut r = Reader::new(co64);
        r.full_box()?;
        let n = r.u32()? as usize;
        check_table(n, 8, r.remaining().len())?;
        (0..n).map(|_| r.u64()).collect::<Result<_>>()?
    } else {
        return Err(missing("stco/co64"));
    };

    let mut locations = Vec::with_capacity(sizes.len());
    let mut sizes_iter = sizes.iter();
    for (index, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_number = index as u32 + 1;
        let per_chunk = runs
            .iter()
            .rev()
            .find(|(first, _)| *first <= chunk_number)
            .map(|&(_, n)| n)
            .unwrap_or(0);

        let mut offset = chunk_offset;
        for _ in 0..per_chunk {
            let Some(&size) = sizes_iter.next() else {
                break;
            };
            locations.push(SampleLocation { offset, size });
            offset += size as u64;
        }
    }

    if locations.len() != sizes.len() {
        warn!(
            "MP4 sample table mismatch: {} sizes, {} located",
            sizes.len(),
            locations.len()
        );
    }
    locations.sort_by_key(|s| s.offset);
    Ok(locations)
}

fn check_table(count: usize, entry_len: usize, available: usize) -> Result<()> {
    if count.saturating_mul(entry_len) > available {
        return Err(Error::malformed(
            "mp4",
            format!("table of {} entries exceeds its box", count),
        ));
    }
    Ok(())
}

fn top_level_policy(kind: &FourCc) -> BoxPolicy {
    match kind {
        b"moov" => BoxPolicy::Collect,
        b"mdat" => BoxPolicy::Stream,
        _ => BoxPolicy::Skip,
    }
}

/// Streaming demuxer for non-fragmented MP4
pub struct Mp4Demuxer {
    stream: BoxStream,
    events: Vec<BoxEvent>,
    track: Option<AudioTrackInfo>,
    cursor: SampleCursor,
    /// `mdat` body received before `moov`: (absolute body offset, bytes)
    held: Option<(u64, BytesMut)>,
    samples: Vec<Bytes>,
}

impl Mp4Demuxer {
    pub fn new() -> Self {
        Self {
            stream: BoxStream::new(),
            events: Vec::new(),
            track: None,
            cursor: SampleCursor::new(),
            held: None,
            samples: Vec::new(),
        }
    }

    /// Audio track, once `moov` has been parsed
    pub fn track(&self) -> Option<AudioTrackInfo> {
        self.track
    }

    fn on_moov(&mut self, body: &[u8]) -> Result<()> {
        if self.track.is_some() {
            return Ok(());
        }
        let (info, stbl) = find_audio_track(body)?.ok_or_else(|| {
            Error::UnsupportedFormat("MP4 file has no AAC audio track".to_string())
        })?;
        let table = build_sample_table(stbl)?;
        info!(
            "MP4 AAC track {}: {} Hz, {} channels, {} samples",
            info.track_id,
            info.config.sample_rate(),
            info.config.channels,
            table.len()
        );
        self.track = Some(info);
        self.cursor.extend(table);

        if let Some((offset, held)) = self.held.take() {
            debug!("Replaying {} bytes of mdat received before moov", held.len());
            self.cursor.push(offset, &held, &mut self.samples);
        }
        Ok(())
    }

    fn flush_samples(&mut self, out: &mut Vec<Bytes>) {
        let Some(track) = self.track else {
            return;
        };
        for sample in self.samples.drain(..) {
            match track.config.frame(&sample) {
                Ok(frame) => out.push(frame),
                Err(e) => warn!("Skipping MP4 sample: {}", e),
            }
        }
    }
}

impl Default for Mp4Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for Mp4Demuxer {
    fn name(&self) -> &'static str {
        "mp4"
    }

    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.stream.feed(chunk, top_level_policy, &mut self.events)?;

        for event in std::mem::take(&mut self.events) {
            match event {
                BoxEvent::Complete { kind, body, .. } if &kind == b"moov" => self.on_moov(&body)?,
                BoxEvent::Complete { .. } => {}
                BoxEvent::StreamStart { body_start, .. } => {
                    if self.track.is_none() && self.held.is_none() {
                        self.held = Some((body_start, BytesMut::new()));
                    }
                }
                BoxEvent::StreamData { offset, data } => {
                    if self.track.is_some() {
                        self.cursor.push(offset, &data, &mut self.samples);
                    } else if let Some((_, held)) = self.held.as_mut() {
                        if held.len() + data.len() > MAX_HELD_MDAT_BYTES {
                            return Err(Error::malformed(
                                "mp4",
                                "mdat before moov exceeds the hold limit",
                            ));
                        }
                        held.extend_from_slice(&data);
                    }
                }
                BoxEvent::StreamEnd { .. } => {}
            }
        }

        self.flush_samples(out);
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        self.stream.finish(&mut self.events);
        self.events.clear();
        self.flush_samples(out);
        if self.track.is_none() {
            return Err(Error::malformed("mp4", "stream ended without moov"));
        }
        if self.cursor.pending_samples() > 0 {
            debug!("MP4 ended with {} samples unread", self.cursor.pending_samples());
        }
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.stream.buffered()
            + self.cursor.buffered()
            + self.held.as_ref().map(|(_, h)| h.len()).unwrap_or(0)
    }
}
