//! Fragmented MP4 (fMP4 / HLS segments) demuxer
//!
//! The init segment's `moov` is read once for the track configuration and
//! `trex` defaults. Each `moof` yields per-sample sizes from `tfhd`/`trun`;
//! their positions are resolved when the following `mdat` starts, since a
//! `trun` without a data offset begins at the `mdat` body.

use super::boxes::{
    find_box, iter_boxes, BoxEvent, BoxPolicy, BoxStream, FourCc, Reader, MAX_COLLECT_BYTES,
};
use super::track::find_audio_track;
use super::{AacTrackConfig, SampleCursor, SampleLocation};
use crate::demux::adts::{nearest_sample_rate_index, AOT_AAC_LC};
use crate::demux::Demuxer;
use crate::error::{Error, Result};
use bytes::Bytes;
use tracing::{debug, info, warn};

const TFHD_BASE_DATA_OFFSET: u32 = 0x01;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x02;
const TFHD_DEFAULT_DURATION: u32 = 0x08;
const TFHD_DEFAULT_SIZE: u32 = 0x10;
const TFHD_DEFAULT_FLAGS: u32 = 0x20;

const TRUN_DATA_OFFSET: u32 = 0x01;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x04;
const TRUN_DURATION: u32 = 0x100;
const TRUN_SIZE: u32 = 0x200;
const TRUN_FLAGS: u32 = 0x400;
const TRUN_CTO: u32 = 0x800;

/// Upper bound on samples described by one track fragment
pub const MAX_SAMPLES_PER_FRAGMENT: usize = 1 << 16;

#[derive(Debug, Clone, Copy)]
struct FragmentInit {
    /// 0 accepts any track fragment
    track_id: u32,
    config: AacTrackConfig,
    default_sample_size: Option<u32>,
}

/// A `trun`'s samples before their absolute position is known
#[derive(Debug)]
struct SampleRun {
    /// Absolute start when the `trun` carried a data offset
    start: Option<u64>,
    sizes: Vec<u32>,
}

pub struct FragmentedMp4Demuxer {
    stream: BoxStream,
    events: Vec<BoxEvent>,
    init: Option<FragmentInit>,
    runs: Vec<SampleRun>,
    cursor: SampleCursor,
    samples: Vec<Bytes>,
    fragments: u64,
}

impl FragmentedMp4Demuxer {
    pub fn new() -> Self {
        Self {
            stream: BoxStream::new(),
            events: Vec::new(),
            init: None,
            runs: Vec::new(),
            cursor: SampleCursor::new(),
            samples: Vec::new(),
            fragments: 0,
        }
    }

    /// Track configuration from the init segment
    pub fn config(&self) -> Option<AacTrackConfig> {
        self.init.map(|i| i.config)
    }

    fn on_moov(&mut self, body: &[u8]) -> Result<()> {
        if self.init.is_some() {
            return Ok(());
        }
        let (info, _) = find_audio_track(body)?.ok_or_else(|| {
            Error::UnsupportedFormat("fMP4 init segment has no AAC audio track".to_string())
        })?;

        let mut default_sample_size = None;
        if let Some(mvex) = find_box(body, b"mvex")? {
            for item in iter_boxes(mvex) {
                let (kind, trex) = item?;
                if &kind != b"trex" {
                    continue;
                }
                let mut r = Reader::new(trex);
                r.full_box()?;
                let track_id = r.u32()?;
                r.skip(8)?; // description index, duration
                let size = r.u32()?;
                if track_id == info.track_id && size != 0 {
                    default_sample_size = Some(size);
                }
            }
        }

        info!(
            "fMP4 init: track {}, {} Hz, {} channels, object type {}",
            info.track_id,
            info.config.sample_rate(),
            info.config.channels,
            info.config.object_type
        );
        self.init = Some(FragmentInit {
            track_id: info.track_id,
            config: info.config,
            default_sample_size,
        });
        Ok(())
    }

    fn on_moof(&mut self, moof_start: u64, body: &[u8]) -> Result<()> {
        let init = match self.init {
            Some(init) => init,
            None => {
                warn!("fMP4 fragment before init segment, assuming 44.1 kHz stereo AAC-LC");
                let init = FragmentInit {
                    track_id: 0,
                    config: AacTrackConfig {
                        object_type: AOT_AAC_LC,
                        sample_rate_index: nearest_sample_rate_index(44100),
                        channels: 2,
                    },
                    default_sample_size: None,
                };
                self.init = Some(init);
                init
            }
        };

        self.runs.clear();
        for item in iter_boxes(body) {
            let (kind, traf) = item?;
            if &kind != b"traf" {
                continue;
            }
            if self.parse_traf(moof_start, traf, &init)? {
                // first matching track fragment only
                break;
            }
        }
        self.fragments += 1;
        Ok(())
    }

    /// Returns true when the fragment belonged to the audio track
    fn parse_traf(&mut self, moof_start: u64, traf: &[u8], init: &FragmentInit) -> Result<bool> {
        let tfhd = find_box(traf, b"tfhd")?
            .ok_or_else(|| Error::malformed("fmp4", "traf without tfhd"))?;
        let mut r = Reader::new(tfhd);
        let (_, flags) = r.full_box()?;
        let track_id = r.u32()?;
        if init.track_id != 0 && track_id != init.track_id {
            return Ok(false);
        }
        let base = if flags & TFHD_BASE_DATA_OFFSET != 0 {
            r.u64()?
        } else {
            moof_start
        };
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            r.u32()?;
        }
        if flags & TFHD_DEFAULT_DURATION != 0 {
            r.u32()?;
        }
        let default_size = if flags & TFHD_DEFAULT_SIZE != 0 {
            Some(r.u32()?)
        } else {
            init.default_sample_size
        };
        if flags & TFHD_DEFAULT_FLAGS != 0 {
            r.u32()?;
        }

        let mut total = 0usize;
        for item in iter_boxes(traf) {
            let (kind, trun) = item?;
            if &kind != b"trun" {
                continue;
            }
            let mut r = Reader::new(trun);
            let (_, flags) = r.full_box()?;
            let count = r.u32()? as usize;
            total = total.saturating_add(count);
            if total > MAX_SAMPLES_PER_FRAGMENT {
                return Err(Error::malformed(
                    "fmp4",
                    format!(
                        "track fragment declares {} samples, limit is {}",
                        total, MAX_SAMPLES_PER_FRAGMENT
                    ),
                ));
            }
            let start = if flags & TRUN_DATA_OFFSET != 0 {
                let offset = r.u32()? as i32 as i64;
                Some((base as i64 + offset).max(0) as u64)
            } else {
                None
            };
            if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
                r.u32()?;
            }

            let per_sample = [TRUN_DURATION, TRUN_SIZE, TRUN_FLAGS, TRUN_CTO]
                .iter()
                .filter(|&&f| flags & f != 0)
                .count()
                * 4;
            if count.saturating_mul(per_sample) > r.remaining().len() {
                return Err(Error::malformed(
                    "fmp4",
                    format!("trun of {} samples exceeds its box", count),
                ));
            }
            if flags & TRUN_SIZE == 0 {
                let size = default_size.unwrap_or(0) as u64;
                if (count as u64).saturating_mul(size) > MAX_COLLECT_BYTES {
                    return Err(Error::malformed(
                        "fmp4",
                        format!("trun of {} samples of {} bytes is too large", count, size),
                    ));
                }
            }

            let mut sizes = Vec::with_capacity(count);
            for _ in 0..count {
                if flags & TRUN_DURATION != 0 {
                    r.u32()?;
                }
                let size = if flags & TRUN_SIZE != 0 {
                    r.u32()?
                } else {
                    default_size.ok_or_else(|| {
                        Error::malformed("fmp4", "sample size missing from trun, tfhd and trex")
                    })?
                };
                if flags & TRUN_FLAGS != 0 {
                    r.u32()?;
                }
                if flags & TRUN_CTO != 0 {
                    r.u32()?;
                }
                sizes.push(size);
            }
            self.runs.push(SampleRun { start, sizes });
        }
        Ok(true)
    }

    fn on_mdat_start(&mut self, body_start: u64) {
        let mut next = body_start;
        let mut locations = Vec::new();
        for run in self.runs.drain(..) {
            let mut offset = run.start.unwrap_or(next);
            for size in run.sizes {
                locations.push(SampleLocation { offset, size });
                offset += size as u64;
            }
            next = offset;
        }
        locations.sort_by_key(|l| l.offset);
        self.cursor.reset();
        self.cursor.extend(locations);
    }

    fn flush_samples(&mut self, out: &mut Vec<Bytes>) {
        let Some(init) = self.init else {
            return;
        };
        for sample in self.samples.drain(..) {
            match init.config.frame(&sample) {
                Ok(frame) => out.push(frame),
                Err(e) => warn!("Skipping fMP4 sample: {}", e),
            }
        }
    }
}

impl Default for FragmentedMp4Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn fragment_policy(kind: &FourCc) -> BoxPolicy {
    match kind {
        b"moov" | b"moof" => BoxPolicy::Collect,
        b"mdat" => BoxPolicy::Stream,
        _ => BoxPolicy::Skip,
    }
}

impl Demuxer for FragmentedMp4Demuxer {
    fn name(&self) -> &'static str {
        "fmp4"
    }

    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.stream.feed(chunk, fragment_policy, &mut self.events)?;

        for event in std::mem::take(&mut self.events) {
            match event {
                BoxEvent::Complete { kind, start, body } => match &kind {
                    b"moov" => self.on_moov(&body)?,
                    b"moof" => self.on_moof(start, &body)?,
                    _ => {}
                },
                BoxEvent::StreamStart { body_start, .. } => self.on_mdat_start(body_start),
                BoxEvent::StreamData { offset, data } => {
                    self.cursor.push(offset, &data, &mut self.samples);
                }
                BoxEvent::StreamEnd { .. } => {
                    if self.cursor.pending_samples() > 0 {
                        warn!(
                            "fMP4 mdat ended with {} samples missing",
                            self.cursor.pending_samples()
                        );
                        self.cursor.reset();
                    }
                }
            }
        }

        self.flush_samples(out);
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        self.stream.finish(&mut self.events);
        self.events.clear();
        self.flush_samples(out);
        debug!("fMP4 demuxer done: {} fragments", self.fragments);
        Ok(())
    }

    fn pending_bytes(&self) -> usize {
        self.stream.buffered() + self.cursor.buffered()
    }
}
