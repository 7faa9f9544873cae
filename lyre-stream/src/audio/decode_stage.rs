//! Decode and resample stage
//!
//! Turns compressed input into 48 kHz stereo i16 PCM. Two shapes:
//! - Demuxed: a container demuxer recovers elementary frames (ADTS-AAC,
//!   Opus packets, FLV audio tags) that are decoded one at a time.
//! - General: symphonia probes and decodes the raw byte stream on its own
//!   thread (MP3, FLAC, Ogg, WAV).
//!
//! Compressed bytes are buffered here; [`DecodeStage::wants_input`] applies
//! the high/low water hysteresis and [`DecodeStage::decode_burst`] performs
//! at most `max_decode_ops` decode operations per call.

use crate::audio::aac::AacFrameDecoder;
use crate::audio::flv_audio::FlvAudioDecoder;
use crate::audio::opus_adapter::OpusPacketDecoder;
use crate::audio::resampler::{ResamplerQuality, StreamResampler};
use crate::audio::stream_decoder::GeneralDecoder;
use crate::audio::types::{f32_to_i16_vec, i16_to_f32, PcmBlock, TARGET_SAMPLE_RATE};
use crate::demux::{demuxer_for, Demuxer};
use crate::error::{Error, Result};
use bytes::Bytes;
use lyre_common::AudioFormat;
use std::collections::VecDeque;
use tracing::{debug, warn};

pub const DEFAULT_HIGH_WATER_BYTES: usize = 256 * 1024;
pub const DEFAULT_LOW_WATER_BYTES: usize = 128 * 1024;
pub const DEFAULT_MAX_DECODE_OPS: usize = 8;

/// Knobs for one decode stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub quality: ResamplerQuality,
    pub high_water_bytes: usize,
    pub low_water_bytes: usize,
    pub max_decode_ops: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            quality: ResamplerQuality::default(),
            high_water_bytes: DEFAULT_HIGH_WATER_BYTES,
            low_water_bytes: DEFAULT_LOW_WATER_BYTES,
            max_decode_ops: DEFAULT_MAX_DECODE_OPS,
        }
    }
}

/// High/low water mark hysteresis over buffered compressed bytes
#[derive(Debug, Clone, Copy)]
pub struct Backpressure {
    high: usize,
    low: usize,
    paused: bool,
}

impl Backpressure {
    pub fn new(high: usize, low: usize) -> Self {
        Self {
            high,
            low: low.min(high),
            paused: false,
        }
    }

    /// Re-evaluate with the current buffered byte count
    ///
    /// # Returns
    /// `true` while upstream should stay paused
    pub fn update(&mut self, buffered: usize) -> bool {
        if self.paused {
            if buffered < self.low {
                self.paused = false;
            }
        } else if buffered >= self.high {
            self.paused = true;
        }
        self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

/// Per-frame codec behind a demuxer
pub enum FrameCodec {
    Aac(AacFrameDecoder),
    Opus(OpusPacketDecoder),
    Flv(FlvAudioDecoder),
}

impl FrameCodec {
    fn for_format(format: AudioFormat) -> Result<Self> {
        Ok(match format {
            AudioFormat::Opus => FrameCodec::Opus(OpusPacketDecoder::new()?),
            AudioFormat::Flv => FrameCodec::Flv(FlvAudioDecoder::new()),
            _ => FrameCodec::Aac(AacFrameDecoder::new()),
        })
    }

    /// Decode one elementary frame; `None` for configuration-only frames
    fn decode(&mut self, frame: &[u8]) -> Result<Option<PcmBlock>> {
        match self {
            FrameCodec::Aac(aac) => aac.decode_adts(frame).map(Some),
            FrameCodec::Opus(opus) => {
                let pcm = opus
                    .decode(frame)
                    .map_err(|e| Error::CorruptFrame(e.to_string()))?;
                let samples = pcm.into_iter().map(i16_to_f32).collect();
                Ok(Some(PcmBlock::new(samples, TARGET_SAMPLE_RATE)))
            }
            FrameCodec::Flv(flv) => flv.decode(frame),
        }
    }
}

enum Source {
    Demuxed {
        demuxer: Box<dyn Demuxer>,
        codec: FrameCodec,
        frames: VecDeque<Bytes>,
        queued_bytes: usize,
    },
    General(GeneralDecoder),
}

/// Compressed bytes in, 48 kHz stereo i16 out
pub struct DecodeStage {
    format: AudioFormat,
    source: Source,
    resampler: Option<StreamResampler>,
    options: DecodeOptions,
    backpressure: Backpressure,
    input_ended: bool,
    flushed: bool,
    frames_decoded: u64,
    corrupt_frames: u64,
}

impl DecodeStage {
    /// Build the decode shape for `format`
    pub fn new(format: AudioFormat, options: DecodeOptions) -> Result<Self> {
        let source = match demuxer_for(format) {
            Some(demuxer) => Source::Demuxed {
                demuxer,
                codec: FrameCodec::for_format(format)?,
                frames: VecDeque::new(),
                queued_bytes: 0,
            },
            None => Source::General(GeneralDecoder::spawn(format.extension_hint())?),
        };
        debug!(
            "Decode stage for {:?}: {}",
            format,
            match &source {
                Source::Demuxed { demuxer, .. } => demuxer.name(),
                Source::General(_) => "symphonia",
            }
        );

        Ok(Self {
            format,
            source,
            resampler: None,
            options,
            backpressure: Backpressure::new(options.high_water_bytes, options.low_water_bytes),
            input_ended: false,
            flushed: false,
            frames_decoded: 0,
            corrupt_frames: 0,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Compressed bytes held and not yet decoded
    pub fn buffered_bytes(&self) -> usize {
        match &self.source {
            Source::Demuxed {
                demuxer,
                queued_bytes,
                ..
            } => demuxer.pending_bytes() + queued_bytes,
            Source::General(decoder) => decoder.buffered_bytes(),
        }
    }

    /// Whether upstream may deliver another chunk
    pub fn wants_input(&mut self) -> bool {
        let buffered = self.buffered_bytes();
        let was_paused = self.backpressure.is_paused();
        let paused = self.backpressure.update(buffered);
        if paused != was_paused {
            debug!(
                "Decode input {} at {} buffered bytes",
                if paused { "paused" } else { "resumed" },
                buffered
            );
        }
        !paused && !self.input_ended
    }

    pub fn is_paused(&self) -> bool {
        self.backpressure.is_paused()
    }

    /// Accept one chunk of compressed input
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        match &mut self.source {
            Source::Demuxed {
                demuxer,
                frames,
                queued_bytes,
                ..
            } => {
                let mut out = Vec::new();
                demuxer.feed(chunk, &mut out)?;
                for frame in out {
                    *queued_bytes += frame.len();
                    frames.push_back(frame);
                }
            }
            Source::General(decoder) => decoder.push(chunk),
        }
        Ok(())
    }

    /// No more input will arrive
    pub fn end_of_input(&mut self) -> Result<()> {
        if self.input_ended {
            return Ok(());
        }
        self.input_ended = true;
        match &mut self.source {
            Source::Demuxed {
                demuxer,
                frames,
                queued_bytes,
                ..
            } => {
                let mut out = Vec::new();
                demuxer.finish(&mut out)?;
                for frame in out {
                    *queued_bytes += frame.len();
                    frames.push_back(frame);
                }
            }
            Source::General(decoder) => decoder.end_of_input(),
        }
        Ok(())
    }

    /// Everything has been decoded and flushed
    pub fn is_finished(&self) -> bool {
        self.flushed
    }

    /// Decoded stereo frames so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }

    /// Perform up to `max_decode_ops` decode operations
    ///
    /// Corrupt frames are counted and skipped; every other error is terminal.
    ///
    /// # Returns
    /// Interleaved stereo i16 at 48 kHz; empty when nothing was ready
    pub fn decode_burst(&mut self) -> Result<Vec<i16>> {
        let mut pcm = Vec::new();
        if self.flushed {
            return Ok(pcm);
        }

        for _ in 0..self.options.max_decode_ops.max(1) {
            match self.decode_one() {
                Ok(Some(block)) => {
                    if !block.is_empty() {
                        self.frames_decoded += block.frames() as u64;
                        pcm.extend(self.resample(block)?);
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_recoverable() => {
                    self.corrupt_frames += 1;
                    if self.corrupt_frames <= 10 || self.corrupt_frames % 100 == 0 {
                        warn!(
                            "Skipping corrupt frame #{} ({:?}): {}",
                            self.corrupt_frames, self.format, e
                        );
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if self.input_ended && self.source_drained() {
            if let Some(resampler) = self.resampler.as_mut() {
                pcm.extend(f32_to_i16_vec(&resampler.flush()?));
            }
            self.flushed = true;
            debug!(
                "Decode stage finished: {} frames, {} corrupt",
                self.frames_decoded, self.corrupt_frames
            );
        }
        Ok(pcm)
    }

    fn source_drained(&self) -> bool {
        match &self.source {
            Source::Demuxed { frames, .. } => frames.is_empty(),
            Source::General(decoder) => decoder.is_drained(),
        }
    }

    fn decode_one(&mut self) -> Result<Option<PcmBlock>> {
        match &mut self.source {
            Source::Demuxed {
                codec,
                frames,
                queued_bytes,
                ..
            } => {
                while let Some(frame) = frames.pop_front() {
                    *queued_bytes -= frame.len();
                    if let Some(block) = codec.decode(&frame)? {
                        return Ok(Some(block));
                    }
                }
                Ok(None)
            }
            Source::General(decoder) => decoder.try_next(),
        }
    }

    fn resample(&mut self, block: PcmBlock) -> Result<Vec<i16>> {
        let mut out = Vec::new();
        let rate_changed = self
            .resampler
            .as_ref()
            .map(|r| r.input_rate() != block.sample_rate)
            .unwrap_or(false);
        if rate_changed {
            if let Some(mut old) = self.resampler.take() {
                debug!("Source rate changed from {} Hz", old.input_rate());
                out.extend(f32_to_i16_vec(&old.flush()?));
            }
        }

        if block.sample_rate == TARGET_SAMPLE_RATE {
            out.extend(f32_to_i16_vec(&block.samples));
            return Ok(out);
        }
        if block.sample_rate == 0 {
            return Err(Error::CorruptFrame("block without sample rate".to_string()));
        }

        if self.resampler.is_none() {
            self.resampler = Some(StreamResampler::new(block.sample_rate, self.options.quality)?);
        }
        if let Some(resampler) = self.resampler.as_mut() {
            out.extend(f32_to_i16_vec(&resampler.process(&block.samples)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::flv::tests::{flv_header, flv_tag};
    use lyre_common::AacContainer;

    #[test]
    fn test_backpressure_hysteresis() {
        let mut bp = Backpressure::new(256 * 1024, 128 * 1024);
        assert!(!bp.update(100 * 1024));
        assert!(!bp.update(255 * 1024));
        assert!(bp.update(256 * 1024));
        // stays paused between the marks
        assert!(bp.update(200 * 1024));
        assert!(bp.update(128 * 1024));
        assert!(!bp.update(127 * 1024));
        assert!(!bp.update(200 * 1024));
    }

    fn pcm_flv(tags: usize, samples_per_tag: usize) -> Vec<u8> {
        let mut flv = flv_header();
        for t in 0..tags {
            // 44.1 kHz, 16-bit, stereo little-endian PCM
            let mut body = vec![0x3F];
            for i in 0..samples_per_tag * 2 {
                body.extend_from_slice(&(((t * 31 + i) % 1000) as i16).to_le_bytes());
            }
            flv.extend(flv_tag(8, &body));
        }
        flv
    }

    #[test]
    fn test_flv_pcm_resampled_to_48k() {
        let flv = pcm_flv(40, 441);
        let mut stage = DecodeStage::new(AudioFormat::Flv, DecodeOptions::default()).unwrap();
        let mut pcm = Vec::new();
        for chunk in flv.chunks(1000) {
            stage.push(chunk).unwrap();
            pcm.extend(stage.decode_burst().unwrap());
        }
        stage.end_of_input().unwrap();
        while !stage.is_finished() {
            pcm.extend(stage.decode_burst().unwrap());
        }

        assert_eq!(stage.frames_decoded(), 40 * 441);
        let frames = pcm.len() / 2;
        // 17640 frames at 44.1 kHz is 19200 at 48 kHz
        assert!((18700..=19300).contains(&frames), "got {} frames", frames);
        assert_eq!(pcm.len() % 2, 0);
    }

    #[test]
    fn test_burst_bounded_by_max_decode_ops() {
        let flv = pcm_flv(20, 480);
        let options = DecodeOptions {
            max_decode_ops: 3,
            ..DecodeOptions::default()
        };
        let mut stage = DecodeStage::new(AudioFormat::Flv, options).unwrap();
        stage.push(&flv).unwrap();
        stage.decode_burst().unwrap();
        assert_eq!(stage.frames_decoded(), 3 * 480);
    }

    #[test]
    fn test_bad_adts_payloads_do_not_abort() {
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend(crate::demux::adts::synthesize(2, 4, 2, &[0u8; 40]).unwrap());
        }
        let mut stage =
            DecodeStage::new(AudioFormat::Aac(AacContainer::Adts), DecodeOptions::default()).unwrap();
        stage.push(&stream).unwrap();
        stage.end_of_input().unwrap();
        let mut guard = 0;
        while !stage.is_finished() && guard < 10 {
            assert!(stage.decode_burst().is_ok());
            guard += 1;
        }
        assert!(stage.is_finished());
    }

    #[test]
    fn test_corrupt_opus_packet_is_skipped() {
        use crate::audio::types::SAMPLES_PER_20MS;
        use crate::audio::{OpusFrameEncoder, OpusSettings};
        use crate::demux::webm::tests::build_webm;

        // two 20 ms stereo frames
        let tone: Vec<u8> = (0..SAMPLES_PER_20MS * 4)
            .flat_map(|i| (((i as f32 * 0.05).sin() * 8000.0) as i16).to_le_bytes())
            .collect();
        let mut encoder = OpusFrameEncoder::new(OpusSettings::default()).unwrap();
        let mut packets = Vec::new();
        encoder.push(&tone, &mut packets).unwrap();
        assert_eq!(packets.len(), 2);

        // code-3 packet declaring zero frames
        let garbage = vec![0xFFu8, 0x00];
        let mut blocks: Vec<Vec<u8>> = packets.iter().map(|p| p.to_vec()).collect();
        blocks.insert(1, garbage);
        blocks.push(packets[0].to_vec());
        let webm = build_webm(&blocks);

        let mut stage = DecodeStage::new(AudioFormat::Opus, DecodeOptions::default()).unwrap();
        let mut pcm = Vec::new();
        for chunk in webm.chunks(100) {
            stage.push(chunk).unwrap();
            pcm.extend(stage.decode_burst().unwrap());
        }
        stage.end_of_input().unwrap();
        let mut guard = 0;
        while !stage.is_finished() && guard < 10 {
            pcm.extend(stage.decode_burst().unwrap());
            guard += 1;
        }

        assert!(stage.is_finished());
        assert_eq!(stage.corrupt_frames(), 1);
        assert_eq!(stage.frames_decoded(), 3 * SAMPLES_PER_20MS as u64);
        assert_eq!(pcm.len(), 3 * SAMPLES_PER_20MS * 2);
    }

    #[test]
    fn test_wants_input_follows_buffered_bytes() {
        let options = DecodeOptions {
            high_water_bytes: 4096,
            low_water_bytes: 1024,
            max_decode_ops: 1,
            ..DecodeOptions::default()
        };
        let mut stage = DecodeStage::new(AudioFormat::Flv, options).unwrap();
        assert!(stage.wants_input());
        stage.push(&pcm_flv(10, 441)).unwrap();
        assert!(stage.buffered_bytes() >= 4096);
        assert!(!stage.wants_input());

        while stage.buffered_bytes() >= 1024 {
            stage.decode_burst().unwrap();
            assert!(stage.buffered_bytes() < 1024 || !stage.wants_input());
        }
        assert!(stage.wants_input());
    }

    #[test]
    fn test_malformed_container_is_terminal() {
        let mut stage = DecodeStage::new(AudioFormat::Flv, DecodeOptions::default()).unwrap();
        let err = stage.push(b"XYZ\x01\x05\x00\x00\x00\x09").unwrap_err();
        assert!(!err.is_recoverable());
    }
}
