//! Content-type classification
//!
//! Maps a declared (and possibly unreliable) MIME/content-type string to the
//! pipeline shape that can decode it. Matching is case-insensitive substring
//! matching, evaluated in a fixed priority order.

use crate::{Error, Result};
use serde::Serialize;

/// Containers in the AAC family, each with its own demuxer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AacContainer {
    /// Fragmented MP4 (HLS / fMP4 segments)
    FragmentedMp4,
    /// MPEG transport stream
    MpegTs,
    /// Whole-file MP4 / M4A / MOV
    Mp4,
    /// Raw ADTS stream
    Adts,
}

/// Audio formats the engine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// WebM with an Opus track
    Opus,
    /// AAC in one of several containers
    Aac(AacContainer),
    /// MPEG audio (MP3)
    MpegAudio,
    /// FLAC
    Flac,
    /// Ogg container (Vorbis or Opus)
    OggVorbis,
    /// RIFF WAVE
    Wav,
    /// Flash video container (AAC or PCM audio tags)
    Flv,
}

const AAC_FAMILY: &[&str] = &[
    "aac", "mp4", "m4a", "m4v", "mov", "hls", "mpegurl", "fmp4", "mpegts",
];

/// Human-readable list of supported formats, included in rejection errors
pub const SUPPORTED_FORMATS: &str =
    "opus/webm, aac (adts, mp4, m4a, m4v, mov, fmp4/hls, mpegts), mpeg/mp3, flac, ogg/vorbis, wav, flv";

impl AudioFormat {
    /// Classify a content-type hint, or `None` when nothing matches
    pub fn detect(content_type: &str) -> Option<AudioFormat> {
        let ct = content_type.to_ascii_lowercase();
        let has = |needle: &str| ct.contains(needle);

        if has("opus") || has("webm") {
            return Some(AudioFormat::Opus);
        }

        if AAC_FAMILY.iter().any(|needle| has(needle)) {
            let container = if has("fmp4") || has("hls") || has("mpegurl") {
                AacContainer::FragmentedMp4
            } else if has("mpegts") || has("video/mp2t") {
                AacContainer::MpegTs
            } else if has("mp4") || has("m4a") || has("m4v") || has("mov") {
                AacContainer::Mp4
            } else {
                AacContainer::Adts
            };
            return Some(AudioFormat::Aac(container));
        }

        if has("mpeg") || has("mp3") {
            Some(AudioFormat::MpegAudio)
        } else if has("flac") {
            Some(AudioFormat::Flac)
        } else if has("ogg") || has("vorbis") {
            Some(AudioFormat::OggVorbis)
        } else if has("wav") {
            Some(AudioFormat::Wav)
        } else if has("flv") {
            Some(AudioFormat::Flv)
        } else {
            None
        }
    }

    /// Classify or reject with the full list of supported formats
    pub fn classify(content_type: &str) -> Result<AudioFormat> {
        Self::detect(content_type).ok_or_else(|| Error::UnsupportedFormat {
            content_type: content_type.to_string(),
            supported: SUPPORTED_FORMATS.to_string(),
        })
    }

    /// File-extension hint for probing decoders
    pub fn extension_hint(&self) -> &'static str {
        match self {
            AudioFormat::Opus => "webm",
            AudioFormat::Aac(AacContainer::Adts) => "aac",
            AudioFormat::Aac(AacContainer::MpegTs) => "ts",
            AudioFormat::Aac(_) => "mp4",
            AudioFormat::MpegAudio => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::OggVorbis => "ogg",
            AudioFormat::Wav => "wav",
            AudioFormat::Flv => "flv",
        }
    }
}

/// Best-effort content type for a file extension (used for local sources)
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    let ct = match ext.to_ascii_lowercase().as_str() {
        "webm" => "audio/webm",
        "opus" => "audio/opus",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "mov" => "audio/mp4",
        "ts" => "video/mpegts",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "flv" => "video/x-flv",
        _ => return None,
    };
    Some(ct)
}
