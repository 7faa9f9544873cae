//! Shared fixtures for lyre-stream integration tests
//!
//! - WAV generation with hound (in memory or on disk)
//! - FLV files carrying linear PCM audio tags
//! - Chunked byte sources and output collection

#![allow(dead_code)]

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use hound::{SampleFormat, WavSpec, WavWriter};
use lyre_stream::source::ByteStream;
use lyre_stream::Error;
use std::io::Cursor;
use std::path::Path;
use tokio::sync::mpsc;

/// Stereo 16-bit WAV where every sample is `value`
pub fn constant_wav(sample_rate: u32, frames: usize, value: i16) -> Vec<u8> {
    wav_with(sample_rate, frames, |_, _| value)
}

/// Stereo 16-bit WAV sine at `hz`, `amplitude` in 0..=1
pub fn sine_wav(sample_rate: u32, frames: usize, hz: f32, amplitude: f32) -> Vec<u8> {
    wav_with(sample_rate, frames, |frame, _| {
        let t = frame as f32 / sample_rate as f32;
        ((2.0 * std::f32::consts::PI * hz * t).sin() * amplitude * 32767.0) as i16
    })
}

/// Stereo 16-bit WAV with `sample(frame, channel)`
pub fn wav_with(sample_rate: u32, frames: usize, sample: impl Fn(usize, usize) -> i16) -> Vec<u8> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for frame in 0..frames {
            for channel in 0..2 {
                writer.write_sample(sample(frame, channel)).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// FLV file whose audio tags hold 16-bit stereo PCM at 44.1 kHz
pub fn flv_pcm(frames: usize, value: i16, frames_per_tag: usize) -> Vec<u8> {
    let mut out = b"FLV".to_vec();
    out.push(1);
    out.push(0x04);
    out.extend_from_slice(&9u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());

    // format 3 (PCM LE), rate index 3 (44.1 kHz), 16-bit, stereo
    let flags = (3 << 4) | (3 << 2) | 0x02 | 0x01;
    let mut remaining = frames;
    while remaining > 0 {
        let n = remaining.min(frames_per_tag);
        let mut payload = vec![flags];
        for _ in 0..n * 2 {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        out.push(8);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0]);
        out.extend_from_slice(&payload);
        out.extend_from_slice(&((payload.len() + 11) as u32).to_be_bytes());
        remaining -= n;
    }
    out
}

/// Source yielding `data` in chunks of `chunk` bytes
pub fn chunked(data: Vec<u8>, chunk: usize) -> ByteStream {
    let chunks: Vec<Result<Bytes, Error>> = data
        .chunks(chunk)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks).boxed()
}

/// Source yielding `data` then failing
pub fn failing_after(data: Vec<u8>, chunk: usize) -> ByteStream {
    chunked(data, chunk)
        .chain(stream::once(async {
            Err::<Bytes, Error>(Error::Upstream("connection reset by peer".to_string()))
        }))
        .boxed()
}

/// Drain a pipeline output channel
///
/// # Returns
/// All bytes received and the terminal error, if one was sent
pub async fn collect(mut rx: mpsc::Receiver<Result<Bytes, Error>>) -> (Vec<u8>, Option<Error>) {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        match item {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(e) => return (out, Some(e)),
        }
    }
    (out, None)
}

pub fn samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
