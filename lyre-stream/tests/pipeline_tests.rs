//! End-to-end pipeline tests: source bytes in, 48 kHz stereo PCM out

mod helpers;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use helpers::*;
use lyre_common::api::OutputEncoding;
use lyre_common::filters::FilterSettings;
use lyre_common::{AacContainer, AudioFormat, ErrorKind, LayerRemovedReason, PipelineEvent};
use lyre_stream::audio::types::i16_to_le_bytes;
use lyre_stream::pipeline::{run_pipeline, split_packets, PipelineOutcome};
use lyre_stream::source::ByteStream;
use lyre_stream::{PipelineBuilder, PipelineOptions};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn assert_near(samples: &[i16], expected: i16, tolerance: i16) {
    for (i, &s) in samples.iter().enumerate() {
        assert!(
            (s - expected).abs() <= tolerance,
            "sample {} is {}, expected {}",
            i,
            s,
            expected
        );
    }
}

async fn run(
    options: PipelineOptions,
    format: AudioFormat,
    source: ByteStream,
) -> (Vec<u8>, Option<lyre_stream::Error>, PipelineOutcome) {
    let pipeline = PipelineBuilder::new(options).build(format).unwrap();
    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(run_pipeline(pipeline, source, tx));
    let (bytes, err) = collect(rx).await;
    let stats = task.await.unwrap();
    (bytes, err, stats.outcome)
}

#[tokio::test]
async fn test_wav_at_48k_passes_through_unchanged() {
    let wav = constant_wav(48_000, 48_000, 1000);
    let (bytes, err, outcome) = run(PipelineOptions::default(), AudioFormat::Wav, chunked(wav, 4096)).await;

    assert!(err.is_none());
    assert_eq!(outcome, PipelineOutcome::Finished);
    assert_eq!(bytes.len(), 48_000 * 4);
    assert_near(&samples(&bytes), 1000, 1);
}

#[tokio::test]
async fn test_start_position_skips_decoded_audio() {
    let wav = constant_wav(48_000, 48_000, 1000);
    let options = PipelineOptions {
        position_ms: 250,
        ..Default::default()
    };
    let (bytes, _, outcome) = run(options, AudioFormat::Wav, chunked(wav, 1000)).await;

    assert_eq!(outcome, PipelineOutcome::Finished);
    assert_eq!(bytes.len(), 36_000 * 4);
}

#[tokio::test]
async fn test_track_volume_and_filter_volume_compose() {
    let wav = constant_wav(48_000, 9600, 1000);
    let options = PipelineOptions {
        gain: 2.0,
        filters: FilterSettings {
            volume: Some(0.5),
            ..Default::default()
        },
        ..Default::default()
    };
    let (bytes, _, _) = run(options, AudioFormat::Wav, chunked(wav, 8192)).await;
    assert_eq!(bytes.len(), 9600 * 4);
    assert_near(&samples(&bytes), 1000, 2);
}

#[tokio::test]
async fn test_44k_source_is_resampled_to_48k() {
    let wav = sine_wav(44_100, 44_100, 440.0, 0.5);
    let (bytes, err, outcome) = run(PipelineOptions::default(), AudioFormat::Wav, chunked(wav, 4096)).await;

    assert!(err.is_none());
    assert_eq!(outcome, PipelineOutcome::Finished);
    let frames = bytes.len() / 4;
    assert!((47_000..=49_000).contains(&frames), "{} frames", frames);
}

#[tokio::test]
async fn test_flv_pcm_tags_decode_across_chunk_boundaries() {
    // one second at 44.1 kHz in 100 ms tags, fed 333 bytes at a time
    let flv = flv_pcm(44_100, 2000, 4410);
    let (bytes, err, outcome) = run(PipelineOptions::default(), AudioFormat::Flv, chunked(flv, 333)).await;

    assert!(err.is_none());
    assert_eq!(outcome, PipelineOutcome::Finished);
    let pcm = samples(&bytes);
    let frames = pcm.len() / 2;
    assert!((47_000..=49_000).contains(&frames), "{} frames", frames);
    // away from the resampler's edges the level is unchanged
    assert_near(&pcm[pcm.len() / 4..pcm.len() / 2], 2000, 20);
}

#[tokio::test]
async fn test_upstream_error_is_terminal() {
    let wav = constant_wav(48_000, 48_000, 1000);
    let half = wav[..wav.len() / 2].to_vec();
    let (_, err, outcome) = run(PipelineOptions::default(), AudioFormat::Wav, failing_after(half, 4096)).await;

    assert_eq!(outcome, PipelineOutcome::Failed(ErrorKind::Upstream));
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Upstream));
}

#[tokio::test]
async fn test_malformed_container_is_terminal() {
    let garbage = b"NOT AN FLV FILE AT ALL".repeat(10);
    let (bytes, err, outcome) = run(PipelineOptions::default(), AudioFormat::Flv, chunked(garbage, 7)).await;

    assert!(bytes.is_empty());
    assert_eq!(outcome, PipelineOutcome::Failed(ErrorKind::MalformedContainer));
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::MalformedContainer));
}

#[tokio::test]
async fn test_opus_output_is_length_prefixed_20ms_packets() {
    let wav = sine_wav(48_000, 48_000, 440.0, 0.3);
    let options = PipelineOptions {
        encoding: OutputEncoding::Opus,
        ..Default::default()
    };
    let (bytes, err, outcome) = run(options, AudioFormat::Wav, chunked(wav, 5000)).await;

    assert!(err.is_none());
    assert_eq!(outcome, PipelineOutcome::Finished);
    let packets = split_packets(&bytes);
    assert_eq!(packets.len(), 50);
    assert!(packets.iter().all(|p| !p.is_empty()));
}

#[tokio::test]
async fn test_disconnect_tears_down_in_reverse_order() {
    let options = PipelineOptions {
        mixer: true,
        ..Default::default()
    };
    let mut pipeline = PipelineBuilder::new(options)
        .build(AudioFormat::Aac(AacContainer::Adts))
        .unwrap();
    let mut events = pipeline.take_events().unwrap();

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let source: ByteStream = stream::pending().boxed();
    let stats = run_pipeline(pipeline, source, tx).await;
    assert_eq!(stats.outcome, PipelineOutcome::Cancelled);

    let mut destroyed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::StageDestroyed { stage } = event {
            destroyed.push(stage);
        }
    }
    assert_eq!(destroyed, vec!["filters", "mixer", "volume", "decode"]);
}

#[tokio::test]
async fn test_stalled_consumer_bounds_upstream_reads() {
    let pulled = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&pulled);

    // endless FLV: header, then the same PCM tag forever
    let flv = flv_pcm(4410, 100, 4410);
    let (header, tag) = flv.split_at(13);
    let header = Bytes::copy_from_slice(header);
    let tag = Bytes::copy_from_slice(tag);
    let source: ByteStream = stream::once(async move { header })
        .chain(stream::repeat(tag))
        .map(move |chunk: Bytes| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            Ok::<Bytes, lyre_stream::Error>(chunk)
        })
        .boxed();

    let pipeline = PipelineBuilder::default().build(AudioFormat::Flv).unwrap();
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(run_pipeline(pipeline, source, tx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let first = pulled.load(Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = pulled.load(Ordering::Relaxed);

    assert_eq!(first, second, "upstream kept being read");
    assert!(second < 1024 * 1024, "{} bytes pulled", second);

    drop(rx);
    let stats = task.await.unwrap();
    assert_eq!(stats.outcome, PipelineOutcome::Cancelled);
}

#[tokio::test]
async fn test_layer_is_mixed_then_finishes() {
    let options = PipelineOptions {
        mixer: true,
        ..Default::default()
    };
    let mut pipeline = PipelineBuilder::new(options).build(AudioFormat::Wav).unwrap();
    let mut events = pipeline.take_events().unwrap();
    let mixer = pipeline.mixer().cloned().unwrap();

    // 100 ms of constant 500 as raw PCM
    let layer_pcm = i16_to_le_bytes(&vec![500i16; 9600]);
    let layer_id = mixer.add_layer(chunked(layer_pcm, 1024), "beep", 1.0).unwrap();
    for _ in 0..500 {
        if mixer.layers().first().map_or(0, |l| l.received_bytes) >= 19_200 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let wav = constant_wav(48_000, 48_000, 0);
    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(run_pipeline(pipeline, chunked(wav, 4096), tx));
    let (bytes, err) = collect(rx).await;
    task.await.unwrap();

    assert!(err.is_none());
    let pcm = samples(&bytes);
    assert_eq!(pcm.len(), 96_000);
    assert_eq!(pcm.iter().filter(|&&s| s == 500).count(), 9600);
    assert!(pcm[..9600].iter().all(|&s| s == 500));
    assert!(pcm[9600..].iter().all(|&s| s == 0));

    let mut removed = None;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::LayerRemoved { layer_id: id, reason, .. } = event {
            removed = Some((id, reason));
        }
    }
    assert_eq!(removed, Some((layer_id, LayerRemovedReason::Finished)));
}
