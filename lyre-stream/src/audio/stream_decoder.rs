//! General-purpose decoder for self-describing formats
//!
//! MP3, FLAC, Ogg and WAV are probed and decoded by symphonia on a dedicated
//! thread. Compressed bytes reach the thread through a blocking byte queue;
//! decoded blocks come back over a bounded channel. Dropping the decoder
//! cancels the queue so the thread unwinds on its next read or send.

use crate::audio::decoder::codec_registry;
use crate::audio::types::{convert_to_stereo_f32, PcmBlock};
use crate::error::{Error, Result};
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io::Read;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Decoded blocks in flight between the thread and the pipeline
const OUTPUT_DEPTH: usize = 4;

#[derive(Default)]
struct QueueState {
    chunks: VecDeque<Bytes>,
    len: usize,
    closed: bool,
    cancelled: bool,
}

/// Blocking byte queue shared with the decode thread
#[derive(Default)]
struct ByteQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl ByteQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, chunk: Bytes) {
        let mut state = self.lock();
        state.len += chunk.len();
        state.chunks.push_back(chunk);
        self.ready.notify_one();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        state.chunks.clear();
        state.len = 0;
        self.ready.notify_all();
    }

    fn len(&self) -> usize {
        self.lock().len
    }
}

/// `Read` side of the queue; blocks until bytes arrive or input ends
struct QueueReader {
    queue: Arc<ByteQueue>,
}

impl Read for QueueReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.queue.lock();
        loop {
            if state.cancelled {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "decoder cancelled",
                ));
            }
            if let Some(front) = state.chunks.front_mut() {
                let n = buf.len().min(front.len());
                buf[..n].copy_from_slice(&front[..n]);
                front.advance(n);
                if front.is_empty() {
                    state.chunks.pop_front();
                }
                state.len -= n;
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = self
                .queue
                .ready
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }
}

/// Symphonia decoder running on its own thread
pub struct GeneralDecoder {
    queue: Arc<ByteQueue>,
    rx: Receiver<Result<PcmBlock>>,
    thread: Option<JoinHandle<()>>,
    drained: bool,
}

impl GeneralDecoder {
    /// Start the decode thread
    ///
    /// # Arguments
    /// * `extension` - File-extension hint for the format probe
    pub fn spawn(extension: &'static str) -> Result<Self> {
        let queue = Arc::new(ByteQueue::default());
        let (tx, rx) = mpsc::sync_channel(OUTPUT_DEPTH);
        let reader = QueueReader {
            queue: Arc::clone(&queue),
        };

        let thread = std::thread::Builder::new()
            .name("lyre-decode".to_string())
            .spawn(move || decode_thread(reader, extension, tx))
            .map_err(|e| Error::Internal(format!("Failed to spawn decode thread: {}", e)))?;

        Ok(Self {
            queue,
            rx,
            thread: Some(thread),
            drained: false,
        })
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.queue.push(Bytes::copy_from_slice(chunk));
    }

    /// Compressed bytes not yet consumed by the thread
    pub fn buffered_bytes(&self) -> usize {
        self.queue.len()
    }

    /// Signal end of input
    pub fn end_of_input(&mut self) {
        self.queue.close();
    }

    /// Next decoded block if one is ready
    pub fn try_next(&mut self) -> Result<Option<PcmBlock>> {
        match self.rx.try_recv() {
            Ok(Ok(block)) => Ok(Some(block)),
            Ok(Err(e)) => Err(e),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                if !self.drained {
                    self.drained = true;
                    if let Some(thread) = self.thread.take() {
                        let _ = thread.join();
                    }
                }
                Ok(None)
            }
        }
    }

    /// The thread has exited and every block was delivered
    pub fn is_drained(&self) -> bool {
        self.drained
    }
}

impl Drop for GeneralDecoder {
    fn drop(&mut self) {
        self.queue.cancel();
        // receiver drops after this; a thread blocked on send then fails and exits
    }
}

fn decode_thread(reader: QueueReader, extension: &'static str, tx: SyncSender<Result<PcmBlock>>) {
    if let Err(e) = run_decode(reader, extension, &tx) {
        debug!("Decode thread stopped: {}", e);
        let _ = tx.send(Err(e));
    }
}

fn run_decode(
    reader: QueueReader,
    extension: &'static str,
    tx: &SyncSender<Result<PcmBlock>>,
) -> Result<()> {
    let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(reader)), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(extension);

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let nominal_rate = codec_params.sample_rate.unwrap_or(44100);
    debug!(
        "General decoder: {} track, {} Hz, {:?} channels",
        extension,
        nominal_rate,
        codec_params.channels.map(|c| c.count())
    );

    let mut decoder = codec_registry()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut corrupt = 0u64;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("General decoder reached end of stream");
                break;
            }
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(());
            }
            Err(e) => return Err(Error::malformed("symphonia", e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let block = match decoder.decode(&packet) {
            Ok(decoded) => {
                let rate = decoded.spec().rate;
                let mut samples = Vec::new();
                convert_to_stereo_f32(decoded, &mut samples);
                PcmBlock::new(samples, if rate == 0 { nominal_rate } else { rate })
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                corrupt += 1;
                warn!("Skipping corrupt packet: {}", msg);
                continue;
            }
            Err(e) => return Err(Error::Decode(e.to_string())),
        };

        if block.is_empty() {
            continue;
        }
        if tx.send(Ok(block)).is_err() {
            // pipeline gone
            return Ok(());
        }
    }

    if corrupt > 0 {
        debug!("General decoder skipped {} corrupt packets", corrupt);
    }
    Ok(())
}
