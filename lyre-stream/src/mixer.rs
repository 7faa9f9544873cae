//! Multi-layer PCM mixer
//!
//! Secondary PCM sources ("layers") are blended into the primary stream one
//! primary frame at a time. Each layer has its own ring buffer filled by a
//! source task; the primary pipeline reads from every ring once per frame, so
//! layer audio is always aligned to the primary frame boundary.
//!
//! A layer leaves the mix when its source fails (`ERROR`), when it is removed
//! on request (`REMOVED`) or by [`AudioMixer::clear`] (`CLEARED`), or when it
//! has produced data before and then comes up empty on three consecutive reads
//! (`FINISHED`). Removal is safe from both the read path and the source task.

use crate::audio::types::{clamp_i16, le_bytes_to_i16, BYTES_PER_FRAME};
use crate::buffer::RingBuffer;
use crate::error::{Error, Result};
use crate::source::ByteStream;
use futures::StreamExt;
use lyre_common::{LayerRemovedReason, PipelineEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ring size per layer, about 5.4 s of 48 kHz stereo PCM
pub const LAYER_RING_BYTES: usize = 1024 * 1024;

/// Layers allowed on one mixer
pub const MAX_LAYERS: usize = 8;

/// Empty reads after which a layer that has produced data counts as finished
const FINISHED_AFTER_EMPTY_READS: u32 = 3;

/// The source task waits while its ring is this full
const LAYER_HIGH_WATER: usize = LAYER_RING_BYTES / 4 * 3;

struct LayerShared {
    /// `None` once the layer is removed
    ring: Mutex<Option<RingBuffer>>,
    received: AtomicU64,
    space: Notify,
}

impl LayerShared {
    fn ring(&self) -> MutexGuard<'_, Option<RingBuffer>> {
        self.ring.lock().unwrap_or_else(|p| p.into_inner())
    }
}

struct MixLayer {
    track: String,
    volume: f32,
    shared: Arc<LayerShared>,
    consecutive_empty_reads: u32,
    task: Option<JoinHandle<()>>,
}

struct MixerInner {
    layers: Mutex<HashMap<Uuid, MixLayer>>,
    enabled: AtomicBool,
    events: Option<mpsc::Sender<PipelineEvent>>,
}

impl MixerInner {
    fn layers(&self) -> MutexGuard<'_, HashMap<Uuid, MixLayer>> {
        self.layers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for MixerInner {
    fn drop(&mut self) {
        for layer in self.layers().values_mut() {
            if let Some(task) = layer.task.take() {
                task.abort();
            }
        }
    }
}

/// One layer's samples for the current primary frame
#[derive(Debug, Clone, PartialEq)]
pub struct LayerChunk {
    pub layer_id: Uuid,
    pub volume: f32,
    pub samples: Vec<i16>,
}

/// Snapshot of one layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    pub layer_id: Uuid,
    pub track: String,
    pub volume: f32,
    pub buffered_bytes: usize,
    pub received_bytes: u64,
}

/// Handle to a mixer; clones share the same layers
#[derive(Clone)]
pub struct AudioMixer {
    inner: Arc<MixerInner>,
}

impl AudioMixer {
    /// Create an enabled mixer reporting lifecycle events to `events`
    pub fn new(events: Option<mpsc::Sender<PipelineEvent>>) -> Self {
        Self {
            inner: Arc::new(MixerInner {
                layers: Mutex::new(HashMap::new()),
                enabled: AtomicBool::new(true),
                events,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Disabled mixers pass the primary stream through untouched
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Start mixing a PCM source
    ///
    /// Must be called inside a tokio runtime; the source is drained by a
    /// spawned task.
    ///
    /// # Arguments
    /// * `stream` - Interleaved stereo i16 little-endian PCM at 48 kHz
    /// * `track` - Label used in logs
    /// * `volume` - Layer gain, clamped to 0..=1
    ///
    /// # Returns
    /// The new layer's id
    pub fn add_layer(&self, stream: ByteStream, track: impl Into<String>, volume: f32) -> Result<Uuid> {
        if !self.is_enabled() {
            return Err(Error::Disabled);
        }

        let track = track.into();
        let volume = volume.clamp(0.0, 1.0);
        let id = Uuid::new_v4();
        let shared = Arc::new(LayerShared {
            ring: Mutex::new(Some(RingBuffer::new(LAYER_RING_BYTES))),
            received: AtomicU64::new(0),
            space: Notify::new(),
        });

        {
            let mut layers = self.inner.layers();
            if layers.len() >= MAX_LAYERS {
                return Err(Error::ResourceExhausted(format!(
                    "mixer already has {} layers",
                    MAX_LAYERS
                )));
            }

            let task = tokio::spawn(pump_layer(
                Arc::downgrade(&self.inner),
                id,
                Arc::clone(&shared),
                stream,
            ));
            layers.insert(
                id,
                MixLayer {
                    track: track.clone(),
                    volume,
                    shared,
                    consecutive_empty_reads: 0,
                    task: Some(task),
                },
            );
        }

        info!("Layer {} added ({}, volume {:.2})", id, track, volume);
        self.emit(PipelineEvent::LayerAdded {
            layer_id: id,
            volume,
        });
        Ok(id)
    }

    /// Take up to `chunk_size` bytes from every layer
    ///
    /// Called once per primary frame. Reads are whole stereo frames. A layer
    /// that has received data and now yields its third empty read in a row is
    /// removed as finished.
    pub fn read_layer_chunks(&self, chunk_size: usize) -> Vec<LayerChunk> {
        let want = chunk_size - chunk_size % BYTES_PER_FRAME;
        let mut chunks = Vec::new();
        let mut finished = Vec::new();

        {
            let mut layers = self.inner.layers();
            for (&id, layer) in layers.iter_mut() {
                let data = {
                    let mut ring = layer.shared.ring();
                    match ring.as_mut() {
                        Some(ring) => {
                            let whole = ring.len() - ring.len() % BYTES_PER_FRAME;
                            let take = want.min(whole);
                            if take == 0 {
                                None
                            } else {
                                ring.read(take)
                            }
                        }
                        None => None,
                    }
                };

                match data {
                    Some(bytes) => {
                        layer.consecutive_empty_reads = 0;
                        layer.shared.space.notify_one();
                        chunks.push(LayerChunk {
                            layer_id: id,
                            volume: layer.volume,
                            samples: le_bytes_to_i16(&bytes),
                        });
                    }
                    None => {
                        layer.consecutive_empty_reads += 1;
                        let started = layer.shared.received.load(Ordering::Acquire) > 0;
                        if started && layer.consecutive_empty_reads >= FINISHED_AFTER_EMPTY_READS {
                            finished.push(id);
                        }
                    }
                }
            }
        }

        for id in finished {
            self.remove_layer(id, LayerRemovedReason::Finished, None);
        }
        chunks
    }

    /// Sum layer chunks into the primary frame
    ///
    /// Each layer sample is scaled by its volume and the sum is saturated to
    /// the i16 range. With no chunks, or with mixing disabled, `main` is
    /// returned as is.
    pub fn mix_buffers(&self, main: Vec<i16>, chunks: &[LayerChunk]) -> Vec<i16> {
        if chunks.is_empty() || !self.is_enabled() {
            return main;
        }

        let mut main = main;
        for (i, sample) in main.iter_mut().enumerate() {
            let mut acc = *sample as f32;
            for chunk in chunks {
                if let Some(&s) = chunk.samples.get(i) {
                    acc += s as f32 * chunk.volume;
                }
            }
            *sample = clamp_i16(acc);
        }
        main
    }

    /// Remove a layer, stop its source and return its ring to the pool
    ///
    /// # Returns
    /// false when no such layer exists (already removed)
    pub fn remove_layer(&self, id: Uuid, reason: LayerRemovedReason, message: Option<String>) -> bool {
        let removed = self.inner.layers().remove(&id);
        let Some(mut layer) = removed else {
            return false;
        };

        if let Some(task) = layer.task.take() {
            task.abort();
        }
        if let Some(ring) = layer.shared.ring().take() {
            ring.dispose();
        }
        layer.shared.space.notify_one();

        match reason {
            LayerRemovedReason::Error => warn!(
                "Layer {} ({}) removed: {}",
                id,
                layer.track,
                message.as_deref().unwrap_or("source error")
            ),
            _ => info!("Layer {} ({}) removed: {}", id, layer.track, reason),
        }

        self.emit(PipelineEvent::LayerRemoved {
            layer_id: id,
            reason,
            message,
        });
        true
    }

    /// Remove every layer
    pub fn clear(&self) {
        for id in self.layer_ids() {
            self.remove_layer(id, LayerRemovedReason::Cleared, None);
        }
    }

    pub fn set_layer_volume(&self, id: Uuid, volume: f32) -> Result<()> {
        match self.inner.layers().get_mut(&id) {
            Some(layer) => {
                layer.volume = volume.clamp(0.0, 1.0);
                Ok(())
            }
            None => Err(Error::NotFound(format!("layer {}", id))),
        }
    }

    pub fn layer_ids(&self) -> Vec<Uuid> {
        self.inner.layers().keys().copied().collect()
    }

    pub fn layer_count(&self) -> usize {
        self.inner.layers().len()
    }

    pub fn layers(&self) -> Vec<LayerInfo> {
        self.inner
            .layers()
            .iter()
            .map(|(&id, layer)| LayerInfo {
                layer_id: id,
                track: layer.track.clone(),
                volume: layer.volume,
                buffered_bytes: layer.shared.ring().as_ref().map_or(0, |r| r.len()),
                received_bytes: layer.shared.received.load(Ordering::Acquire),
            })
            .collect()
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.inner.events {
            if let Err(e) = events.try_send(event) {
                debug!("Mixer event dropped: {}", e);
            }
        }
    }
}

/// Copy a layer source into its ring, waiting while the ring is mostly full
async fn pump_layer(mixer: Weak<MixerInner>, id: Uuid, shared: Arc<LayerShared>, mut stream: ByteStream) {
    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                if let Some(inner) = mixer.upgrade() {
                    AudioMixer { inner }.remove_layer(id, LayerRemovedReason::Error, Some(e.to_string()));
                }
                return;
            }
        };

        let mut data = &chunk[..];
        while !data.is_empty() {
            let written = {
                let mut ring = shared.ring();
                let Some(ring) = ring.as_mut() else {
                    return;
                };
                let room = LAYER_HIGH_WATER.saturating_sub(ring.len());
                let n = room.min(data.len());
                if n > 0 {
                    ring.write(&data[..n]);
                }
                n
            };

            if written == 0 {
                shared.space.notified().await;
                continue;
            }
            shared.received.fetch_add(written as u64, Ordering::AcqRel);
            data = &data[written..];
        }
    }
    debug!("Layer {} source ended", id);
}
