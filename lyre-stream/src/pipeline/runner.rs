//! Driving a pipeline from a byte source to a bounded output channel
//!
//! One task per pipeline. Each tick pulls at most one upstream chunk (only
//! while the decode stage wants input), runs one decode burst through the
//! stages and sends the result. Sending awaits channel capacity, so a slow
//! consumer stalls decoding, which in turn stops upstream pulls at the
//! high-water mark.

use super::Pipeline;
use crate::error::{Error, Result};
use crate::source::ByteStream;
use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use lyre_common::{ErrorKind, PipelineEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

/// Wait used when a tick made no progress
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// How a pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineOutcome {
    /// Source drained and all output delivered
    #[default]
    Finished,
    /// The consumer went away
    Cancelled,
    /// Stopped on an unrecoverable error
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub outcome: PipelineOutcome,
}

/// Run `pipeline` until the source ends, the consumer leaves or a stage fails
///
/// A terminal error is delivered to the consumer as the last channel item.
/// The pipeline is destroyed before this returns, whatever the outcome.
pub async fn run_pipeline(
    mut pipeline: Pipeline,
    mut source: ByteStream,
    tx: mpsc::Sender<Result<Bytes>>,
) -> PipelineStats {
    let id = pipeline.id();
    let mut stats = PipelineStats::default();

    match drive(&mut pipeline, &mut source, &tx, &mut stats).await {
        Ok(outcome) => {
            stats.outcome = outcome;
            match outcome {
                PipelineOutcome::Finished => {
                    info!(
                        "Pipeline {} finished: {} bytes in, {} bytes out",
                        id, stats.bytes_in, stats.bytes_out
                    );
                    pipeline.emit(PipelineEvent::Finished {
                        bytes_out: stats.bytes_out,
                    });
                }
                _ => debug!("Pipeline {} cancelled by consumer", id),
            }
        }
        Err(e) => {
            let kind = e.kind();
            error!("Pipeline {} failed ({}): {}", id, kind, e);
            stats.outcome = PipelineOutcome::Failed(kind);
            pipeline.emit(PipelineEvent::Failed {
                kind,
                message: e.to_string(),
            });
            // the consumer may already be gone
            let _ = tx.send(Err(e)).await;
        }
    }

    // stop upstream before tearing down the stages
    drop(source);
    pipeline.destroy();
    stats
}

async fn drive(
    pipeline: &mut Pipeline,
    source: &mut ByteStream,
    tx: &mpsc::Sender<Result<Bytes>>,
    stats: &mut PipelineStats,
) -> Result<PipelineOutcome> {
    let mut source_done = false;
    let mut last_progress = true;

    loop {
        let mut progressed = false;
        let mut waited = false;

        if !source_done && pipeline.wants_input() {
            // block on upstream only when there is nothing else to do
            let item = if pipeline.buffered_bytes() == 0 && !last_progress {
                waited = true;
                tokio::select! {
                    item = source.next() => Some(item),
                    _ = tx.closed() => return Ok(PipelineOutcome::Cancelled),
                    _ = tokio::time::sleep(IDLE_BACKOFF) => None,
                }
            } else {
                source.next().now_or_never()
            };

            match item {
                Some(Some(Ok(chunk))) => {
                    stats.bytes_in += chunk.len() as u64;
                    pipeline.push_input(&chunk)?;
                    progressed = true;
                }
                Some(Some(Err(e))) => return Err(upstream(e)),
                Some(None) => {
                    debug!(
                        "Pipeline {} source ended after {} bytes",
                        pipeline.id(),
                        stats.bytes_in
                    );
                    source_done = true;
                    pipeline.end_of_input()?;
                    progressed = true;
                }
                None => {}
            }
        }

        if let Some(bytes) = pipeline.process_burst()? {
            progressed = true;
            if !send(tx, bytes, stats).await {
                return Ok(PipelineOutcome::Cancelled);
            }
        }

        if pipeline.is_finished() {
            if let Some(bytes) = pipeline.finish_output()? {
                if !send(tx, bytes, stats).await {
                    return Ok(PipelineOutcome::Cancelled);
                }
            }
            return Ok(PipelineOutcome::Finished);
        }

        if progressed {
            tokio::task::yield_now().await;
        } else if !waited {
            if tx.is_closed() {
                return Ok(PipelineOutcome::Cancelled);
            }
            tokio::time::sleep(IDLE_BACKOFF).await;
        }
        last_progress = progressed;
    }
}

async fn send(tx: &mpsc::Sender<Result<Bytes>>, bytes: Bytes, stats: &mut PipelineStats) -> bool {
    let len = bytes.len() as u64;
    if tx.send(Ok(bytes)).await.is_err() {
        return false;
    }
    stats.bytes_out += len;
    true
}

/// Source failures are upstream errors whatever the source reported
fn upstream(e: Error) -> Error {
    match e {
        Error::Upstream(_) => e,
        other => Error::Upstream(other.to_string()),
    }
}

/// Run a PCM pipeline in the background and expose its output as bytes
///
/// Dropping the returned stream cancels the pipeline.
pub fn pcm_byte_stream(pipeline: Pipeline, source: ByteStream, capacity: usize) -> ByteStream {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(run_pipeline(pipeline, source, tx));
    ReceiverStream::new(rx).boxed()
}
