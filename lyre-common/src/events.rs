//! Pipeline lifecycle events
//!
//! Each pipeline owns a bounded event channel. Producers use `try_send`, so a
//! slow consumer loses events instead of stalling audio.

use crate::ErrorKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a mixer layer left the mix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayerRemovedReason {
    /// Source drained after having produced data
    Finished,
    /// Source stream failed
    Error,
    /// Removed on request
    Removed,
    /// Removed by clearing the mixer
    Cleared,
}

impl std::fmt::Display for LayerRemovedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LayerRemovedReason::Finished => "FINISHED",
            LayerRemovedReason::Error => "ERROR",
            LayerRemovedReason::Removed => "REMOVED",
            LayerRemovedReason::Cleared => "CLEARED",
        };
        f.write_str(s)
    }
}

/// Events emitted by a running pipeline and its mixer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A layer joined the mix
    LayerAdded { layer_id: Uuid, volume: f32 },

    /// A layer left the mix
    LayerRemoved {
        layer_id: Uuid,
        reason: LayerRemovedReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A recoverable error was absorbed (frame skipped)
    FrameSkipped { kind: ErrorKind, message: String },

    /// A stage was torn down
    StageDestroyed { stage: String },

    /// The source ended and all output was delivered
    Finished { bytes_out: u64 },

    /// The pipeline stopped on an unrecoverable error
    Failed { kind: ErrorKind, message: String },
}
