//! Event types broadcast to engine and dispatcher subscribers.
//!
//! ## Channels
//!
//! | Event | Source |
//! |-------|--------|
//! | `AudioActivityEvent` | `RelayEngine::subscribe_activity` |
//! | `EngineStatusEvent` | `RelayEngine::subscribe_status` |
//! | `ChunkOutcomeEvent` | `RelayDispatcher::subscribe` |
//!
//! All types serialize as camelCase JSON so web/desktop frontends can
//! consume them directly.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chunk outcome events
// ---------------------------------------------------------------------------

/// Emitted once per dispatched chunk that produced a result or failed.
///
/// Outcomes may arrive out of chunk-sequence order: dispatches run
/// concurrently and the engine makes no re-ordering promise. Consumers
/// that want transcript order must sort by `chunk_seq` themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOutcomeEvent {
    /// Sequence number of the chunk this outcome belongs to.
    pub chunk_seq: u64,
    pub outcome: ChunkOutcome,
}

/// Terminal result of one chunk's upload + remote processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChunkOutcome {
    /// The remote job finished with a non-empty transcript.
    #[serde(rename_all = "camelCase")]
    Completed {
        transcript: String,
        /// Reference to the synthesized audio, when the service produced one.
        audio_url: Option<String>,
    },
    /// Upload, submission, processing, or the poll bound failed.
    /// Prior and subsequent chunks are unaffected.
    Failed { error: String },
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted for each analysed frame — drives level meters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the frame in [0.0, 1.0].
    pub rms: f32,
    /// Silence verdict for the frame.
    pub is_silent: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the relay engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Actively capturing audio and cutting chunks.
    Listening,
    /// Capture stopped; the engine may be restarted.
    Stopped,
    /// Session failed to start or died — restart required.
    Error,
}
