//! # revoice
//!
//! Silence-segmented microphone relay engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Session(spawn_blocking)
//!                                                    │
//!                                            silence verdict (RMS)
//!                                                    │
//!                                         Segmenter: debounce + cut
//!                                                    │
//!                                   ChunkDispatcher (upload → submit → poll)
//!                                                    │
//!                                    broadcast::Sender<ChunkOutcomeEvent>
//! ```
//!
//! Speech is accumulated until a sustained run of trailing silence, then
//! cut into a WAV chunk and relayed to a hosted speech service. Dispatch
//! is fire-and-forget; the capture path never waits on the network.
//!
//! The audio callback is zero-alloc. All heap work happens on the
//! session thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod segmenter;
pub mod vad;

// Convenience re-exports for downstream crates
pub use dispatch::{
    ChunkDispatcher, DispatcherConfig, JobHandle, JobOutput, JobStatus, RelayDispatcher,
    SpeechService, UploadStore, VoiceProfile,
};
pub use engine::{EngineConfig, RelayEngine};
pub use error::RelayError;
pub use events::{
    AudioActivityEvent, ChunkOutcome, ChunkOutcomeEvent, EngineStatus, EngineStatusEvent,
};
pub use segmenter::{Chunk, ChunkKind, PcmSpec, Segmenter, SegmenterConfig};
pub use vad::{FrameVerdict, RmsDetector, SilenceDetector};
