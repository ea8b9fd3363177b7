//! Chunk dispatch boundary.
//!
//! The segmentation engine hands every flushed `Chunk` to a
//! `ChunkDispatcher` and immediately moves on — dispatch is
//! fire-and-forget, several chunks may be in flight at once, and their
//! completions can surface in any order.
//!
//! `RelayDispatcher` is the provided orchestration over two collaborator
//! traits, `UploadStore` and `SpeechService`. Their real implementations
//! (the vendor HTTP client) live with the embedding application; this
//! crate only defines the seam.

pub mod relay;

pub use relay::{DispatcherConfig, RelayDispatcher};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segmenter::Chunk;

/// Voice/style parameters forwarded opaquely to the speech service.
///
/// The `extra` map is flattened into the serialized form, so callers can
/// pass vendor-specific knobs (exaggeration, temperature, ...) without
/// this crate knowing their names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfile {
    /// Voice identifier, e.g. `"af_heart"`.
    pub voice: String,
    /// Playback speed multiplier in [0.5, 2.0].
    pub speed: f32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            voice: "af_heart".to_string(),
            speed: 1.0,
            extra: serde_json::Map::new(),
        }
    }
}

/// Accepts flushed chunks from the segmentation engine.
///
/// `dispatch` must not block: the session loop calls it between audio
/// ticks. Implementations queue or spawn their own work.
pub trait ChunkDispatcher: Send + Sync + 'static {
    fn dispatch(&self, chunk: Chunk, voice: VoiceProfile);
}

/// Opaque handle to a submitted remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(pub String);

/// Output of a completed remote job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    /// Recognised text. May be empty when the chunk held no speech.
    pub transcript: String,
    /// Reference to the synthesized audio, when available.
    pub audio_url: Option<String>,
}

/// Poll result for a submitted job.
#[derive(Debug, Clone)]
pub enum JobStatus {
    /// Still queued or processing — poll again.
    Pending,
    Completed(JobOutput),
    Failed { error: String },
}

/// Blob storage the dispatcher uploads chunk containers to.
pub trait UploadStore: Send + Sync + 'static {
    /// Upload `bytes` under `file_name` and return a fetchable URL.
    ///
    /// # Errors
    /// Network/authorization failures. The dispatcher treats them as
    /// terminal for the chunk — no automatic retry.
    fn upload(&self, bytes: &[u8], file_name: &str) -> Result<String>;
}

/// The hosted transcribe-and-synthesize service.
pub trait SpeechService: Send + Sync + 'static {
    /// Submit an uploaded chunk for processing.
    fn submit(&self, audio_url: &str, voice: &VoiceProfile) -> Result<JobHandle>;

    /// One status poll. Called at a fixed interval up to a bounded
    /// number of attempts per job.
    fn poll_status(&self, job: &JobHandle) -> Result<JobStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_profile_flattens_extra_parameters() {
        let mut profile = VoiceProfile {
            voice: "am_onyx".into(),
            speed: 1.2,
            extra: serde_json::Map::new(),
        };
        profile
            .extra
            .insert("exaggeration".into(), serde_json::json!(0.25));

        let json = serde_json::to_value(&profile).expect("serialize profile");
        assert_eq!(json["voice"], "am_onyx");
        assert_eq!(json["exaggeration"], 0.25);

        let round_trip: VoiceProfile =
            serde_json::from_value(json).expect("deserialize profile");
        assert_eq!(round_trip.extra["exaggeration"], 0.25);
    }
}
