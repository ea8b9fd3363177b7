//! Upload → submit → poll orchestration for flushed chunks.
//!
//! ## Per-chunk flow
//!
//! ```text
//! Chunk ──to_wav()──► UploadStore::upload ──► SpeechService::submit
//!                                                      │
//!                              fixed-interval poll loop (bounded)
//!                                                      │
//!                          broadcast ChunkOutcomeEvent { completed | failed }
//! ```
//!
//! Each chunk runs on its own blocking task, so several can be in
//! flight and their outcomes can land out of chunk-sequence order.
//! A failure is terminal for its chunk only — the engine keeps cutting
//! and dispatching subsequent audio regardless.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{ChunkDispatcher, JobOutput, JobStatus, SpeechService, UploadStore, VoiceProfile};
use crate::error::{RelayError, Result};
use crate::events::{ChunkOutcome, ChunkOutcomeEvent};
use crate::segmenter::Chunk;

/// Outcome channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Polling policy for submitted jobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delay between consecutive status polls.
    pub poll_interval: Duration,
    /// Poll attempts before the job is reported as timed out.
    pub max_polls: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 60,
        }
    }
}

/// Dispatcher that relays chunks through an `UploadStore` and a
/// `SpeechService`.
///
/// Must be constructed inside a Tokio runtime context — it captures the
/// current handle to spawn per-chunk blocking tasks.
pub struct RelayDispatcher<U, S> {
    uploads: Arc<U>,
    service: Arc<S>,
    config: DispatcherConfig,
    outcome_tx: broadcast::Sender<ChunkOutcomeEvent>,
    runtime: tokio::runtime::Handle,
    in_flight: Arc<AtomicUsize>,
}

impl<U: UploadStore, S: SpeechService> RelayDispatcher<U, S> {
    /// # Panics
    /// Panics when called outside a Tokio runtime context.
    pub fn new(uploads: U, service: S, config: DispatcherConfig) -> Self {
        let (outcome_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            uploads: Arc::new(uploads),
            service: Arc::new(service),
            config,
            outcome_tx,
            runtime: tokio::runtime::Handle::current(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Subscribe to per-chunk outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChunkOutcomeEvent> {
        self.outcome_tx.subscribe()
    }

    /// Number of chunks currently being uploaded or polled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl<U: UploadStore, S: SpeechService> ChunkDispatcher for RelayDispatcher<U, S> {
    fn dispatch(&self, chunk: Chunk, voice: VoiceProfile) {
        let uploads = Arc::clone(&self.uploads);
        let service = Arc::clone(&self.service);
        let config = self.config.clone();
        let outcome_tx = self.outcome_tx.clone();
        let in_flight = Arc::clone(&self.in_flight);

        in_flight.fetch_add(1, Ordering::Relaxed);
        self.runtime.spawn_blocking(move || {
            let seq = chunk.seq;
            let result = process_chunk(&*uploads, &*service, &config, &chunk, &voice);
            in_flight.fetch_sub(1, Ordering::Relaxed);

            match result {
                Ok(Some(output)) => {
                    info!(
                        chunk_seq = seq,
                        transcript_len = output.transcript.len(),
                        has_audio = output.audio_url.is_some(),
                        "chunk completed"
                    );
                    let _ = outcome_tx.send(ChunkOutcomeEvent {
                        chunk_seq: seq,
                        outcome: ChunkOutcome::Completed {
                            transcript: output.transcript,
                            audio_url: output.audio_url,
                        },
                    });
                }
                // Empty transcript: the chunk held no recognisable speech.
                // A silent no-op, not an error.
                Ok(None) => {
                    debug!(chunk_seq = seq, "empty transcript — dropping result");
                }
                Err(e) => {
                    warn!(chunk_seq = seq, error = %e, "chunk processing failed");
                    let _ = outcome_tx.send(ChunkOutcomeEvent {
                        chunk_seq: seq,
                        outcome: ChunkOutcome::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        });
    }
}

/// Blocking per-chunk pipeline. Returns `Ok(None)` for empty transcripts.
fn process_chunk<U: UploadStore, S: SpeechService>(
    uploads: &U,
    service: &S,
    config: &DispatcherConfig,
    chunk: &Chunk,
    voice: &VoiceProfile,
) -> Result<Option<JobOutput>> {
    let container = chunk.to_wav()?;
    debug!(
        chunk_seq = chunk.seq,
        bytes = container.len(),
        mime = chunk.mime_type(),
        "uploading chunk"
    );

    let audio_url = uploads
        .upload(&container, &chunk.file_name())
        .map_err(|e| RelayError::Upload(e.to_string()))?;

    let job = service.submit(&audio_url, voice)?;
    debug!(chunk_seq = chunk.seq, job = %job.0, "job submitted");

    for _attempt in 0..config.max_polls {
        std::thread::sleep(config.poll_interval);

        match service.poll_status(&job)? {
            JobStatus::Pending => continue,
            JobStatus::Completed(output) => {
                if output.transcript.trim().is_empty() {
                    return Ok(None);
                }
                return Ok(Some(output));
            }
            JobStatus::Failed { error } => {
                return Err(RelayError::Processing(error));
            }
        }
    }

    Err(RelayError::JobTimeout {
        attempts: config.max_polls,
    })
}
