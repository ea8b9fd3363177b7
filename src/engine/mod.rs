//! `RelayEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! RelayEngine::new()
//!     └─► start()        → audio open, session spawned, status = Listening
//!         └─► stop()     → running=false, stream dropped, status = Stopped
//! ```
//!
//! `start()`/`stop()` return an error rather than panicking when called
//! in the wrong state.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `AudioCapture` is therefore created *inside* the
//! `spawn_blocking` closure so it never crosses a thread boundary. A
//! bounded rendezvous channel propagates any open-device errors back to
//! the `start()` caller.

pub mod session;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::AudioCapture,
    buffering::create_audio_ring,
    dispatch::{ChunkDispatcher, VoiceProfile},
    error::{RelayError, Result},
    events::{AudioActivityEvent, EngineStatus, EngineStatusEvent},
    segmenter::PcmSpec,
    vad::{RmsDetector, SilenceDetector},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `RelayEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate chunks are encoded at (Hz); capture is resampled to it.
    /// Default: 16000.
    pub target_sample_rate: u32,
    /// RMS level below which a frame counts as silent. Default: 0.01.
    pub silence_threshold: f32,
    /// Trailing-silence duration that cuts a chunk. Default: 800 ms.
    pub silence_duration: Duration,
    /// Piece-count bound forcing a cut during continuous speech.
    /// `None` disables the bound. Default: 500.
    pub max_chunk_pieces: Option<usize>,
    /// Voice profile attached to dispatched chunks; changeable mid-session.
    pub voice: VoiceProfile,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            silence_threshold: 0.01,
            silence_duration: Duration::from_millis(800),
            max_chunk_pieces: Some(500),
            voice: VoiceProfile::default(),
        }
    }
}

impl EngineConfig {
    /// Encoding of buffered pieces: mono PCM16 at the target rate.
    pub fn pcm_spec(&self) -> PcmSpec {
        PcmSpec {
            sample_rate: self.target_sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

/// The top-level engine handle.
///
/// `RelayEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in an `Arc` to share with command handlers and event-forwarding
/// tasks.
pub struct RelayEngine {
    config: EngineConfig,
    dispatcher: Arc<dyn ChunkDispatcher>,
    /// `true` while capture + session are active.
    running: Arc<AtomicBool>,
    /// Manual-cut request, serviced by the session loop.
    flush_requested: Arc<AtomicBool>,
    /// Voice profile snapshot attached to each dispatched chunk.
    voice: Arc<Mutex<VoiceProfile>>,
    /// Canonical status (written via Mutex, read from commands).
    status: Arc<Mutex<EngineStatus>>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    stats: Arc<session::SessionStats>,
}

impl RelayEngine {
    /// Create a new engine. Does not start capturing — call `start()`.
    pub fn new(config: EngineConfig, dispatcher: Arc<dyn ChunkDispatcher>) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let voice = Arc::new(Mutex::new(config.voice.clone()));

        Self {
            config,
            dispatcher,
            running: Arc::new(AtomicBool::new(false)),
            flush_requested: Arc::new(AtomicBool::new(false)),
            voice,
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            status_tx,
            activity_tx,
            stats: Arc::new(session::SessionStats::default()),
        }
    }

    /// Start audio capture and the session loop.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns. The session keeps running on a background blocking thread.
    ///
    /// # Errors
    /// - `RelayError::AlreadyRunning` if already started.
    /// - `RelayError::NoDefaultInputDevice` / `RelayError::AudioStream`
    ///   on device errors.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start using a preferred input device name; `None` selects the
    /// system default.
    pub fn start_with_device(&self, preferred_input_device: Option<String>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RelayError::AlreadyRunning);
        }

        self.stats.reset();
        self.flush_requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self.set_status(EngineStatus::Listening, None);

        let (producer, consumer) = create_audio_ring();

        let config = self.config.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let running = Arc::clone(&self.running);
        let flush_requested = Arc::clone(&self.flush_requested);
        let voice = Arc::clone(&self.voice);
        let activity_tx = self.activity_tx.clone();
        let stats = Arc::clone(&self.stats);

        // Rendezvous: the session thread reports open success/failure, and
        // the actual capture sample rate, back to start().
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        tokio::task::spawn_blocking(move || {
            // Device open must happen on THIS thread — cpal::Stream is !Send.
            let capture = match AudioCapture::open_with_preference(
                producer,
                Arc::clone(&running),
                preferred_input_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let capture_sample_rate = capture.sample_rate;
            let detector: Box<dyn SilenceDetector> =
                Box::new(RmsDetector::new(config.silence_threshold));

            session::run(session::SessionContext {
                config,
                detector,
                dispatcher,
                consumer,
                running,
                flush_requested,
                voice,
                activity_tx,
                capture_sample_rate,
                stats,
            });

            // Stream drops here, releasing the audio device on this thread.
            drop(capture);
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(capture_rate = rate, "engine started — listening");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message arrived — the session task
                // died during startup.
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("session failed to start".into()));
                Err(RelayError::Other(anyhow::anyhow!(
                    "session task died unexpectedly"
                )))
            }
        }
    }

    /// Stop audio capture and the session loop. Buffered audio is cut as
    /// a final chunk by the session before it exits.
    ///
    /// # Errors
    /// - `RelayError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RelayError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Request an immediate cut of whatever is buffered, without waiting
    /// for trailing silence. Serviced by the session loop on its next
    /// tick; a no-op when the buffer is empty.
    ///
    /// # Errors
    /// - `RelayError::NotRunning` if not currently running.
    pub fn force_flush(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RelayError::NotRunning);
        }
        self.flush_requested.store(true, Ordering::SeqCst);
        info!("manual chunk cut requested");
        Ok(())
    }

    /// Replace the voice profile attached to subsequently cut chunks.
    /// Takes effect from the next chunk; in-flight chunks are unaffected.
    pub fn set_voice(&self, voice: VoiceProfile) {
        *self.voice.lock() = voice;
    }

    /// Current voice profile (snapshot).
    pub fn voice(&self) -> VoiceProfile {
        self.voice.lock().clone()
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to live audio level events (RMS + silence verdict).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of session counters for observability.
    pub fn stats_snapshot(&self) -> session::StatsSnapshot {
        self.stats.snapshot()
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::segmenter::Chunk;

    struct NullDispatcher;

    impl ChunkDispatcher for NullDispatcher {
        fn dispatch(&self, _chunk: Chunk, _voice: VoiceProfile) {}
    }

    fn engine() -> RelayEngine {
        RelayEngine::new(EngineConfig::default(), Arc::new(NullDispatcher))
    }

    #[test]
    fn stop_before_start_is_an_error() {
        assert!(matches!(engine().stop(), Err(RelayError::NotRunning)));
    }

    #[test]
    fn force_flush_before_start_is_an_error() {
        assert!(matches!(
            engine().force_flush(),
            Err(RelayError::NotRunning)
        ));
    }

    #[test]
    fn voice_profile_is_swappable() {
        let engine = engine();
        assert_eq!(engine.voice().voice, "af_heart");

        let mut profile = VoiceProfile::default();
        profile.voice = "bm_lewis".into();
        profile.speed = 1.2;
        engine.set_voice(profile);

        let current = engine.voice();
        assert_eq!(current.voice, "bm_lewis");
        assert_eq!(current.speed, 1.2);
    }

    #[test]
    fn initial_status_is_idle() {
        assert_eq!(engine().status(), EngineStatus::Idle);
    }
}
