//! Blocking session loop.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Service a pending force-flush request, if any
//! 2. Drain ring buffer → Vec<f32> (one frame per iteration)
//! 3. Resample to the target rate, build an AudioFrame
//! 4. Silence verdict → broadcast AudioActivityEvent
//! 5. Encode the frame as a PCM16 piece, append to the segmenter
//! 6. Segmenter observe → on flush, hand the chunk to the dispatcher
//! ```
//!
//! The whole loop runs in `spawn_blocking`, keeping the Tokio executor
//! free for the dispatcher's per-chunk upload/poll tasks. The loop owns
//! the `Segmenter` exclusively, so a flush can never interleave with a
//! piece append.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::resample::RateAdapter,
    buffering::{frame::AudioFrame, AudioConsumer, Consumer},
    dispatch::{ChunkDispatcher, VoiceProfile},
    engine::EngineConfig,
    events::AudioActivityEvent,
    segmenter::{encode_pcm16_piece, Chunk, Segmenter, SegmenterConfig},
    vad::SilenceDetector,
};

/// Samples drained per iteration: 20 ms at 48 kHz. At the 16 kHz target
/// this still yields ~60 ms frames, well under the silence duration.
const DRAIN_FRAME: usize = 960;

/// Sleep when the ring is empty, so an idle microphone does not burn a core.
const SLEEP_EMPTY_MS: u64 = 5;

pub struct SessionStats {
    pub samples_in: AtomicUsize,
    pub samples_resampled: AtomicUsize,
    pub frames_assessed: AtomicUsize,
    pub frames_silent: AtomicUsize,
    pub chunks_cut: AtomicUsize,
    pub forced_cuts: AtomicUsize,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            samples_in: AtomicUsize::new(0),
            samples_resampled: AtomicUsize::new(0),
            frames_assessed: AtomicUsize::new(0),
            frames_silent: AtomicUsize::new(0),
            chunks_cut: AtomicUsize::new(0),
            forced_cuts: AtomicUsize::new(0),
        }
    }
}

impl SessionStats {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_resampled.store(0, Ordering::Relaxed);
        self.frames_assessed.store(0, Ordering::Relaxed);
        self.frames_silent.store(0, Ordering::Relaxed);
        self.chunks_cut.store(0, Ordering::Relaxed);
        self.forced_cuts.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_resampled: self.samples_resampled.load(Ordering::Relaxed),
            frames_assessed: self.frames_assessed.load(Ordering::Relaxed),
            frames_silent: self.frames_silent.load(Ordering::Relaxed),
            chunks_cut: self.chunks_cut.load(Ordering::Relaxed),
            forced_cuts: self.forced_cuts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub samples_in: usize,
    pub samples_resampled: usize,
    pub frames_assessed: usize,
    pub frames_silent: usize,
    pub chunks_cut: usize,
    pub forced_cuts: usize,
}

/// Everything the session loop needs, passed as one struct so the
/// spawn_blocking closure stays tidy.
pub struct SessionContext {
    pub config: EngineConfig,
    pub detector: Box<dyn SilenceDetector>,
    pub dispatcher: Arc<dyn ChunkDispatcher>,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    /// Set by `RelayEngine::force_flush`; serviced at the top of each tick.
    pub flush_requested: Arc<AtomicBool>,
    pub voice: Arc<Mutex<VoiceProfile>>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub capture_sample_rate: u32,
    pub stats: Arc<SessionStats>,
}

/// Run the blocking session loop until `ctx.running` becomes false.
pub fn run(mut ctx: SessionContext) {
    info!(
        capture_rate = ctx.capture_sample_rate,
        target_rate = ctx.config.target_sample_rate,
        "session started"
    );

    let mut adapter = match RateAdapter::new(
        ctx.capture_sample_rate,
        ctx.config.target_sample_rate,
        DRAIN_FRAME,
    ) {
        Ok(a) => a,
        Err(e) => {
            warn!(error = %e, "failed to create rate adapter — session aborted");
            ctx.running.store(false, Ordering::SeqCst);
            return;
        }
    };

    let mut segmenter = Segmenter::new(SegmenterConfig {
        silence_duration: ctx.config.silence_duration,
        max_pieces: ctx.config.max_chunk_pieces,
        spec: ctx.config.pcm_spec(),
    });

    // Scratch buffer, reused each iteration.
    let mut raw = vec![0f32; DRAIN_FRAME];
    let mut activity_seq = 0u64;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // A manual flush request wins over this tick's audio: it must cut
        // exactly what was buffered before the request.
        if ctx.flush_requested.swap(false, Ordering::SeqCst) {
            if let Some(chunk) = segmenter.force_flush() {
                ctx.stats.forced_cuts.fetch_add(1, Ordering::Relaxed);
                hand_off(&ctx, chunk);
            } else {
                debug!("force-flush requested with empty buffer — ignored");
            }
        }

        let n = ctx.consumer.pop_slice(&mut raw);

        if n == 0 {
            // No new audio, but an armed silence deadline may still elapse.
            if let Some(chunk) = segmenter.poll_deadline(Instant::now()) {
                hand_off(&ctx, chunk);
            }
            std::thread::sleep(std::time::Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        ctx.stats.samples_in.fetch_add(n, Ordering::Relaxed);

        let resampled = adapter.process(&raw[..n]);
        if resampled.is_empty() {
            // Partial block; the adapter is waiting for more input.
            continue;
        }
        ctx.stats
            .samples_resampled
            .fetch_add(resampled.len(), Ordering::Relaxed);

        let frame = AudioFrame::new(resampled, ctx.config.target_sample_rate);
        let verdict = ctx.detector.assess(&frame);

        ctx.stats.frames_assessed.fetch_add(1, Ordering::Relaxed);
        if verdict.is_silent {
            ctx.stats.frames_silent.fetch_add(1, Ordering::Relaxed);
        }

        let _ = ctx.activity_tx.send(AudioActivityEvent {
            seq: activity_seq,
            rms: verdict.rms,
            is_silent: verdict.is_silent,
        });
        activity_seq = activity_seq.saturating_add(1);

        if activity_seq % 50 == 0 {
            debug!(
                rms = format_args!("{:.4}", verdict.rms),
                is_silent = verdict.is_silent,
                buffered_pieces = segmenter.piece_count(),
                "audio level check"
            );
        }

        // A deadline that elapsed during the gap before this frame cuts
        // first, so the resumed speech opens the next chunk instead of
        // merging into the stale buffer.
        if let Some(chunk) = segmenter.poll_deadline(Instant::now()) {
            hand_off(&ctx, chunk);
        }

        // All audio is recorded; the verdict only drives the cut timer.
        segmenter.push_piece(encode_pcm16_piece(&frame.samples));

        if let Some(chunk) = segmenter.observe(verdict.is_silent, Instant::now()) {
            hand_off(&ctx, chunk);
        }
    }

    // Stop flushes whatever accumulated as the whole-recording chunk, so
    // speech is not lost when the user stops before trailing silence.
    if let Some(chunk) = segmenter.finish() {
        info!(
            chunk_seq = chunk.seq,
            pieces = chunk.piece_count(),
            "stop requested with buffered audio — cutting final chunk"
        );
        hand_off(&ctx, chunk);
    }

    let snap = ctx.stats.snapshot();
    info!(
        samples_in = snap.samples_in,
        samples_resampled = snap.samples_resampled,
        frames_assessed = snap.frames_assessed,
        frames_silent = snap.frames_silent,
        chunks_cut = snap.chunks_cut,
        forced_cuts = snap.forced_cuts,
        "session stopped — stats"
    );
}

/// Fire-and-forget: snapshot the current voice profile and hand the chunk
/// to the dispatcher. The session never waits on chunk processing.
fn hand_off(ctx: &SessionContext, chunk: Chunk) {
    ctx.stats.chunks_cut.fetch_add(1, Ordering::Relaxed);
    let voice = ctx.voice.lock().clone();
    info!(
        chunk_seq = chunk.seq,
        kind = ?chunk.kind,
        pieces = chunk.piece_count(),
        duration_secs = format_args!("{:.2}", chunk.duration_secs()),
        "chunk cut — dispatching"
    );
    ctx.dispatcher.dispatch(chunk, voice);
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Duration;

    use crate::buffering::{create_audio_ring, Producer};
    use crate::segmenter::ChunkKind;
    use crate::vad::FrameVerdict;

    /// Detector fed a script of verdicts; anything past the script is silent.
    struct ScriptedDetector {
        verdicts: Vec<bool>,
        idx: usize,
    }

    impl ScriptedDetector {
        fn new(verdicts: Vec<bool>) -> Self {
            Self { verdicts, idx: 0 }
        }
    }

    impl SilenceDetector for ScriptedDetector {
        fn assess(&mut self, _frame: &AudioFrame) -> FrameVerdict {
            let is_silent = self.verdicts.get(self.idx).copied().unwrap_or(true);
            self.idx += 1;
            FrameVerdict {
                rms: if is_silent { 0.0 } else { 0.5 },
                is_silent,
            }
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        chunks: Mutex<Vec<(Chunk, VoiceProfile)>>,
    }

    impl ChunkDispatcher for RecordingDispatcher {
        fn dispatch(&self, chunk: Chunk, voice: VoiceProfile) {
            self.chunks.lock().push((chunk, voice));
        }
    }

    fn base_config(silence_ms: u64) -> EngineConfig {
        EngineConfig {
            silence_duration: Duration::from_millis(silence_ms),
            ..EngineConfig::default()
        }
    }

    struct TestSession {
        producer: crate::buffering::AudioProducer,
        running: Arc<AtomicBool>,
        flush_requested: Arc<AtomicBool>,
        dispatcher: Arc<RecordingDispatcher>,
        handle: thread::JoinHandle<()>,
    }

    fn spawn_session(config: EngineConfig, verdicts: Vec<bool>) -> TestSession {
        let (producer, consumer) = create_audio_ring();
        let (activity_tx, _) = broadcast::channel(64);
        let running = Arc::new(AtomicBool::new(true));
        let flush_requested = Arc::new(AtomicBool::new(false));
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let ctx = SessionContext {
            config,
            detector: Box::new(ScriptedDetector::new(verdicts)),
            dispatcher: Arc::<RecordingDispatcher>::clone(&dispatcher),
            consumer,
            running: Arc::clone(&running),
            flush_requested: Arc::clone(&flush_requested),
            voice: Arc::new(Mutex::new(VoiceProfile::default())),
            activity_tx,
            capture_sample_rate: 16_000,
            stats: Arc::new(SessionStats::default()),
        };

        let handle = thread::spawn(move || run(ctx));
        TestSession {
            producer,
            running,
            flush_requested,
            dispatcher,
            handle,
        }
    }

    fn wait_for_chunks(dispatcher: &RecordingDispatcher, count: usize, timeout: Duration) {
        let start = Instant::now();
        while dispatcher.chunks.lock().len() < count {
            if start.elapsed() >= timeout {
                panic!(
                    "timed out waiting for {count} chunks, have {}",
                    dispatcher.chunks.lock().len()
                );
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn trailing_silence_cuts_an_interim_chunk() {
        let mut session = spawn_session(base_config(50), vec![false, false, true]);

        session.producer.push_slice(&vec![0.3; DRAIN_FRAME]);
        session.producer.push_slice(&vec![0.3; DRAIN_FRAME]);
        session.producer.push_slice(&vec![0.0; DRAIN_FRAME]);

        wait_for_chunks(&session.dispatcher, 1, Duration::from_secs(2));
        session.running.store(false, Ordering::SeqCst);
        session.handle.join().expect("session thread panicked");

        let chunks = session.dispatcher.chunks.lock();
        assert_eq!(chunks.len(), 1, "silence cut once, stop found nothing");
        let (chunk, voice) = &chunks[0];
        assert_eq!(chunk.seq, 1);
        assert_eq!(chunk.kind, ChunkKind::Interim);
        assert_eq!(chunk.piece_count(), 3);
        assert_eq!(voice.voice, "af_heart");
    }

    #[test]
    fn stop_with_buffered_audio_cuts_exactly_one_final_chunk() {
        let mut session = spawn_session(base_config(10_000), vec![false, false]);

        session.producer.push_slice(&vec![0.3; DRAIN_FRAME]);
        session.producer.push_slice(&vec![0.3; DRAIN_FRAME]);

        // Let the loop consume both frames, then stop mid-speech.
        thread::sleep(Duration::from_millis(60));
        session.running.store(false, Ordering::SeqCst);
        session.handle.join().expect("session thread panicked");

        let chunks = session.dispatcher.chunks.lock();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0.kind, ChunkKind::Final);
        assert_eq!(chunks[0].0.piece_count(), 2);
    }

    #[test]
    fn stop_with_empty_buffer_cuts_nothing() {
        let session = spawn_session(base_config(50), vec![]);

        thread::sleep(Duration::from_millis(30));
        session.running.store(false, Ordering::SeqCst);
        session.handle.join().expect("session thread panicked");

        assert!(session.dispatcher.chunks.lock().is_empty());
    }

    #[test]
    fn flush_request_is_serviced_without_waiting_for_silence() {
        let mut session = spawn_session(base_config(10_000), vec![false]);

        session.producer.push_slice(&vec![0.3; DRAIN_FRAME]);
        thread::sleep(Duration::from_millis(40));
        session.flush_requested.store(true, Ordering::SeqCst);

        wait_for_chunks(&session.dispatcher, 1, Duration::from_secs(2));
        session.running.store(false, Ordering::SeqCst);
        session.handle.join().expect("session thread panicked");

        let chunks = session.dispatcher.chunks.lock();
        assert_eq!(chunks.len(), 1, "manual cut only; stop found an empty buffer");
        assert_eq!(chunks[0].0.kind, ChunkKind::Interim);
    }

    #[test]
    fn deadline_fires_while_the_ring_is_empty() {
        // One audible frame, then one silent frame arms the deadline.
        // No further audio arrives; poll_deadline must still cut.
        let mut session = spawn_session(base_config(40), vec![false, true]);

        session.producer.push_slice(&vec![0.3; DRAIN_FRAME]);
        session.producer.push_slice(&vec![0.0; DRAIN_FRAME]);

        wait_for_chunks(&session.dispatcher, 1, Duration::from_secs(2));
        session.running.store(false, Ordering::SeqCst);
        session.handle.join().expect("session thread panicked");

        assert_eq!(session.dispatcher.chunks.lock().len(), 1);
    }

    #[test]
    fn consecutive_utterances_get_increasing_sequence_numbers() {
        let mut session = spawn_session(
            base_config(30),
            vec![false, true, false, true],
        );

        session.producer.push_slice(&vec![0.3; DRAIN_FRAME]);
        session.producer.push_slice(&vec![0.0; DRAIN_FRAME]);
        wait_for_chunks(&session.dispatcher, 1, Duration::from_secs(2));

        session.producer.push_slice(&vec![0.3; DRAIN_FRAME]);
        session.producer.push_slice(&vec![0.0; DRAIN_FRAME]);
        wait_for_chunks(&session.dispatcher, 2, Duration::from_secs(2));

        session.running.store(false, Ordering::SeqCst);
        session.handle.join().expect("session thread panicked");

        let chunks = session.dispatcher.chunks.lock();
        assert_eq!(chunks[0].0.seq, 1);
        assert_eq!(chunks[1].0.seq, 2);
    }
}
