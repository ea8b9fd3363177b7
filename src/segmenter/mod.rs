//! Silence-debounced segmentation state machine.
//!
//! ## States
//!
//! ```text
//! ACCUMULATING ──silent & non-empty──► TRAILING_SILENCE (deadline armed)
//!      ▲  ▲                                   │
//!      │  └────────sound resumes──────────────┘   (deadline cancelled)
//!      │
//!      └──────deadline elapses / max-size / force / stop──► flush
//! ```
//!
//! The deadline is a plain `Option<Instant>`, so "at most one pending
//! flush timer" holds by construction, and re-arming while a silence run
//! persists is impossible (the debounce). A non-silent verdict cancels a
//! deadline that has not yet elapsed; once it has elapsed the flush
//! fires on the next tick no matter what that tick hears — only a stop
//! outranks it. The next silence run must last the full configured
//! duration before another flush fires.
//!
//! All operations take `now` explicitly, which keeps the machine
//! synchronous and unit-testable without sleeping. The session loop
//! owns the only `Segmenter` instance, so snapshot-and-clear is atomic
//! with respect to piece appends.

pub mod chunk;

pub use chunk::{encode_pcm16_piece, Chunk, ChunkKind, PcmSpec};

use std::time::{Duration, Instant};

use tracing::debug;

/// Tunables for one segmentation session.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// How long an uninterrupted silence run must last before the buffer
    /// is cut. Observed working values: 800 ms and 1500 ms.
    pub silence_duration: Duration,
    /// Piece-count bound that forces a cut even without silence.
    /// Guarantees progress under continuous speech; `None` disables it.
    pub max_pieces: Option<usize>,
    /// Encoding the capture side declared for buffered pieces.
    pub spec: PcmSpec,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_duration: Duration::from_millis(800),
            max_pieces: Some(500),
            spec: PcmSpec::default(),
        }
    }
}

/// The segmentation engine core.
///
/// Constructed when a session starts and discarded when it stops.
/// Sequence numbers restart at 1 for every session.
pub struct Segmenter {
    config: SegmenterConfig,
    pieces: Vec<Vec<u8>>,
    /// Armed silence deadline; `None` while accumulating.
    deadline: Option<Instant>,
    next_seq: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            pieces: Vec::new(),
            deadline: None,
            next_seq: 1,
        }
    }

    /// Append one captured piece to the recording buffer.
    pub fn push_piece(&mut self, bytes: Vec<u8>) {
        self.pieces.push(bytes);
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// One tick of the segmentation loop.
    ///
    /// Evaluation order: the max-size valve wins over everything, then
    /// an already-elapsed deadline fires regardless of the verdict
    /// (once the silence run has lasted the full duration, only a stop
    /// outranks the cut), then the deadline is armed or cancelled by
    /// the verdict.
    pub fn observe(&mut self, is_silent: bool, now: Instant) -> Option<Chunk> {
        if let Some(max) = self.config.max_pieces {
            if self.pieces.len() >= max {
                debug!(pieces = self.pieces.len(), max, "max-size flush");
                return self.flush(ChunkKind::Interim);
            }
        }

        if let Some(deadline) = self.deadline {
            if now >= deadline {
                debug!(pieces = self.pieces.len(), "silence deadline elapsed");
                return self.flush(ChunkKind::Interim);
            }
        }

        if is_silent && !self.pieces.is_empty() {
            if self.deadline.is_none() {
                self.deadline = Some(now + self.config.silence_duration);
                debug!(
                    pieces = self.pieces.len(),
                    silence_ms = self.config.silence_duration.as_millis() as u64,
                    "silence run started — deadline armed"
                );
            }
            None
        } else {
            if self.deadline.take().is_some() {
                debug!("sound resumed — deadline cancelled");
            }
            None
        }
    }

    /// Deadline-only check, for loop iterations that saw no new audio.
    pub fn poll_deadline(&mut self, now: Instant) -> Option<Chunk> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush(ChunkKind::Interim),
            _ => None,
        }
    }

    /// Manual flush trigger. Cancels any armed deadline so the flush
    /// cannot be followed by a second one from the same silence run.
    pub fn force_flush(&mut self) -> Option<Chunk> {
        self.deadline = None;
        self.flush(ChunkKind::Interim)
    }

    /// Stop-time flush of whatever accumulated, as a whole-recording
    /// (`Final`) chunk. The segmenter is not reusable afterwards in
    /// practice — sessions construct a fresh one.
    pub fn finish(&mut self) -> Option<Chunk> {
        self.deadline = None;
        self.flush(ChunkKind::Final)
    }

    /// Snapshot-and-clear. Empty buffers never produce a chunk.
    fn flush(&mut self, kind: ChunkKind) -> Option<Chunk> {
        if self.pieces.is_empty() {
            return None;
        }
        self.deadline = None;
        let seq = self.next_seq;
        self.next_seq += 1;
        let pieces = std::mem::take(&mut self.pieces);
        Some(Chunk::new(seq, kind, pieces, self.config.spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(silence_ms: u64, max_pieces: Option<usize>) -> SegmenterConfig {
        SegmenterConfig {
            silence_duration: Duration::from_millis(silence_ms),
            max_pieces,
            spec: PcmSpec::default(),
        }
    }

    fn piece() -> Vec<u8> {
        vec![0u8; 4]
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn sustained_silence_flushes_exactly_once_with_all_pieces() {
        let mut seg = Segmenter::new(config(800, None));
        let t0 = Instant::now();

        for _ in 0..3 {
            seg.push_piece(piece());
        }

        assert!(seg.observe(true, t0).is_none(), "arming tick must not flush");
        assert!(seg.is_timer_armed());
        assert!(seg.observe(true, at(t0, 400)).is_none());

        let chunk = seg.observe(true, at(t0, 800)).expect("deadline flush");
        assert_eq!(chunk.piece_count(), 3);
        assert_eq!(chunk.seq, 1);
        assert_eq!(chunk.kind, ChunkKind::Interim);
        assert_eq!(seg.piece_count(), 0, "buffer must be empty after flush");

        // Continued silence with an empty buffer neither arms nor flushes.
        assert!(seg.observe(true, at(t0, 900)).is_none());
        assert!(!seg.is_timer_armed());
    }

    #[test]
    fn sound_resumption_cancels_and_requires_a_fresh_silence_run() {
        let mut seg = Segmenter::new(config(800, None));
        let t0 = Instant::now();
        seg.push_piece(piece());

        assert!(seg.observe(true, t0).is_none()); // armed
        assert!(seg.observe(true, at(t0, 400)).is_none());
        assert!(seg.observe(false, at(t0, 450)).is_none()); // cancelled
        assert!(!seg.is_timer_armed());

        // Half the duration has passed; a cancelled run does not count.
        assert!(seg.observe(true, at(t0, 500)).is_none()); // re-armed fresh
        assert!(seg.observe(true, at(t0, 1200)).is_none()); // 700 ms in
        let chunk = seg.observe(true, at(t0, 1300)).expect("one flush");
        assert_eq!(chunk.seq, 1);

        // Exactly one — nothing further pending.
        assert!(seg.poll_deadline(at(t0, 5000)).is_none());
    }

    #[test]
    fn armed_deadline_is_never_rearmed_within_one_silence_run() {
        let mut seg = Segmenter::new(config(800, None));
        let t0 = Instant::now();
        seg.push_piece(piece());

        assert!(seg.observe(true, t0).is_none());
        // Many more silent ticks must not push the deadline out.
        for ms in [100, 300, 500, 700] {
            assert!(seg.observe(true, at(t0, ms)).is_none());
        }
        assert!(seg.observe(true, at(t0, 800)).is_some());
    }

    #[test]
    fn max_size_valve_flushes_without_any_silence() {
        let mut seg = Segmenter::new(config(800, Some(5)));
        let t0 = Instant::now();

        let mut flushed = Vec::new();
        for i in 0..5 {
            seg.push_piece(piece());
            if let Some(chunk) = seg.observe(false, at(t0, i * 20)) {
                flushed.push(chunk);
            }
        }

        assert_eq!(flushed.len(), 1, "exactly one flush at the bound");
        assert_eq!(flushed[0].piece_count(), 5);
        assert_eq!(seg.piece_count(), 0);
    }

    #[test]
    fn max_size_valve_wins_over_an_armed_deadline() {
        let mut seg = Segmenter::new(config(10_000, Some(3)));
        let t0 = Instant::now();

        seg.push_piece(piece());
        assert!(seg.observe(true, t0).is_none()); // deadline armed, far away
        seg.push_piece(piece());
        seg.push_piece(piece());

        let chunk = seg.observe(true, at(t0, 50)).expect("bound flush");
        assert_eq!(chunk.piece_count(), 3);
        assert!(!seg.is_timer_armed(), "flush must clear the deadline");
    }

    #[test]
    fn finish_flushes_a_final_chunk_iff_non_empty() {
        let mut seg = Segmenter::new(config(800, None));
        seg.push_piece(piece());
        seg.push_piece(piece());

        let chunk = seg.finish().expect("final flush");
        assert_eq!(chunk.kind, ChunkKind::Final);
        assert_eq!(chunk.piece_count(), 2);

        assert!(seg.finish().is_none(), "empty buffer never flushes");
    }

    #[test]
    fn force_flush_cancels_the_pending_deadline() {
        let mut seg = Segmenter::new(config(800, None));
        let t0 = Instant::now();
        seg.push_piece(piece());

        assert!(seg.observe(true, t0).is_none()); // armed
        let chunk = seg.force_flush().expect("manual flush");
        assert_eq!(chunk.seq, 1);
        assert!(!seg.is_timer_armed());

        // The old deadline elapsing must not produce a second flush.
        assert!(seg.poll_deadline(at(t0, 900)).is_none());

        // New audio plus the same silence run needs a full fresh duration.
        seg.push_piece(piece());
        assert!(seg.observe(true, at(t0, 850)).is_none()); // re-armed
        assert!(seg.observe(true, at(t0, 1600)).is_none());
        assert!(seg.observe(true, at(t0, 1650)).is_some());
    }

    #[test]
    fn force_flush_on_empty_buffer_is_a_no_op() {
        let mut seg = Segmenter::new(config(800, None));
        assert!(seg.force_flush().is_none());
    }

    #[test]
    fn silence_with_empty_buffer_never_arms() {
        let mut seg = Segmenter::new(config(800, None));
        let t0 = Instant::now();
        for ms in 0..5 {
            assert!(seg.observe(true, at(t0, ms * 100)).is_none());
            assert!(!seg.is_timer_armed());
        }
    }

    #[test]
    fn elapsed_deadline_flushes_even_when_sound_resumes_on_that_tick() {
        let mut seg = Segmenter::new(config(800, None));
        let t0 = Instant::now();
        seg.push_piece(piece());

        assert!(seg.observe(true, t0).is_none()); // armed

        // The first tick past the deadline hears sound again. The cut
        // still fires — the full silence run already happened.
        let chunk = seg
            .observe(false, at(t0, 900))
            .expect("elapsed deadline must not be cancelled by sound");
        assert_eq!(chunk.piece_count(), 1);
        assert!(!seg.is_timer_armed());
        assert_eq!(seg.piece_count(), 0, "the new utterance starts empty");
    }

    #[test]
    fn unelapsed_deadline_is_still_cancelled_by_sound() {
        let mut seg = Segmenter::new(config(800, None));
        let t0 = Instant::now();
        seg.push_piece(piece());

        assert!(seg.observe(true, t0).is_none()); // armed
        assert!(seg.observe(false, at(t0, 700)).is_none()); // cancelled
        assert!(!seg.is_timer_armed());
        assert_eq!(seg.piece_count(), 1, "cancellation keeps the buffer");
    }

    #[test]
    fn poll_deadline_fires_without_a_new_verdict() {
        let mut seg = Segmenter::new(config(800, None));
        let t0 = Instant::now();
        seg.push_piece(piece());
        assert!(seg.observe(true, t0).is_none());

        assert!(seg.poll_deadline(at(t0, 700)).is_none());
        let chunk = seg.poll_deadline(at(t0, 800)).expect("deadline flush");
        assert_eq!(chunk.piece_count(), 1);
    }

    #[test]
    fn sequence_numbers_are_strictly_increasing_without_gaps() {
        let mut seg = Segmenter::new(config(100, None));
        let t0 = Instant::now();

        let mut seqs = Vec::new();
        for round in 0u64..4 {
            seg.push_piece(piece());
            let base = at(t0, round * 1000);
            assert!(seg.observe(true, base).is_none());
            seqs.push(seg.observe(true, base + Duration::from_millis(100)).unwrap().seq);
        }

        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    // The worked example from the observed sessions: threshold 0.02 /
    // 1500 ms variant. Verdicts arrive pre-computed here; the detector
    // half of that example lives in the vad tests.
    #[test]
    fn three_then_five_piece_utterances_get_seq_one_and_two() {
        let mut seg = Segmenter::new(config(1500, None));
        let t0 = Instant::now();

        for _ in 0..3 {
            seg.push_piece(piece());
        }
        assert!(seg.observe(true, t0).is_none());
        let first = seg.observe(true, at(t0, 1500)).expect("first utterance");
        assert_eq!((first.seq, first.piece_count()), (1, 3));

        for _ in 0..5 {
            seg.push_piece(piece());
        }
        assert!(seg.observe(true, at(t0, 2000)).is_none());
        let second = seg.observe(true, at(t0, 3500)).expect("second utterance");
        assert_eq!((second.seq, second.piece_count()), (2, 5));
    }
}
