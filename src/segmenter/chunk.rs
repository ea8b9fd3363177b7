//! Flushed, dispatch-ready audio units.
//!
//! A `Chunk` is the immutable snapshot the segmenter produces at flush
//! time. Ownership moves to the dispatcher on creation; the segmenter
//! never reads it again.

use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{RelayError, Result};

/// Encoding of buffered pieces, declared by the capture side.
///
/// Pieces are raw little-endian PCM blocks; this is what lets a chunk
/// assemble a valid container around bytes it otherwise treats as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for PcmSpec {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl PcmSpec {
    fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels)
    }
}

/// Distinguishes silence-triggered interim flushes from the stop-time
/// whole-recording flush, which may use a different container framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Cut mid-session by the silence timer or the max-size valve.
    Interim,
    /// The final forced flush when the session stops.
    Final,
}

/// One flushed unit of accumulated audio.
///
/// Sequence numbers start at 1 and increase without gaps within a
/// session (the counter resets when a new session starts).
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Per-session sequence number, starting at 1.
    pub seq: u64,
    /// Wall-clock flush time.
    pub created_at: SystemTime,
    pub kind: ChunkKind,
    pieces: Vec<Vec<u8>>,
    spec: PcmSpec,
}

impl Chunk {
    pub(crate) fn new(
        seq: u64,
        kind: ChunkKind,
        pieces: Vec<Vec<u8>>,
        spec: PcmSpec,
    ) -> Self {
        Self {
            seq,
            created_at: SystemTime::now(),
            kind,
            pieces,
            spec,
        }
    }

    /// Number of buffer pieces captured in this chunk.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Total payload size in bytes, excluding container framing.
    pub fn byte_len(&self) -> usize {
        self.pieces.iter().map(Vec::len).sum()
    }

    /// Audio duration represented by the buffered pieces.
    pub fn duration_secs(&self) -> f64 {
        let per_sample = self.spec.bytes_per_sample();
        if per_sample == 0 {
            return 0.0;
        }
        (self.byte_len() / per_sample) as f64 / f64::from(self.spec.sample_rate)
    }

    /// MIME type of the assembled container.
    pub fn mime_type(&self) -> &'static str {
        "audio/wav"
    }

    /// Upload file name: `chunk_{seq}_{epoch_millis}.wav`.
    pub fn file_name(&self) -> String {
        let millis = self
            .created_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("chunk_{}_{}.wav", self.seq, millis)
    }

    /// Assemble the pieces into an in-memory WAV container.
    ///
    /// # Errors
    /// Returns `RelayError::ChunkEncode` if the container cannot be
    /// written (e.g. a truncated trailing piece).
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.spec.channels,
            sample_rate: self.spec.sample_rate,
            bits_per_sample: self.spec.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.byte_len()));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| RelayError::ChunkEncode(e.to_string()))?;
            for piece in &self.pieces {
                if piece.len() % 2 != 0 {
                    return Err(RelayError::ChunkEncode(format!(
                        "piece of {} bytes is not a whole number of 16-bit samples",
                        piece.len()
                    )));
                }
                for bytes in piece.chunks_exact(2) {
                    let sample = i16::from_le_bytes([bytes[0], bytes[1]]);
                    writer
                        .write_sample(sample)
                        .map_err(|e| RelayError::ChunkEncode(e.to_string()))?;
                }
            }
            writer
                .finalize()
                .map_err(|e| RelayError::ChunkEncode(e.to_string()))?;
        }
        Ok(cursor.into_inner())
    }
}

/// Encode normalized f32 samples into one 16-bit little-endian PCM piece.
pub fn encode_pcm16_piece(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let pcm = (clamped * 32767.0) as i16;
        bytes.extend_from_slice(&pcm.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_container_has_riff_header_and_payload() {
        let pieces = vec![
            encode_pcm16_piece(&[0.0, 0.5, -0.5]),
            encode_pcm16_piece(&[1.0, -1.0]),
        ];
        let chunk = Chunk::new(1, ChunkKind::Interim, pieces, PcmSpec::default());

        assert_eq!(chunk.piece_count(), 2);
        assert_eq!(chunk.byte_len(), 10);

        let wav = chunk.to_wav().expect("wav assembly");
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte canonical header + 5 samples * 2 bytes
        assert_eq!(wav.len(), 44 + 10);
    }

    #[test]
    fn truncated_piece_is_an_encode_error() {
        let chunk = Chunk::new(1, ChunkKind::Interim, vec![vec![0u8; 3]], PcmSpec::default());
        let err = chunk.to_wav().unwrap_err();
        assert!(matches!(err, RelayError::ChunkEncode(_)));
    }

    #[test]
    fn file_name_embeds_sequence_number() {
        let chunk = Chunk::new(42, ChunkKind::Final, vec![vec![0u8; 2]], PcmSpec::default());
        let name = chunk.file_name();
        assert!(name.starts_with("chunk_42_"), "{name}");
        assert!(name.ends_with(".wav"), "{name}");
    }

    #[test]
    fn duration_counts_samples_at_the_declared_rate() {
        // 16 000 samples at 16 kHz = 1 second.
        let piece = vec![0u8; 32_000];
        let chunk = Chunk::new(1, ChunkKind::Interim, vec![piece], PcmSpec::default());
        assert!((chunk.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pcm16_encoding_clamps_out_of_range_samples() {
        let bytes = encode_pcm16_piece(&[2.0, -2.0]);
        assert_eq!(
            bytes,
            [
                i16::to_le_bytes(32767)[0],
                i16::to_le_bytes(32767)[1],
                i16::to_le_bytes(-32767)[0],
                i16::to_le_bytes(-32767)[1],
            ]
        );
    }
}
