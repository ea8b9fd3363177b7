//! Silence detection abstraction.
//!
//! The `SilenceDetector` trait is the extensibility point: swap in
//! `RmsDetector` (default) or any future level/model-based detector
//! without touching the segmentation engine.

pub mod rms;

pub use rms::RmsDetector;

use crate::buffering::frame::AudioFrame;

/// Per-frame detector output.
///
/// `rms` is reported alongside the verdict so consumers can drive level
/// meters from the same evaluation (see `AudioActivityEvent`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameVerdict {
    /// Root-mean-square level of the frame in [0.0, 1.0].
    pub rms: f32,
    /// Whether the frame fell below the silence threshold.
    pub is_silent: bool,
}

/// Trait for all silence-detector implementations.
///
/// `&mut self` allows stateful implementations (smoothing windows,
/// hidden states); `RmsDetector` itself is a pure function of the frame.
pub trait SilenceDetector: Send + 'static {
    /// Analyse one frame and return its loudness verdict.
    ///
    /// Samples must already be normalized to [-1.0, 1.0] around a zero
    /// reference; the capture layer rescales i16/u8 formats before they
    /// reach the ring buffer.
    fn assess(&mut self, frame: &AudioFrame) -> FrameVerdict;

    /// Reset any internal state between sessions.
    fn reset(&mut self) {}
}
