//! RMS-threshold silence detection.
//!
//! `rms = sqrt(mean(sample_i^2))` over the frame, compared against a
//! configured threshold. A frame is silent iff `rms < threshold`.

use super::{FrameVerdict, SilenceDetector};
use crate::buffering::frame::AudioFrame;

/// Pure RMS-threshold detector.
///
/// The right threshold is microphone- and environment-dependent:
/// observed working values are 0.01 (quiet desktop mic) to 0.02
/// (noisier rooms). It is configuration, not a constant.
#[derive(Debug, Clone)]
pub struct RmsDetector {
    /// RMS level below which a frame counts as silent.
    threshold: f32,
}

impl RmsDetector {
    /// Default silence threshold.
    pub const DEFAULT_THRESHOLD: f32 = 0.01;

    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Compute the root-mean-square of a sample slice.
    ///
    /// Empty slices report 0.0, which always classifies as silent.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for RmsDetector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl SilenceDetector for RmsDetector {
    fn assess(&mut self, frame: &AudioFrame) -> FrameVerdict {
        let rms = Self::rms(&frame.samples);
        FrameVerdict {
            rms,
            is_silent: rms < self.threshold,
        }
    }
}
