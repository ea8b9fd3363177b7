//! Sample-rate adaptation between the capture device and the chunk
//! encoding rate.
//!
//! Capture devices commonly run at 44.1 or 48 kHz while chunks are
//! encoded at 16 kHz mono. `RateAdapter` bridges the two on the session
//! thread, where allocation is allowed, using a rubato `FastFixedIn`
//! resampler. When the rates already match no rubato session is created
//! and `process` hands input straight through.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::warn;

use crate::error::{RelayError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateAdapter {
    /// `None` in passthrough mode (rates already match).
    inner: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls until a full block accumulates.
    pending: Vec<f32>,
    /// Input samples rubato consumes per call.
    block: usize,
    /// Pre-allocated rubato output: `[1][output_frames_max]`.
    scratch: Vec<Vec<f32>>,
}

impl RateAdapter {
    /// # Errors
    /// `RelayError::AudioDevice` when rubato rejects the rate pair.
    pub fn new(capture_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            block,
            1, // mono
        )
        .map_err(|e| RelayError::AudioDevice(format!("resampler init: {e}")))?;

        let scratch = vec![vec![0f32; inner.output_frames_max()]; 1];

        tracing::info!(capture_rate, target_rate, block, "rate adaptation enabled");

        Ok(Self {
            inner: Some(inner),
            pending: Vec::new(),
            block,
            scratch,
        })
    }

    /// Feed captured samples; returns converted output, possibly empty
    /// while a full input block is still accumulating.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut inner) = self.inner else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= self.block {
            let input = &self.pending[..self.block];
            match inner.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_consumed, produced)) => {
                    out.extend_from_slice(&self.scratch[0][..produced]);
                }
                Err(e) => {
                    warn!(error = %e, "resampler process error — block dropped");
                }
            }
            self.pending.drain(..self.block);
        }
        out
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}
