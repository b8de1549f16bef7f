//! VU meter: instantaneous playback amplitude for the shell to display.
//!
//! While a clip plays, the meter runs a 256-point FFT over the most recent
//! samples behind the play head, averages the magnitude bins, and exposes a
//! width in `[0, 100]`. The analysis runs on the engine tick and never blocks
//! playback.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Analyser window size in samples.
pub const FFT_SIZE: usize = 256;

/// Mean-amplitude meter over an FFT window.
pub struct VuMeter {
    fft: Arc<dyn Fft<f32>>,
    width: f32,
}

impl Default for VuMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl VuMeter {
    #[must_use]
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(FFT_SIZE),
            width: 0.0,
        }
    }

    /// Feed the analyser with the samples currently behind the play head.
    ///
    /// Short windows are zero-padded; an empty window drops the meter to 0.
    pub fn update(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            self.width = 0.0;
            return;
        }

        let mut buffer: Vec<Complex<f32>> = samples
            .iter()
            .rev()
            .take(FFT_SIZE)
            .rev()
            .map(|&s| Complex::new(s, 0.0))
            .collect();
        buffer.resize(FFT_SIZE, Complex::new(0.0, 0.0));
        self.fft.process(&mut buffer);

        // Mean magnitude over the positive-frequency bins, normalized so a
        // full-scale tone maps near 100.
        let half = FFT_SIZE / 2;
        let mean: f32 = buffer[..half]
            .iter()
            .map(|c| c.norm() / half as f32)
            .sum::<f32>()
            / half as f32;
        self.width = (mean * 400.0).clamp(0.0, 100.0);
    }

    /// Reset the meter to silence.
    pub fn reset(&mut self) {
        self.width = 0.0;
    }

    /// Current meter width in `[0, 100]`.
    #[must_use]
    pub fn width(&self) -> f32 {
        self.width
    }
}
