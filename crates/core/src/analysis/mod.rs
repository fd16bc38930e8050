use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{PcmBuffer, Result, StudioError};

/// Level reported for digital silence.
pub const SILENCE_FLOOR_DB: f32 = -120.0;

/// Summary of a whole buffer, as printed by `inspect`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LevelSummary {
    pub sample_rate: u32,
    pub channels: usize,
    pub duration_seconds: f64,
    pub peak_db: f32,
    pub rms_db: f32,
    /// Mean normalised spectral centroid over all non-silent windows.
    pub mean_centroid: f32,
    pub windows: usize,
}

/// Features of one analysis window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LevelFrame {
    /// Window start in seconds.
    pub start: f64,
    /// Window end in seconds (exclusive).
    pub end: f64,
    pub rms: f32,
    pub rms_db: f32,
    pub peak_db: f32,
    /// Normalised [0, 1] spectral centroid where 1.0 corresponds to the
    /// Nyquist frequency. Zero unless spectral analysis is enabled.
    pub spectral_centroid: f32,
}

/// Windowed level meter over a mono mixdown of a buffer.
///
/// The meter is synchronous and stateless between calls apart from the
/// cached FFT plan, so identical input always yields identical frames.
pub struct LevelAnalyzer {
    window_ms: f64,
    spectral: bool,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl LevelAnalyzer {
    /// Creates a meter with the given window length in milliseconds.
    pub fn new(window_ms: f64) -> Self {
        Self {
            window_ms,
            spectral: false,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Enables the spectral centroid feature.
    pub fn with_spectrum(mut self, enabled: bool) -> Self {
        self.spectral = enabled;
        self
    }

    pub fn window_ms(&self) -> f64 {
        self.window_ms
    }

    /// Number of frames per window at `sample_rate`; never zero.
    pub fn window_frames(&self, sample_rate: u32) -> usize {
        ((self.window_ms / 1000.0 * sample_rate as f64).round() as usize).max(1)
    }

    /// Splits the buffer into consecutive windows and measures each one. The
    /// final window may be shorter than the others.
    pub fn analyze(&mut self, buffer: &PcmBuffer) -> Result<Vec<LevelFrame>> {
        if !(self.window_ms > 0.0) {
            return Err(StudioError::invalid("analysis window must be positive"));
        }
        if buffer.is_empty() {
            return Ok(Vec::new());
        }

        let mono = buffer.mixdown_mono();
        let window = self.window_frames(buffer.sample_rate());
        let sample_rate = buffer.sample_rate();
        let mut frames = Vec::with_capacity(mono.len() / window + 1);

        for (index, block) in mono.chunks(window).enumerate() {
            let start_frame = index * window;
            let rms = compute_rms(block);
            let peak = block.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
            let spectral_centroid = if self.spectral && rms > 0.0 {
                self.compute_spectral_centroid(block, sample_rate)?
            } else {
                0.0
            };

            frames.push(LevelFrame {
                start: buffer.frames_to_secs(start_frame),
                end: buffer.frames_to_secs(start_frame + block.len()),
                rms,
                rms_db: amplitude_to_db(rms),
                peak_db: amplitude_to_db(peak),
                spectral_centroid,
            });
        }

        Ok(frames)
    }

    /// Measures the whole buffer and condenses the windows into a summary.
    pub fn summarize(&mut self, buffer: &PcmBuffer) -> Result<LevelSummary> {
        let frames = self.analyze(buffer)?;
        let mono = buffer.mixdown_mono();
        let peak = mono.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        let rms = if mono.is_empty() { 0.0 } else { compute_rms(&mono) };

        let voiced: Vec<f32> = frames
            .iter()
            .filter(|frame| frame.rms > 0.0)
            .map(|frame| frame.spectral_centroid)
            .collect();
        let mean_centroid = if voiced.is_empty() {
            0.0
        } else {
            voiced.iter().sum::<f32>() / voiced.len() as f32
        };

        Ok(LevelSummary {
            sample_rate: buffer.sample_rate(),
            channels: buffer.channel_count(),
            duration_seconds: buffer.duration_seconds(),
            peak_db: amplitude_to_db(peak),
            rms_db: amplitude_to_db(rms),
            mean_centroid,
            windows: frames.len(),
        })
    }

    fn compute_spectral_centroid(&mut self, samples: &[f32], sample_rate: u32) -> Result<f32> {
        let len = samples.len();
        if len < 2 {
            return Ok(0.0);
        }
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|e| StudioError::msg(format!("spectrum analysis failed: {e}")))?;

        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let bin_hz = sample_rate as f32 / len as f32;

        for (i, bin) in fft.spectrum.iter().enumerate() {
            let magnitude = bin.norm();
            magnitude_sum += magnitude;
            weighted_sum += magnitude * (i as f32 * bin_hz);
        }

        let nyquist = sample_rate as f32 * 0.5;
        if magnitude_sum <= f32::EPSILON || nyquist <= 0.0 {
            Ok(0.0)
        } else {
            Ok((weighted_sum / magnitude_sum / nyquist).clamp(0.0, 1.0))
        }
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        if self.fft.as_ref().is_some_and(|fft| fft.size != size) {
            self.fft = None;
        }
        let planner = &mut self.fft_planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            }
        })
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for LevelAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelAnalyzer")
            .field("window_ms", &self.window_ms)
            .field("spectral", &self.spectral)
            .field("fft_size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

/// Converts a linear amplitude to dBFS, floored at [`SILENCE_FLOOR_DB`].
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        return SILENCE_FLOOR_DB;
    }
    (20.0 * amplitude.log10()).max(SILENCE_FLOOR_DB)
}

pub fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
