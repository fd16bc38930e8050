//! Filters and dynamics used by the enhancement chain.

use std::f64::consts::PI;

use crate::analysis::{amplitude_to_db, db_to_amplitude};

use super::{CompressionSettings, EnhancementSettings};

/// Corner frequency of the bass shelf.
pub const BASS_CORNER_HZ: f64 = 250.0;
/// Centre frequency of the mid peaking band.
pub const MID_CENTER_HZ: f64 = 1_000.0;
pub const MID_Q: f64 = 1.0;
/// Corner frequency of the treble shelf.
pub const TREBLE_CORNER_HZ: f64 = 4_000.0;

/// Second order IIR section (transposed direct form II).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Default for Biquad {
    fn default() -> Self {
        Self::identity()
    }
}

impl Biquad {
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    pub fn low_shelf(sample_rate: u32, freq: f64, gain_db: f32) -> Self {
        let (a, cos, alpha) = shelf_terms(sample_rate, freq, gain_db);
        let sqrt_a = a.sqrt();
        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos + 2.0 * sqrt_a * alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
            a * ((a + 1.0) - (a - 1.0) * cos - 2.0 * sqrt_a * alpha),
            (a + 1.0) + (a - 1.0) * cos + 2.0 * sqrt_a * alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos),
            (a + 1.0) + (a - 1.0) * cos - 2.0 * sqrt_a * alpha,
        )
    }

    pub fn high_shelf(sample_rate: u32, freq: f64, gain_db: f32) -> Self {
        let (a, cos, alpha) = shelf_terms(sample_rate, freq, gain_db);
        let sqrt_a = a.sqrt();
        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos + 2.0 * sqrt_a * alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
            a * ((a + 1.0) + (a - 1.0) * cos - 2.0 * sqrt_a * alpha),
            (a + 1.0) - (a - 1.0) * cos + 2.0 * sqrt_a * alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos),
            (a + 1.0) - (a - 1.0) * cos - 2.0 * sqrt_a * alpha,
        )
    }

    pub fn peaking(sample_rate: u32, freq: f64, q: f64, gain_db: f32) -> Self {
        let a = 10f64.powf(gain_db as f64 / 40.0);
        let w0 = 2.0 * PI * clamp_freq(freq, sample_rate) / sample_rate as f64;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos,
            1.0 - alpha / a,
        )
    }

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: (b0 / a0) as f32,
            b1: (b1 / a0) as f32,
            b2: (b2 / a0) as f32,
            a1: (a1 / a0) as f32,
            a2: (a2 / a0) as f32,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Adopts the coefficients of `other` while keeping this filter's state,
    /// so parameter changes do not click.
    pub fn retune(&mut self, other: &Biquad) {
        self.b0 = other.b0;
        self.b1 = other.b1;
        self.b2 = other.b2;
        self.a1 = other.a1;
        self.a2 = other.a2;
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

fn clamp_freq(freq: f64, sample_rate: u32) -> f64 {
    freq.clamp(1.0, sample_rate as f64 * 0.45)
}

/// `(A, cos w0, alpha)` for a shelf with slope 1.
fn shelf_terms(sample_rate: u32, freq: f64, gain_db: f32) -> (f64, f64, f64) {
    let a = 10f64.powf(gain_db as f64 / 40.0);
    let w0 = 2.0 * PI * clamp_freq(freq, sample_rate) / sample_rate as f64;
    let alpha = w0.sin() / 2.0 * std::f64::consts::SQRT_2;
    (a, w0.cos(), alpha)
}

/// Feed-forward compressor with a soft knee. The detector is linked across
/// channels so the stereo image stays put.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    knee_db: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope_db: f32,
}

impl Compressor {
    pub fn new(sample_rate: u32, settings: &CompressionSettings) -> Self {
        let mut compressor = Self {
            threshold_db: 0.0,
            ratio: 1.0,
            knee_db: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope_db: 0.0,
        };
        compressor.configure(sample_rate, settings);
        compressor
    }

    /// Applies new settings without resetting the envelope.
    pub fn configure(&mut self, sample_rate: u32, settings: &CompressionSettings) {
        let effective = if settings.enabled {
            *settings
        } else {
            CompressionSettings::neutral()
        };
        self.threshold_db = effective.threshold_db;
        self.ratio = effective.ratio.max(1.0);
        self.knee_db = effective.knee_db.max(0.0);
        self.attack_coeff = time_coeff(effective.attack_ms, sample_rate);
        self.release_coeff = time_coeff(effective.release_ms, sample_rate);
    }

    /// Static gain curve: the output level for an input level, both in dB.
    pub fn output_level(&self, input_db: f32) -> f32 {
        let over = input_db - self.threshold_db;
        let slope = 1.0 / self.ratio - 1.0;
        if self.knee_db > 0.0 && 2.0 * over.abs() <= self.knee_db {
            let x = over + self.knee_db / 2.0;
            input_db + slope * x * x / (2.0 * self.knee_db)
        } else if over > 0.0 {
            self.threshold_db + over / self.ratio
        } else {
            input_db
        }
    }

    /// Smoothed gain (linear) for a frame whose loudest sample is `peak`.
    pub fn next_gain(&mut self, peak: f32) -> f32 {
        let level = amplitude_to_db(peak);
        let target = self.output_level(level) - level;
        let coeff = if target < self.envelope_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope_db = coeff * self.envelope_db + (1.0 - coeff) * target;
        db_to_amplitude(self.envelope_db)
    }

    pub fn reset(&mut self) {
        self.envelope_db = 0.0;
    }
}

fn time_coeff(ms: f32, sample_rate: u32) -> f32 {
    if ms <= 0.0 {
        return 0.0;
    }
    (-1.0 / (ms / 1000.0 * sample_rate as f32)).exp()
}

/// Per-channel EQ stages.
#[derive(Debug, Clone, Default)]
struct EqStages {
    bass: Biquad,
    mid: Biquad,
    treble: Biquad,
}

/// Stateful gain → EQ → compressor chain over interleaved frames.
#[derive(Debug, Clone)]
pub struct EnhancementChain {
    sample_rate: u32,
    gain: f32,
    stages: Vec<EqStages>,
    compressor: Compressor,
}

impl EnhancementChain {
    pub fn new(sample_rate: u32, channels: usize, settings: &EnhancementSettings) -> Self {
        let mut chain = Self {
            sample_rate,
            gain: 1.0,
            stages: vec![EqStages::default(); channels.max(1)],
            compressor: Compressor::new(sample_rate, &settings.compression),
        };
        chain.configure(settings);
        chain
    }

    pub fn channels(&self) -> usize {
        self.stages.len()
    }

    /// Retunes every stage in place; filter memory survives the change.
    pub fn configure(&mut self, settings: &EnhancementSettings) {
        self.gain = db_to_amplitude(settings.gain_db);
        let bass = Biquad::low_shelf(self.sample_rate, BASS_CORNER_HZ, settings.eq.bass_db);
        let mid = Biquad::peaking(self.sample_rate, MID_CENTER_HZ, MID_Q, settings.eq.mid_db);
        let treble = Biquad::high_shelf(self.sample_rate, TREBLE_CORNER_HZ, settings.eq.treble_db);
        for stage in &mut self.stages {
            stage.bass.retune(&bass);
            stage.mid.retune(&mid);
            stage.treble.retune(&treble);
        }
        self.compressor.configure(self.sample_rate, &settings.compression);
    }

    /// Processes one interleaved frame in place.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let mut peak = 0.0_f32;
        for (sample, stage) in frame.iter_mut().zip(self.stages.iter_mut()) {
            let x = *sample * self.gain;
            let y = stage.treble.process(stage.mid.process(stage.bass.process(x)));
            *sample = y;
            peak = peak.max(y.abs());
        }
        let gain = self.compressor.next_gain(peak);
        for sample in frame.iter_mut() {
            *sample *= gain;
        }
    }

    /// Processes an interleaved block in place.
    pub fn process_interleaved(&mut self, block: &mut [f32]) {
        let channels = self.channels();
        for frame in block.chunks_exact_mut(channels) {
            self.process_frame(frame);
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.bass.reset();
            stage.mid.reset();
            stage.treble.reset();
        }
        self.compressor.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Output over input RMS for a sine, measured after the filter settles.
    fn steady_state_gain(filter: &mut Biquad, sample_rate: u32, freq: f32) -> f32 {
        let frames = sample_rate as usize;
        let (mut input_energy, mut output_energy) = (0.0_f64, 0.0_f64);
        for i in 0..frames {
            let x = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin();
            let y = filter.process(x);
            if i > frames / 2 {
                input_energy += (x as f64).powi(2);
                output_energy += (y as f64).powi(2);
            }
        }
        (output_energy / input_energy).sqrt() as f32
    }

    #[test]
    fn flat_filters_are_transparent() {
        let mut filter = Biquad::low_shelf(48_000, BASS_CORNER_HZ, 0.0);
        for x in [0.5_f32, -0.25, 0.75] {
            assert!((filter.process(x) - x).abs() < 1e-6);
        }
    }

    #[test]
    fn bass_shelf_boosts_low_frequencies_only() {
        let mut low = Biquad::low_shelf(48_000, BASS_CORNER_HZ, 6.0);
        let mut high = Biquad::low_shelf(48_000, BASS_CORNER_HZ, 6.0);
        let low_gain = steady_state_gain(&mut low, 48_000, 20.0);
        let high_gain = steady_state_gain(&mut high, 48_000, 8_000.0);
        assert!((amplitude_to_db(low_gain) - 6.0).abs() < 0.5);
        assert!(amplitude_to_db(high_gain).abs() < 0.5);
    }

    #[test]
    fn gain_is_measured_independently_of_sample_alignment() {
        // Six samples per cycle: the sampled peak never reaches the true peak.
        let mut identity = Biquad::identity();
        let gain = steady_state_gain(&mut identity, 48_000, 8_000.0);
        assert!(amplitude_to_db(gain).abs() < 0.01);
    }

    #[test]
    fn treble_shelf_cuts_high_frequencies() {
        let mut filter = Biquad::high_shelf(48_000, TREBLE_CORNER_HZ, -6.0);
        let gain = steady_state_gain(&mut filter, 48_000, 15_000.0);
        assert!((amplitude_to_db(gain) + 6.0).abs() < 0.5);
    }

    #[test]
    fn neutral_compressor_passes_levels_through() {
        let compressor = Compressor::new(48_000, &CompressionSettings::neutral());
        for level in [-60.0, -12.0, 0.0] {
            assert!((compressor.output_level(level) - level).abs() < 1e-6);
        }
    }

    #[test]
    fn hard_knee_compression_follows_the_ratio() {
        let settings = CompressionSettings {
            enabled: true,
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 0.0,
            release_ms: 0.0,
            knee_db: 0.0,
        };
        let mut compressor = Compressor::new(48_000, &settings);
        assert!((compressor.output_level(-4.0) - -16.0).abs() < 1e-4);
        assert!((compressor.output_level(-30.0) - -30.0).abs() < 1e-4);

        // Instant attack: the gain lands on the static curve immediately.
        let gain = compressor.next_gain(db_to_amplitude(-4.0));
        assert!((amplitude_to_db(gain) - -12.0).abs() < 1e-3);
    }

    #[test]
    fn soft_knee_is_continuous() {
        let settings = CompressionSettings {
            enabled: true,
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 100.0,
            knee_db: 10.0,
        };
        let compressor = Compressor::new(48_000, &settings);
        let below = compressor.output_level(-25.0 - 1e-3);
        let at_lower_edge = compressor.output_level(-25.0);
        let at_upper_edge = compressor.output_level(-15.0);
        let above = compressor.output_level(-15.0 + 1e-3);
        assert!((below - at_lower_edge).abs() < 1e-2);
        assert!((above - at_upper_edge).abs() < 1e-2);
    }
}
