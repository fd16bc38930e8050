//! Gain, three-band EQ and compression, offline or live.

pub mod dsp;
pub mod graph;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{PcmBuffer, Result, StudioError};

pub use dsp::{Biquad, Compressor, EnhancementChain};
pub use graph::{GraphState, PreviewGraph};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EqSettings {
    pub bass_db: f32,
    pub mid_db: f32,
    pub treble_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub knee_db: f32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -24.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 250.0,
            knee_db: 6.0,
        }
    }
}

impl CompressionSettings {
    /// Settings that leave every level untouched: 0 dB threshold at 1:1.
    pub fn neutral() -> Self {
        Self {
            enabled: false,
            threshold_db: 0.0,
            ratio: 1.0,
            attack_ms: 0.0,
            release_ms: 0.0,
            knee_db: 0.0,
        }
    }
}

/// Per-segment enhancement parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementSettings {
    pub enabled: bool,
    pub gain_db: f32,
    pub eq: EqSettings,
    pub compression: CompressionSettings,
}

impl EnhancementSettings {
    pub fn validate(&self) -> Result<()> {
        let levels = [
            self.gain_db,
            self.eq.bass_db,
            self.eq.mid_db,
            self.eq.treble_db,
            self.compression.threshold_db,
        ];
        if levels.iter().any(|db| !db.is_finite()) {
            return Err(StudioError::invalid("enhancement levels must be finite"));
        }
        let compression = &self.compression;
        if !(compression.ratio >= 1.0) {
            return Err(StudioError::invalid("compression ratio must be at least 1:1"));
        }
        if !(compression.attack_ms >= 0.0)
            || !(compression.release_ms >= 0.0)
            || !(compression.knee_db >= 0.0)
        {
            return Err(StudioError::invalid(
                "compression attack, release and knee must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Renders `settings` over a whole buffer. Disabled settings return the input
/// unchanged. Any failure is reported as [`StudioError::Render`] so callers
/// can fall back to the dry signal.
pub fn render_offline(buffer: &PcmBuffer, settings: &EnhancementSettings) -> Result<PcmBuffer> {
    if !settings.enabled || buffer.is_empty() {
        return Ok(buffer.clone());
    }
    settings
        .validate()
        .map_err(|e| StudioError::Render(format!("enhancement settings rejected: {e}")))?;

    let channels = buffer.channel_count();
    let mut chain = EnhancementChain::new(buffer.sample_rate(), channels, settings);
    let mut interleaved = buffer.to_interleaved();
    chain.process_interleaved(&mut interleaved);

    if interleaved.iter().any(|sample| !sample.is_finite()) {
        return Err(StudioError::Render(
            "enhancement produced non-finite samples".to_string(),
        ));
    }

    debug!(
        frames = buffer.frames(),
        gain_db = settings.gain_db,
        compression = settings.compression.enabled,
        "rendered enhancement"
    );
    PcmBuffer::from_interleaved(buffer.sample_rate(), channels, &interleaved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::LevelAnalyzer, buffer::test_signals};

    fn rms_db(buffer: &PcmBuffer) -> f32 {
        LevelAnalyzer::new(50.0).summarize(buffer).unwrap().rms_db
    }

    #[test]
    fn disabled_settings_leave_the_buffer_alone() {
        let input = test_signals::tone(8_000, 0.5, 300.0, 0.5);
        let settings = EnhancementSettings {
            gain_db: 12.0,
            ..Default::default()
        };
        assert_eq!(render_offline(&input, &settings).unwrap(), input);
    }

    #[test]
    fn gain_is_applied_in_decibels() {
        let input = test_signals::tone(16_000, 1.0, 1_000.0, 0.1);
        let settings = EnhancementSettings {
            enabled: true,
            gain_db: 6.0,
            ..Default::default()
        };
        let output = render_offline(&input, &settings).unwrap();
        assert_eq!(output.frames(), input.frames());
        assert!((rms_db(&output) - rms_db(&input) - 6.0).abs() < 0.2);
    }

    #[test]
    fn compression_reduces_loud_material() {
        let input = test_signals::tone(16_000, 1.0, 500.0, 0.9);
        let settings = EnhancementSettings {
            enabled: true,
            compression: CompressionSettings {
                enabled: true,
                threshold_db: -30.0,
                ratio: 8.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let output = render_offline(&input, &settings).unwrap();
        assert!(rms_db(&output) < rms_db(&input) - 10.0);
    }

    #[test]
    fn invalid_settings_fail_as_render_errors() {
        let input = test_signals::tone(8_000, 0.2, 300.0, 0.5);
        let settings = EnhancementSettings {
            enabled: true,
            compression: CompressionSettings {
                ratio: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            render_offline(&input, &settings),
            Err(StudioError::Render(_))
        ));
    }
}
