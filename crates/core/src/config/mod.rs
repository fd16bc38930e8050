use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{concat::FadeCurve, silence::SilenceOptions, Result, StudioError};

/// Default overlap applied at crossfaded joins, in seconds.
pub const DEFAULT_CROSSFADE_SECONDS: f64 = 0.5;
/// Default number of undo entries retained.
pub const DEFAULT_MAX_HISTORY: usize = 20;
/// Default export bitrate in kbps.
pub const DEFAULT_EXPORT_BITRATE_KBPS: u32 = 128;
/// Largest audio asset the local-fallback draft store accepts.
pub const DEFAULT_MAX_LOCAL_ASSET_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration structure for the editing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub crossfade_seconds: f64,
    pub crossfade_curve: FadeCurve,
    pub max_history: usize,
    pub export_bitrate_kbps: u32,
    pub max_local_asset_bytes: u64,
    pub fetch_timeout_secs: u64,
    pub silence: SilenceOptions,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            crossfade_seconds: DEFAULT_CROSSFADE_SECONDS,
            crossfade_curve: FadeCurve::default(),
            max_history: DEFAULT_MAX_HISTORY,
            export_bitrate_kbps: DEFAULT_EXPORT_BITRATE_KBPS,
            max_local_asset_bytes: DEFAULT_MAX_LOCAL_ASSET_BYTES,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            silence: SilenceOptions::default(),
        }
    }
}

impl StudioConfig {
    /// Loads a JSON configuration file. Fields that are absent keep their
    /// defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(?path, "loaded studio configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.crossfade_seconds >= 0.0) || !self.crossfade_seconds.is_finite() {
            return Err(StudioError::invalid("crossfade_seconds must be a non-negative number"));
        }
        if self.max_history == 0 {
            return Err(StudioError::invalid("max_history must be at least 1"));
        }
        if self.export_bitrate_kbps == 0 {
            return Err(StudioError::invalid("export_bitrate_kbps must be positive"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(StudioError::invalid("fetch_timeout_secs must be positive"));
        }
        self.silence.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = StudioConfig::default();
        assert_eq!(config.crossfade_seconds, 0.5);
        assert_eq!(config.max_history, 20);
        assert_eq!(config.export_bitrate_kbps, 128);
        assert_eq!(config.max_local_asset_bytes, 5 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: StudioConfig =
            serde_json::from_str(r#"{ "crossfade_seconds": 1.25, "silence": { "threshold_db": -50.0 } }"#)
                .unwrap();
        assert_eq!(config.crossfade_seconds, 1.25);
        assert_eq!(config.max_history, DEFAULT_MAX_HISTORY);
        assert_eq!(config.silence.threshold_db, -50.0);
        assert_eq!(config.silence.padding_ms, SilenceOptions::default().padding_ms);
    }

    #[test]
    fn rejects_empty_history() {
        let config = StudioConfig {
            max_history: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StudioError::InvalidInput(_))));
    }
}
