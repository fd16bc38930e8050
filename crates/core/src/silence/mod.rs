//! Silence detection.
//!
//! The detector meters a buffer in short RMS windows, collects runs of
//! windows under the threshold that last long enough, pads them outward and
//! merges whatever overlaps afterwards. All arithmetic happens on frame
//! indices so results are reproducible bit for bit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{analysis::LevelAnalyzer, PcmBuffer, Result, StudioError};

/// Tuning for [`detect_silences`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceOptions {
    /// Windows whose RMS level is strictly below this are silent.
    pub threshold_db: f32,
    /// Shortest run of silent windows reported as a region.
    pub min_silence_duration_ms: f64,
    /// Amount each region is widened on both sides.
    pub padding_ms: f64,
    /// RMS window length.
    pub window_ms: f64,
}

impl Default for SilenceOptions {
    fn default() -> Self {
        Self {
            threshold_db: -40.0,
            min_silence_duration_ms: 300.0,
            padding_ms: 100.0,
            window_ms: 10.0,
        }
    }
}

impl SilenceOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold_db.is_finite() {
            return Err(StudioError::invalid("silence threshold must be finite"));
        }
        if !(self.min_silence_duration_ms >= 0.0) || !(self.padding_ms >= 0.0) {
            return Err(StudioError::invalid("silence durations must be non-negative"));
        }
        if !(self.window_ms > 0.0) {
            return Err(StudioError::invalid("silence window must be positive"));
        }
        Ok(())
    }
}

/// A detected low-level span within one segment's own timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceRegion {
    /// Position of the region in detection order.
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub marked_for_removal: bool,
}

impl SilenceRegion {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Scans `buffer` for silent runs. A degenerate buffer yields no regions.
pub fn detect_silences(buffer: &PcmBuffer, options: &SilenceOptions) -> Result<Vec<SilenceRegion>> {
    options.validate()?;
    if buffer.is_empty() {
        return Ok(Vec::new());
    }

    let sample_rate = buffer.sample_rate();
    let total = buffer.frames();
    let mut analyzer = LevelAnalyzer::new(options.window_ms);
    let window = analyzer.window_frames(sample_rate);
    let levels = analyzer.analyze(buffer)?;

    let min_frames = ms_to_frames(options.min_silence_duration_ms, sample_rate);
    let pad_frames = ms_to_frames(options.padding_ms, sample_rate);

    let mut candidates: Vec<(usize, usize)> = Vec::new();
    let mut run_start: Option<usize> = None;

    for (index, level) in levels.iter().enumerate() {
        let start = index * window;
        if level.rms_db < options.threshold_db {
            run_start.get_or_insert(start);
        } else if let Some(begin) = run_start.take() {
            push_candidate(&mut candidates, begin, start, min_frames);
        }
    }
    if let Some(begin) = run_start {
        push_candidate(&mut candidates, begin, total, min_frames);
    }

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(candidates.len());
    for (start, end) in candidates {
        let padded = (start.saturating_sub(pad_frames), (end + pad_frames).min(total));
        match merged.last_mut() {
            Some(last) if padded.0 <= last.1 => last.1 = last.1.max(padded.1),
            _ => merged.push(padded),
        }
    }

    let regions: Vec<SilenceRegion> = merged
        .into_iter()
        .enumerate()
        .map(|(id, (start, end))| SilenceRegion {
            id: id as u32,
            start: buffer.frames_to_secs(start),
            end: buffer.frames_to_secs(end),
            marked_for_removal: false,
        })
        .collect();

    debug!(
        regions = regions.len(),
        threshold_db = options.threshold_db,
        "silence detection finished"
    );
    Ok(regions)
}

/// Checks that regions are ordered, non-overlapping and inside
/// `[0, duration]`.
pub fn validate_regions(regions: &[SilenceRegion], duration: f64) -> Result<()> {
    let mut previous_end = 0.0;
    for region in regions {
        if !(region.start >= 0.0) || region.end <= region.start || region.end > duration + 1e-9 {
            return Err(StudioError::invalid(format!(
                "silence region {} [{}, {}) lies outside [0, {duration})",
                region.id, region.start, region.end
            )));
        }
        if region.start < previous_end {
            return Err(StudioError::invalid(format!(
                "silence region {} overlaps its predecessor",
                region.id
            )));
        }
        previous_end = region.end;
    }
    Ok(())
}

fn push_candidate(candidates: &mut Vec<(usize, usize)>, start: usize, end: usize, min_frames: usize) {
    if end > start && end - start >= min_frames.max(1) {
        candidates.push((start, end));
    }
}

fn ms_to_frames(ms: f64, sample_rate: u32) -> usize {
    crate::buffer::secs_to_frames(ms / 1000.0, sample_rate)
}
