//! Trim window and multi-region removal.

use serde::{Deserialize, Serialize};

use crate::{buffer::secs_to_frames, silence::SilenceRegion, PcmBuffer, Result, StudioError};

/// Half-open `[start, end)` window in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimWindow {
    pub start: f64,
    pub end: f64,
}

impl TrimWindow {
    /// Tolerance used when comparing a window against a buffer duration.
    const EPSILON: f64 = 1e-9;

    /// A window covering an entire buffer.
    pub fn full(duration: f64) -> Self {
        Self {
            start: 0.0,
            end: duration,
        }
    }

    /// Builds a window and checks `0 <= start < end <= duration`.
    pub fn new(start: f64, end: f64, duration: f64) -> Result<Self> {
        let window = Self { start, end };
        window.validate(duration)?;
        Ok(window)
    }

    pub fn validate(&self, duration: f64) -> Result<()> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(StudioError::invalid("trim bounds must be finite"));
        }
        if self.start < 0.0 || self.end <= self.start || self.end > duration + Self::EPSILON {
            return Err(StudioError::invalid(format!(
                "trim window [{}, {}) must satisfy 0 <= start < end <= {duration}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether the window spans the whole of a buffer of `duration` seconds.
    pub fn is_full(&self, duration: f64) -> bool {
        self.start.abs() <= Self::EPSILON && (self.end - duration).abs() <= Self::EPSILON
    }
}

/// The `(start, end)` spans of every region flagged for removal.
pub fn marked_spans(regions: &[SilenceRegion]) -> Vec<(f64, f64)> {
    regions
        .iter()
        .filter(|region| region.marked_for_removal)
        .map(|region| (region.start, region.end))
        .collect()
}

/// Copies the trim window of `source` into a new buffer, leaving out every
/// removal span. Spans are given on the untrimmed timeline; they are clipped
/// to the window, and spans that end up empty are ignored.
pub fn trim_and_remove(
    source: &PcmBuffer,
    window: TrimWindow,
    removals: &[(f64, f64)],
) -> Result<PcmBuffer> {
    window.validate(source.duration_seconds())?;

    let trim_start = source.secs_to_frame(window.start);
    let trim_end = source.secs_to_frame(window.end);

    let mut cuts: Vec<(usize, usize)> = removals
        .iter()
        .filter_map(|&(start, end)| {
            let start = secs_to_frames(start, source.sample_rate()).max(trim_start);
            let end = secs_to_frames(end, source.sample_rate()).min(trim_end);
            (end > start).then_some((start, end))
        })
        .collect();
    cuts.sort_unstable();

    if cuts.is_empty() && trim_start == 0 && trim_end == source.frames() {
        return Ok(source.clone());
    }

    let mut keep: Vec<(usize, usize)> = Vec::with_capacity(cuts.len() + 1);
    let mut cursor = trim_start;
    for (start, end) in cuts {
        if start > cursor {
            keep.push((cursor, start));
        }
        cursor = cursor.max(end);
    }
    if cursor < trim_end {
        keep.push((cursor, trim_end));
    }

    let kept_frames: usize = keep.iter().map(|(start, end)| end - start).sum();
    let output = source.map_channels(|_, samples| {
        let mut out = Vec::with_capacity(kept_frames);
        for &(start, end) in &keep {
            out.extend_from_slice(&samples[start..end]);
        }
        out
    });

    tracing::debug!(
        source_frames = source.frames(),
        output_frames = output.frames(),
        spans = keep.len(),
        "trimmed buffer"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::test_signals;

    #[test]
    fn full_window_is_identity() {
        let source = test_signals::tone(8_000, 2.0, 300.0, 0.4);
        let out = trim_and_remove(&source, TrimWindow::full(2.0), &[]).unwrap();
        assert_eq!(out, source);
    }

    #[test]
    fn removal_inside_window_shortens_exactly() {
        let source = PcmBuffer::silent(8_000, 2, 8_000 * 120);
        let out = trim_and_remove(
            &source,
            TrimWindow::new(5.0, 115.0, 120.0).unwrap(),
            &[(40.0, 42.0), (60.0, 60.5)],
        )
        .unwrap();
        assert_eq!(out.frames(), 8_000 * 110 - 8_000 * 2 - 4_000);
        assert_eq!(out.channel_count(), 2);
    }

    #[test]
    fn copies_kept_spans_in_order() {
        let source = test_signals::ramp(10, 20);
        let out = trim_and_remove(
            &source,
            TrimWindow::new(0.2, 1.8, 2.0).unwrap(),
            &[(0.5, 0.8), (1.0, 1.2)],
        )
        .unwrap();
        let expected: Vec<f32> = [2, 3, 4, 8, 9, 12, 13, 14, 15, 16, 17]
            .iter()
            .map(|v| *v as f32)
            .collect();
        assert_eq!(out.channel(0), expected.as_slice());
    }

    #[test]
    fn clips_regions_that_touch_the_window() {
        let source = test_signals::ramp(10, 20);
        let out = trim_and_remove(
            &source,
            TrimWindow::new(0.5, 1.5, 2.0).unwrap(),
            &[(0.0, 0.7), (1.4, 2.0), (1.6, 1.9)],
        )
        .unwrap();
        let expected: Vec<f32> = (7..14).map(|v| v as f32).collect();
        assert_eq!(out.channel(0), expected.as_slice());
    }

    #[test]
    fn rejects_inverted_window() {
        let source = test_signals::ramp(10, 20);
        let err = trim_and_remove(&source, TrimWindow { start: 1.5, end: 0.5 }, &[]).unwrap_err();
        assert!(matches!(err, StudioError::InvalidInput(_)));
        assert!(TrimWindow::new(0.0, 2.5, 2.0).is_err());
    }

    #[test]
    fn only_marked_regions_are_removed() {
        let regions = vec![
            SilenceRegion { id: 0, start: 1.0, end: 2.0, marked_for_removal: true },
            SilenceRegion { id: 1, start: 3.0, end: 4.0, marked_for_removal: false },
        ];
        assert_eq!(marked_spans(&regions), vec![(1.0, 2.0)]);
    }
}
