//! Offline composite rendering.
//!
//! The renderer is a read-only projection over the session's segments: each
//! segment is trimmed, stripped of its marked regions and enhanced into a new
//! buffer, then everything is joined and framed with music.

use tracing::{debug, info, warn};

use crate::{
    concat::{Concatenator, JoinPiece},
    config::StudioConfig,
    enhance::render_offline,
    segment::AudioSegment,
    PcmBuffer, Result, StudioError,
};

/// Output of one composite render.
#[derive(Debug, Clone)]
pub struct CompositeRender {
    pub buffer: PcmBuffer,
    /// Fallbacks taken along the way, in segment order.
    pub warnings: Vec<String>,
}

impl CompositeRender {
    pub fn duration_seconds(&self) -> f64 {
        self.buffer.duration_seconds()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeRenderer {
    concatenator: Concatenator,
}

impl CompositeRenderer {
    pub fn new(concatenator: Concatenator) -> Self {
        Self { concatenator }
    }

    pub fn from_config(config: &StudioConfig) -> Self {
        Self::new(Concatenator::new(config.crossfade_seconds, config.crossfade_curve))
    }

    pub fn concatenator(&self) -> &Concatenator {
        &self.concatenator
    }

    /// Trims and enhances one segment. Enhancement failures fall back to the
    /// dry signal and leave a warning behind.
    pub fn render_segment(&self, segment: &AudioSegment, warnings: &mut Vec<String>) -> Result<PcmBuffer> {
        let dry = segment.render_dry()?;
        match render_offline(&dry, &segment.enhancement) {
            Ok(wet) => Ok(wet),
            Err(err) => {
                let message = format!(
                    "enhancement skipped for `{}`: {err}",
                    segment.info().name
                );
                warn!(segment = %segment.id(), error = %err, "falling back to unenhanced audio");
                warnings.push(message);
                Ok(dry)
            }
        }
    }

    /// Renders all `segments` in their `order`, framed by optional intro and
    /// outro music.
    pub fn render(
        &self,
        segments: &[AudioSegment],
        intro: Option<&PcmBuffer>,
        outro: Option<&PcmBuffer>,
    ) -> Result<CompositeRender> {
        if segments.is_empty() {
            return Err(StudioError::Render("there are no segments to render".to_string()));
        }

        let mut ordered: Vec<&AudioSegment> = segments.iter().collect();
        ordered.sort_by_key(|segment| segment.order);

        let mut warnings = Vec::new();
        let mut pieces = Vec::with_capacity(ordered.len());
        for segment in ordered {
            let buffer = self.render_segment(segment, &mut warnings)?;
            debug!(
                segment = %segment.id(),
                duration = buffer.duration_seconds(),
                "rendered segment"
            );
            pieces.push(JoinPiece::new(buffer, segment.join_mode));
        }

        let body = self.concatenator.join(&pieces)?;
        let buffer = self.concatenator.frame_with_music(&body, intro, outro)?;

        info!(
            segments = pieces.len(),
            duration = buffer.duration_seconds(),
            warnings = warnings.len(),
            "composite rendered"
        );
        Ok(CompositeRender { buffer, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        concat::{FadeCurve, JoinMode},
        edit::TrimWindow,
        enhance::{CompressionSettings, EnhancementSettings},
        silence::SilenceRegion,
    };

    fn segment(seconds: usize, order: usize) -> AudioSegment {
        AudioSegment::from_buffer("take.wav", PcmBuffer::silent(1_000, 1, 1_000 * seconds), order)
    }

    #[test]
    fn renders_in_order_without_touching_segments() {
        let mut first = segment(60, 1);
        let second = segment(90, 0);
        first.set_trim(TrimWindow { start: 0.0, end: 50.0 }).unwrap();
        let segments = vec![first, second];

        let renderer = CompositeRenderer::new(Concatenator::new(0.5, FadeCurve::Linear));
        let render = renderer.render(&segments, None, None).unwrap();
        assert!((render.duration_seconds() - 139.5).abs() < 1e-9);

        let again = renderer.render(&segments, None, None).unwrap();
        assert_eq!(again.buffer, render.buffer);
        assert_eq!(segments[0].duration(), 60.0);
    }

    #[test]
    fn cut_joins_and_marked_regions_add_up() {
        let mut only = segment(120, 0);
        only.join_mode = JoinMode::Cut;
        only.set_trim(TrimWindow { start: 5.0, end: 115.0 }).unwrap();
        only.set_silences(vec![SilenceRegion {
            id: 0,
            start: 40.0,
            end: 42.0,
            marked_for_removal: true,
        }])
        .unwrap();

        let render = CompositeRenderer::default().render(&[only], None, None).unwrap();
        assert!((render.duration_seconds() - 108.0).abs() < 1e-9);
        assert!(render.warnings.is_empty());
    }

    #[test]
    fn failing_enhancement_falls_back_with_a_warning() {
        let mut broken = segment(2, 0);
        broken.enhancement = EnhancementSettings {
            enabled: true,
            compression: CompressionSettings {
                enabled: true,
                ratio: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let render = CompositeRenderer::default().render(&[broken], None, None).unwrap();
        assert_eq!(render.warnings.len(), 1);
        assert_eq!(render.buffer.frames(), 2_000);
    }

    #[test]
    fn empty_session_cannot_render() {
        assert!(matches!(
            CompositeRenderer::default().render(&[], None, None),
            Err(StudioError::Render(_))
        ));
    }
}
