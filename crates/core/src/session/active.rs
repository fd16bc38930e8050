use crate::{
    edit::TrimWindow,
    enhance::{EnhancementSettings, PreviewGraph},
    segment::{AudioSegment, SegmentId},
    silence::SilenceRegion,
    Result, StudioError,
};

/// Working copy of the active segment's editable fields. Edits land here
/// first and are written back to the stored segment on commit. The live
/// graph owns the enhancement settings, so engaging or bypassing it through
/// any handle is what gets committed.
#[derive(Debug)]
pub(crate) struct ActiveEdit {
    pub(crate) segment_id: SegmentId,
    pub(crate) trim: TrimWindow,
    pub(crate) silences: Vec<SilenceRegion>,
    pub(crate) graph: PreviewGraph,
}

impl ActiveEdit {
    pub(crate) fn open(segment: &AudioSegment) -> Self {
        let buffer = segment.buffer();
        Self {
            segment_id: segment.id(),
            trim: segment.trim(),
            silences: segment.silences().to_vec(),
            graph: PreviewGraph::new(
                buffer.sample_rate(),
                buffer.channel_count(),
                segment.enhancement,
            ),
        }
    }

    pub(crate) fn enhancement(&self) -> Result<EnhancementSettings> {
        self.graph.settings()
    }

    /// Writes the working copy back into `segment`.
    pub(crate) fn commit_into(&self, segment: &mut AudioSegment) -> Result<()> {
        let enhancement = self.enhancement()?;
        segment.set_trim(self.trim)?;
        segment.set_silences(self.silences.clone())?;
        segment.enhancement = enhancement;
        Ok(())
    }

    /// Disposes the preview graph. Called before the view is dropped.
    pub(crate) fn close(self) -> Result<()> {
        self.graph.dispose()
    }
}

/// Borrows the active view together with the stored segment it edits.
pub(crate) fn split_active<'a>(
    active: &'a mut Option<ActiveEdit>,
    segments: &'a mut [AudioSegment],
) -> Result<(&'a mut ActiveEdit, &'a mut AudioSegment)> {
    let active = active
        .as_mut()
        .ok_or_else(|| StudioError::invalid("no segment is active"))?;
    let segment = segments
        .iter_mut()
        .find(|segment| segment.id() == active.segment_id)
        .ok_or_else(|| StudioError::UnknownSegment(active.segment_id.to_string()))?;
    Ok((active, segment))
}
