use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    concat::JoinMode,
    decode::{DecodedAudio, FileInfo},
    edit::{marked_spans, trim_and_remove, TrimWindow},
    enhance::EnhancementSettings,
    silence::{validate_regions, SilenceRegion},
    PcmBuffer, Result,
};

/// Stable identity of a segment within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(Uuid);

impl SegmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SegmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One input recording under edit.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    id: SegmentId,
    buffer: PcmBuffer,
    info: FileInfo,
    trim: TrimWindow,
    silences: Vec<SilenceRegion>,
    /// Bytes the buffer was decoded from, while the buffer still matches them.
    source_bytes: Option<Arc<[u8]>>,
    pub enhancement: EnhancementSettings,
    /// Position among the session's segments.
    pub order: usize,
    /// How this segment attaches to the next one.
    pub join_mode: JoinMode,
}

impl AudioSegment {
    /// Wraps freshly decoded audio. The trim window spans the whole buffer.
    pub fn new(decoded: DecodedAudio, order: usize) -> Self {
        let trim = TrimWindow::full(decoded.buffer.duration_seconds());
        Self {
            id: SegmentId::new(),
            buffer: decoded.buffer,
            info: decoded.info,
            trim,
            silences: Vec::new(),
            source_bytes: None,
            enhancement: EnhancementSettings::default(),
            order,
            join_mode: JoinMode::default(),
        }
    }

    /// Builds a segment around an already decoded buffer.
    pub fn from_buffer(name: impl Into<String>, buffer: PcmBuffer, order: usize) -> Self {
        let info = FileInfo::for_buffer(name, &buffer);
        Self::new(DecodedAudio { buffer, info }, order)
    }

    pub fn with_source_bytes(mut self, bytes: Arc<[u8]>) -> Self {
        self.source_bytes = Some(bytes);
        self
    }

    /// The encoded input, unless the buffer has been rewritten since.
    pub fn source_bytes(&self) -> Option<&[u8]> {
        self.source_bytes.as_deref()
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn buffer(&self) -> &PcmBuffer {
        &self.buffer
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn trim(&self) -> TrimWindow {
        self.trim
    }

    pub fn silences(&self) -> &[SilenceRegion] {
        &self.silences
    }

    pub fn duration(&self) -> f64 {
        self.buffer.duration_seconds()
    }

    pub fn set_trim(&mut self, trim: TrimWindow) -> Result<()> {
        trim.validate(self.duration())?;
        self.trim = trim;
        Ok(())
    }

    pub fn set_silences(&mut self, silences: Vec<SilenceRegion>) -> Result<()> {
        validate_regions(&silences, self.duration())?;
        self.silences = silences;
        Ok(())
    }

    /// Swaps in a new buffer together with the trim window and regions that
    /// belong to it. Nothing changes unless all three agree.
    pub fn replace_buffer(
        &mut self,
        buffer: PcmBuffer,
        trim: TrimWindow,
        silences: Vec<SilenceRegion>,
    ) -> Result<()> {
        let duration = buffer.duration_seconds();
        trim.validate(duration)?;
        validate_regions(&silences, duration)?;
        self.info.duration_seconds = duration;
        self.source_bytes = None;
        self.buffer = buffer;
        self.trim = trim;
        self.silences = silences;
        Ok(())
    }

    /// The segment as it will sound before enhancement: trimmed, with every
    /// marked region removed. The stored buffer is not touched.
    pub fn render_dry(&self) -> Result<PcmBuffer> {
        trim_and_remove(&self.buffer, self.trim, &marked_spans(&self.silences))
    }

    /// Duration of [`AudioSegment::render_dry`] without rendering.
    pub fn edited_duration(&self) -> f64 {
        let removed: f64 = marked_spans(&self.silences)
            .into_iter()
            .map(|(start, end)| (end.min(self.trim.end) - start.max(self.trim.start)).max(0.0))
            .sum();
        self.trim.duration() - removed
    }
}
