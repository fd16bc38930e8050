//! The editing session.
//!
//! A [`Session`] owns the ordered segments, the active segment's working
//! copy and its live preview graph, the undo history, music and metadata
//! choices, the last composite render and any running preview. Every
//! operation takes `&mut self`, so a long commit such as
//! [`Session::apply_trim`] cannot interleave with a segment switch.

mod active;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    assets::TrackCatalog,
    concat::JoinMode,
    config::StudioConfig,
    decode::{decode_bytes, DecodedAudio, FileInfo},
    draft::{Draft, DraftRecord, DraftStore},
    edit::{marked_spans, trim_and_remove, TrimWindow},
    enhance::{EnhancementSettings, PreviewGraph},
    export::{encode_wav, ExportOutput, ExportRequest, Exporter, Metadata, MusicSettings, ProgressSink},
    history::{EditHistory, EditHistoryEntry, HistoryEdit},
    playback::{PlaybackResources, PlaybackSource},
    render::{CompositeRender, CompositeRenderer},
    segment::{AudioSegment, SegmentId},
    silence::{detect_silences, validate_regions, SilenceOptions, SilenceRegion},
    PcmBuffer, Result, StudioError,
};

use active::{split_active, ActiveEdit};

/// What [`Session::draft_snapshot`] hands to a [`DraftStore`].
#[derive(Debug, Clone)]
pub struct DraftSnapshot {
    pub record: DraftRecord,
    pub audio: Vec<u8>,
    pub cover_image: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct Session {
    config: StudioConfig,
    /// Sorted by `order`; `order` always equals the index.
    segments: Vec<AudioSegment>,
    active: Option<ActiveEdit>,
    history: EditHistory,
    music: MusicSettings,
    metadata: Metadata,
    composite: Option<CompositeRender>,
    playback: Option<PlaybackResources>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(StudioConfig::default())
    }
}

impl Session {
    pub fn new(config: StudioConfig) -> Self {
        let history = EditHistory::new(config.max_history);
        Self {
            config,
            segments: Vec::new(),
            active: None,
            history,
            music: MusicSettings::default(),
            metadata: Metadata::default(),
            composite: None,
            playback: None,
        }
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Stored segments in order. The active segment's uncommitted edits are
    /// only visible through the `active_*` accessors.
    pub fn segments(&self) -> &[AudioSegment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&AudioSegment> {
        self.segments.iter().find(|segment| segment.id() == id)
    }

    pub fn active_segment_id(&self) -> Option<SegmentId> {
        self.active.as_ref().map(|active| active.segment_id)
    }

    pub fn active_trim(&self) -> Option<TrimWindow> {
        self.active.as_ref().map(|active| active.trim)
    }

    pub fn active_silences(&self) -> &[SilenceRegion] {
        self.active
            .as_ref()
            .map(|active| active.silences.as_slice())
            .unwrap_or(&[])
    }

    /// Enhancement settings of the active segment, as its live graph has
    /// them.
    pub fn active_enhancement(&self) -> Result<Option<EnhancementSettings>> {
        self.active.as_ref().map(ActiveEdit::enhancement).transpose()
    }

    pub fn preview_graph(&self) -> Option<&PreviewGraph> {
        self.active.as_ref().map(|active| &active.graph)
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn music(&self) -> &MusicSettings {
        &self.music
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn composite(&self) -> Option<&CompositeRender> {
        self.composite.as_ref()
    }

    pub fn playback(&self) -> Option<&PlaybackResources> {
        self.playback.as_ref()
    }

    pub fn playback_mut(&mut self) -> Option<&mut PlaybackResources> {
        self.playback.as_mut()
    }

    // ---- segment lifecycle -------------------------------------------------

    /// Starts a new session from one file. Whatever was loaded before is
    /// torn down once the new file has decoded.
    pub fn load_file(&mut self, name: &str, bytes: &[u8]) -> Result<SegmentId> {
        let decoded = decode_bytes(name, bytes)?;
        self.clear()?;
        self.insert(decoded, Some(Arc::from(bytes)))
    }

    /// Appends a file as the last segment and makes it active.
    pub fn add_segment(&mut self, name: &str, bytes: &[u8]) -> Result<SegmentId> {
        let decoded = decode_bytes(name, bytes)?;
        self.insert(decoded, Some(Arc::from(bytes)))
    }

    /// Appends audio that was decoded elsewhere, e.g. with
    /// [`crate::decode::decode_async`].
    pub fn add_decoded(&mut self, decoded: DecodedAudio) -> Result<SegmentId> {
        self.insert(decoded, None)
    }

    /// Appends an in-memory buffer.
    pub fn add_buffer(&mut self, name: &str, buffer: PcmBuffer) -> Result<SegmentId> {
        let info = FileInfo::for_buffer(name, &buffer);
        self.insert(DecodedAudio { buffer, info }, None)
    }

    fn insert(&mut self, decoded: DecodedAudio, source: Option<Arc<[u8]>>) -> Result<SegmentId> {
        if decoded.buffer.is_empty() {
            return Err(StudioError::Decode(format!(
                "`{}` contains no audio",
                decoded.info.name
            )));
        }
        self.commit_active()?;

        let mut segment = AudioSegment::new(decoded, self.segments.len());
        if let Some(bytes) = source {
            segment = segment.with_source_bytes(bytes);
        }
        let id = segment.id();
        info!(
            segment = %id,
            name = %segment.info().name,
            duration = segment.duration(),
            order = segment.order,
            "segment added"
        );
        self.segments.push(segment);
        self.composite = None;
        self.activate(id)?;
        Ok(id)
    }

    /// Removes a segment. If it was active, the segment that took its place
    /// (or the new last one) becomes active.
    pub fn remove_segment(&mut self, id: SegmentId) -> Result<()> {
        let index = self.index_of(id)?;
        self.stop_playback();

        let was_active = self.active_segment_id() == Some(id);
        if was_active {
            self.close_active()?;
        }
        self.segments.remove(index);
        self.renumber();
        self.history.forget_segment(id);
        self.composite = None;
        info!(segment = %id, remaining = self.segments.len(), "segment removed");

        if self.segments.is_empty() {
            self.release_resources()?;
        } else if was_active {
            let next = self.segments[index.min(self.segments.len() - 1)].id();
            self.activate(next)?;
        }
        Ok(())
    }

    /// Commits the active segment's edits and switches to `id`.
    pub fn select_segment(&mut self, id: SegmentId) -> Result<()> {
        self.index_of(id)?;
        if self.active_segment_id() == Some(id) {
            return Ok(());
        }
        self.commit_active()?;
        self.activate(id)
    }

    /// Puts the segments in the order given. `ids` must name every segment
    /// exactly once.
    pub fn reorder(&mut self, ids: &[SegmentId]) -> Result<()> {
        if ids.len() != self.segments.len() {
            return Err(StudioError::invalid(format!(
                "expected {} segment ids, got {}",
                self.segments.len(),
                ids.len()
            )));
        }
        let mut reordered = Vec::with_capacity(ids.len());
        let mut remaining = std::mem::take(&mut self.segments);
        for id in ids {
            match remaining.iter().position(|segment| segment.id() == *id) {
                Some(index) => reordered.push(remaining.swap_remove(index)),
                None => {
                    // Put everything back before reporting the bad id.
                    reordered.append(&mut remaining);
                    reordered.sort_by_key(|segment| segment.order);
                    self.segments = reordered;
                    return Err(StudioError::invalid(format!(
                        "segment {id} is missing or listed twice"
                    )));
                }
            }
        }
        self.segments = reordered;
        self.renumber();
        self.composite = None;
        Ok(())
    }

    pub fn move_up(&mut self, id: SegmentId) -> Result<()> {
        let index = self.index_of(id)?;
        if index > 0 {
            self.segments.swap(index, index - 1);
            self.renumber();
            self.composite = None;
        }
        Ok(())
    }

    pub fn move_down(&mut self, id: SegmentId) -> Result<()> {
        let index = self.index_of(id)?;
        if index + 1 < self.segments.len() {
            self.segments.swap(index, index + 1);
            self.renumber();
            self.composite = None;
        }
        Ok(())
    }

    pub fn set_join_mode(&mut self, id: SegmentId, mode: JoinMode) -> Result<()> {
        let index = self.index_of(id)?;
        self.segments[index].join_mode = mode;
        self.composite = None;
        Ok(())
    }

    // ---- active segment edits ----------------------------------------------

    /// Moves the active trim window. Not recorded in history.
    pub fn set_trim(&mut self, start: f64, end: f64) -> Result<()> {
        let (active, segment) = split_active(&mut self.active, &mut self.segments)?;
        active.trim = TrimWindow::new(start, end, segment.duration())?;
        Ok(())
    }

    /// Replaces the active enhancement settings and pushes them into the
    /// live graph.
    pub fn set_enhancement(&mut self, settings: EnhancementSettings) -> Result<()> {
        settings.validate()?;
        let (active, _) = split_active(&mut self.active, &mut self.segments)?;
        active.graph.update(settings)?;
        self.composite = None;
        Ok(())
    }

    /// Engages or bypasses the live graph without touching its parameters.
    /// Playback keeps running across the switch.
    pub fn set_enhancement_enabled(&mut self, enabled: bool) -> Result<()> {
        let (active, _) = split_active(&mut self.active, &mut self.segments)?;
        if enabled {
            active.graph.engage()?;
        } else {
            active.graph.bypass()?;
        }
        self.composite = None;
        Ok(())
    }

    /// Cuts the active segment's buffer down to its trim window, without its
    /// marked regions. Returns `false` when the window already spans the
    /// whole buffer.
    pub fn apply_trim(&mut self) -> Result<bool> {
        let (active, segment) = split_active(&mut self.active, &mut self.segments)?;
        if active.trim.is_full(segment.duration()) {
            return Ok(false);
        }

        let trimmed = trim_and_remove(segment.buffer(), active.trim, &marked_spans(&active.silences))?;
        if trimmed.is_empty() {
            return Err(StudioError::invalid("trim would leave the segment empty"));
        }

        let entry = EditHistoryEntry::new(
            segment.id(),
            HistoryEdit::Trim {
                window: active.trim,
                buffer: segment.buffer().clone(),
                silences: active.silences.clone(),
            },
        );
        let full = TrimWindow::full(trimmed.duration_seconds());
        segment.replace_buffer(trimmed, full, Vec::new())?;
        active.trim = full;
        active.silences.clear();
        let segment_id = segment.id();
        let duration = full.end;

        self.history.push(entry);
        self.composite = None;
        self.stop_playback_of(segment_id);
        info!(segment = %segment_id, duration, "trim applied");
        Ok(true)
    }

    /// Runs silence detection on the active segment and replaces its region
    /// list. `None` uses the configured options.
    pub fn detect_silences(&mut self, options: Option<SilenceOptions>) -> Result<&[SilenceRegion]> {
        let options = options.unwrap_or(self.config.silence);
        let (active, segment) = split_active(&mut self.active, &mut self.segments)?;
        let regions = detect_silences(segment.buffer(), &options)?;

        if !active.silences.is_empty() {
            let previous = std::mem::take(&mut active.silences);
            self.history
                .push(EditHistoryEntry::new(segment.id(), HistoryEdit::SilenceSnapshot(previous)));
        }
        debug!(segment = %segment.id(), regions = regions.len(), "silences replaced");
        active.silences = regions;
        self.composite = None;
        Ok(self.active_silences())
    }

    /// Flips one region's removal flag and returns the new value.
    pub fn toggle_silence_removal(&mut self, region_id: u32) -> Result<bool> {
        let (active, segment) = split_active(&mut self.active, &mut self.segments)?;
        let index = active
            .silences
            .iter()
            .position(|region| region.id == region_id)
            .ok_or_else(|| StudioError::invalid(format!("no silence region with id {region_id}")))?;

        self.history.push(EditHistoryEntry::new(
            segment.id(),
            HistoryEdit::SilenceSnapshot(active.silences.clone()),
        ));
        let region = &mut active.silences[index];
        region.marked_for_removal = !region.marked_for_removal;
        self.composite = None;
        Ok(region.marked_for_removal)
    }

    /// Reverts the most recent recorded edit on the segment it was made on.
    /// Returns `false` when there was nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        let Some(entry) = self.history.pop() else {
            return Ok(false);
        };
        let index = self.index_of(entry.segment_id)?;
        let is_active = self.active_segment_id() == Some(entry.segment_id);
        let segment = &mut self.segments[index];

        match entry.edit {
            HistoryEdit::Trim {
                window,
                buffer,
                silences,
            } => {
                segment.replace_buffer(buffer, window, silences.clone())?;
                if let Some(active) = self.active.as_mut().filter(|_| is_active) {
                    active.trim = window;
                    active.silences = silences;
                }
                self.stop_playback_of(entry.segment_id);
            }
            HistoryEdit::SilenceSnapshot(regions) => {
                validate_regions(&regions, segment.duration())?;
                match self.active.as_mut().filter(|_| is_active) {
                    Some(active) => active.silences = regions,
                    None => segment.set_silences(regions)?,
                }
            }
        }
        self.composite = None;
        debug!(segment = %entry.segment_id, remaining = self.history.len(), "undo");
        Ok(true)
    }

    // ---- session settings --------------------------------------------------

    pub fn set_music(&mut self, music: MusicSettings) {
        self.music = music;
        self.composite = None;
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    // ---- rendering and playback --------------------------------------------

    /// Renders every segment into one buffer and keeps it for preview. The
    /// segments themselves are left as they are.
    pub fn render_composite(
        &mut self,
        intro: Option<&PcmBuffer>,
        outro: Option<&PcmBuffer>,
    ) -> Result<&CompositeRender> {
        self.commit_active()?;
        if matches!(self.playback.as_ref().map(PlaybackResources::source), Some(PlaybackSource::Composite)) {
            self.stop_playback();
        }
        let render = CompositeRenderer::from_config(&self.config).render(&self.segments, intro, outro)?;
        for warning in &render.warnings {
            warn!(%warning, "composite render fallback");
        }
        Ok(self.composite.insert(render))
    }

    /// Starts previewing the active segment from its trim start, through the
    /// live graph.
    pub fn play_segment(&mut self) -> Result<&PlaybackResources> {
        self.stop_playback();
        let (active, segment) = split_active(&mut self.active, &mut self.segments)?;
        // The preview stops at the trim end; only the head is skipped by seek.
        let end = active.trim.end.min(segment.duration());
        let mut resources = PlaybackResources::new(
            PlaybackSource::Segment(active.segment_id),
            end,
            Some(active.graph.clone()),
        );
        resources.clock_mut().seek(active.trim.start);
        Ok(self.playback.insert(resources))
    }

    /// Starts previewing the last composite render.
    pub fn play_composite(&mut self) -> Result<&PlaybackResources> {
        self.stop_playback();
        let duration = self
            .composite
            .as_ref()
            .map(CompositeRender::duration_seconds)
            .ok_or_else(|| StudioError::invalid("render the composite before playing it"))?;
        Ok(self
            .playback
            .insert(PlaybackResources::new(PlaybackSource::Composite, duration, None)))
    }

    /// Stops any preview and returns where it stopped.
    pub fn stop_playback(&mut self) -> Option<f64> {
        self.playback.take().map(PlaybackResources::release)
    }

    fn stop_playback_of(&mut self, id: SegmentId) {
        if self.playback.as_ref().is_some_and(|playback| playback.plays_segment(id)) {
            self.stop_playback();
        }
    }

    // ---- export and drafts -------------------------------------------------

    /// Commits pending edits and detaches everything an export needs.
    pub fn export_request(&mut self) -> Result<ExportRequest> {
        self.commit_active()?;
        if self.segments.is_empty() {
            return Err(StudioError::invalid("there is nothing to export"));
        }
        Ok(ExportRequest {
            segments: self.segments.clone(),
            music: self.music.clone(),
            metadata: self.metadata.clone(),
        })
    }

    /// Exports the session and tears it down on success. A failed export
    /// leaves the session as it was.
    pub async fn export(
        &mut self,
        exporter: &Exporter,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ExportOutput> {
        let request = self.export_request()?;
        let output = exporter.export(request, progress, cancel).await?;
        self.clear()?;
        Ok(output)
    }

    /// Snapshot of the first segment plus session settings for the draft
    /// store. The audio is the original file while the buffer is unchanged,
    /// otherwise a WAV rendering of the current buffer.
    pub fn draft_snapshot(&mut self) -> Result<DraftSnapshot> {
        self.commit_active()?;
        let first = self
            .segments
            .first()
            .ok_or_else(|| StudioError::invalid("there is nothing to save"))?;
        let audio = match first.source_bytes() {
            Some(bytes) => bytes.to_vec(),
            None => encode_wav(first.buffer())?,
        };
        let trim = first.trim();
        let record = DraftRecord {
            metadata: self.metadata.clone(),
            trim_start: trim.start,
            trim_end: trim.end,
            duration: first.duration(),
            music_settings: (&self.music).into(),
            silences: first.silences().to_vec(),
            saved_at: Utc::now(),
        };
        Ok(DraftSnapshot {
            record,
            audio,
            cover_image: self.metadata.cover_image.clone(),
        })
    }

    pub fn save_draft(&mut self, store: &DraftStore) -> Result<()> {
        let snapshot = self.draft_snapshot()?;
        store.save(&snapshot.record, &snapshot.audio, snapshot.cover_image.as_deref())
    }

    /// Replaces the session with a stored draft. The draft is checked first;
    /// a draft that does not fit its own audio leaves the session untouched.
    pub fn restore_draft(&mut self, draft: Draft, catalog: &TrackCatalog) -> Result<SegmentId> {
        let Draft {
            record,
            audio,
            audio_bytes,
            ..
        } = draft;
        let duration = audio.buffer.duration_seconds();
        let trim = TrimWindow::new(record.trim_start, record.trim_end, duration)?;
        validate_regions(&record.silences, duration)?;

        self.clear()?;
        let id = self.insert(audio, Some(Arc::from(audio_bytes)))?;
        let (active, _) = split_active(&mut self.active, &mut self.segments)?;
        active.trim = trim;
        active.silences = record.silences;
        self.commit_active()?;

        self.music = record.music_settings.resolve(catalog);
        self.metadata = record.metadata;
        info!(segment = %id, saved_at = %record.saved_at, "draft restored");
        Ok(id)
    }

    /// Tears the session down: playback stops, the preview graph is
    /// disposed and every buffer is released.
    pub fn clear(&mut self) -> Result<()> {
        self.release_resources()?;
        self.segments.clear();
        self.history.clear();
        self.music = MusicSettings::default();
        self.metadata = Metadata::default();
        self.composite = None;
        debug!("session cleared");
        Ok(())
    }

    // ---- internals ---------------------------------------------------------

    fn index_of(&self, id: SegmentId) -> Result<usize> {
        self.segments
            .iter()
            .position(|segment| segment.id() == id)
            .ok_or_else(|| StudioError::UnknownSegment(id.to_string()))
    }

    fn renumber(&mut self) {
        for (order, segment) in self.segments.iter_mut().enumerate() {
            segment.order = order;
        }
    }

    /// Writes the active working copy back into its segment.
    fn commit_active(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Ok(());
        }
        let (active, segment) = split_active(&mut self.active, &mut self.segments)?;
        active.commit_into(segment)
    }

    /// Stops playback, disposes the current graph and opens `id`.
    fn activate(&mut self, id: SegmentId) -> Result<()> {
        self.stop_playback();
        self.close_active()?;
        let index = self.index_of(id)?;
        self.active = Some(ActiveEdit::open(&self.segments[index]));
        debug!(segment = %id, "segment activated");
        Ok(())
    }

    fn close_active(&mut self) -> Result<()> {
        match self.active.take() {
            Some(active) => active.close(),
            None => Ok(()),
        }
    }

    fn release_resources(&mut self) -> Result<()> {
        self.stop_playback();
        self.close_active()
    }
}
