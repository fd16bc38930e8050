//! Export: fetch music, render, encode, tag.
//!
//! An export is all or nothing. A failed music fetch, render or encode, or a
//! cancellation, returns an error and produces no bytes. Only tag embedding
//! is allowed to fail softly.

pub mod encode;
pub mod fetch;
pub mod progress;
pub mod tags;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    assets::{MusicKind, MusicTrack, TrackCatalog},
    concat::{Concatenator, FadeCurve},
    config::StudioConfig,
    render::CompositeRenderer,
    segment::AudioSegment,
    PcmBuffer, Result, StudioError,
};

pub use encode::{encode_wav, AudioEncoder, Mp3Encoder, WavEncoder};
pub use fetch::{HttpTrackFetcher, TrackFetcher};
pub use progress::{ExportProgress, ExportStage, NoProgress, ProgressSink};

use progress::ProgressTracker;

/// Title used in file names when the metadata has none.
pub const FALLBACK_TITLE: &str = "sermon";

/// Descriptive fields written into the exported file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: String,
    pub speaker: String,
    pub date: Option<NaiveDate>,
    pub series: Option<String>,
    pub description: Option<String>,
    /// Raw PNG or JPEG bytes. Stored apart from the JSON record.
    #[serde(skip)]
    pub cover_image: Option<Vec<u8>>,
}

impl Metadata {
    /// Tags are only written when both title and speaker are present.
    pub fn has_tag_fields(&self) -> bool {
        !self.title.trim().is_empty() && !self.speaker.trim().is_empty()
    }
}

/// Intro/outro selection for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicSettings {
    pub include_intro: bool,
    pub include_outro: bool,
    pub intro_track: Option<MusicTrack>,
    pub outro_track: Option<MusicTrack>,
}

impl MusicSettings {
    /// Fills any missing track choice with the catalog default.
    pub fn with_defaults(mut self, catalog: &TrackCatalog) -> Self {
        if self.intro_track.is_none() {
            self.intro_track = catalog.default_for(MusicKind::Intro).cloned();
        }
        if self.outro_track.is_none() {
            self.outro_track = catalog.default_for(MusicKind::Outro).cloned();
        }
        self
    }

    /// The track to fetch for `kind`, if that end is requested.
    pub fn requested(&self, kind: MusicKind) -> Result<Option<&MusicTrack>> {
        let (include, track) = match kind {
            MusicKind::Intro => (self.include_intro, self.intro_track.as_ref()),
            MusicKind::Outro => (self.include_outro, self.outro_track.as_ref()),
        };
        if !include {
            return Ok(None);
        }
        track
            .map(Some)
            .ok_or_else(|| StudioError::invalid(format!("{kind:?} music is enabled but no track is selected")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Constant bitrate of the MP3 output. WAV output ignores it.
    pub bitrate_kbps: u32,
    pub crossfade_seconds: f64,
    pub crossfade_curve: FadeCurve,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self::from_config(&StudioConfig::default())
    }
}

impl ExportSettings {
    pub fn from_config(config: &StudioConfig) -> Self {
        Self {
            bitrate_kbps: config.export_bitrate_kbps,
            crossfade_seconds: config.crossfade_seconds,
            crossfade_curve: config.crossfade_curve,
        }
    }
}

/// Everything an export needs, detached from the session.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub segments: Vec<AudioSegment>,
    pub music: MusicSettings,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: &'static str,
    pub duration_seconds: f64,
    pub tagged: bool,
    pub warnings: Vec<String>,
}

pub struct Exporter {
    fetcher: Arc<dyn TrackFetcher>,
    encoder: Arc<dyn AudioEncoder>,
    settings: ExportSettings,
}

impl Exporter {
    /// Exports MP3 at `settings.bitrate_kbps`. Use [`Exporter::with_encoder`]
    /// for another format.
    pub fn new(fetcher: Arc<dyn TrackFetcher>, settings: ExportSettings) -> Self {
        Self {
            fetcher,
            encoder: Arc::new(Mp3Encoder::new(settings.bitrate_kbps)),
            settings,
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn AudioEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub async fn export(
        &self,
        request: ExportRequest,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ExportOutput> {
        let tracker = ProgressTracker::new(progress);
        let result = self.run(request, &tracker, &cancel).await;
        if let Err(err) = &result {
            warn!(error = %err, "export aborted");
        }
        result
    }

    async fn run(
        &self,
        request: ExportRequest,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<ExportOutput> {
        let ExportRequest {
            segments,
            music,
            metadata,
        } = request;
        info!(
            segments = segments.len(),
            bitrate_kbps = self.settings.bitrate_kbps,
            format = self.encoder.extension(),
            "export started"
        );

        tracker.report(ExportStage::Fetch, 0.0);
        check_cancelled(cancel)?;
        let intro = self.fetch_music(&music, MusicKind::Intro, cancel).await?;
        tracker.report(ExportStage::Fetch, 0.5);
        let outro = self.fetch_music(&music, MusicKind::Outro, cancel).await?;
        tracker.report(ExportStage::Fetch, 1.0);

        check_cancelled(cancel)?;
        tracker.report(ExportStage::Render, 0.0);
        let renderer = CompositeRenderer::new(Concatenator::new(
            self.settings.crossfade_seconds,
            self.settings.crossfade_curve,
        ));
        let render = tokio::task::spawn_blocking(move || {
            renderer.render(&segments, intro.as_ref(), outro.as_ref())
        })
        .await
        .map_err(|e| StudioError::Render(format!("render task failed: {e}")))??;
        tracker.report(ExportStage::Render, 1.0);

        check_cancelled(cancel)?;
        tracker.report(ExportStage::Encode, 0.0);
        let encoder = Arc::clone(&self.encoder);
        let encode_tracker = tracker.clone();
        let buffer = render.buffer.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            encoder.encode(&buffer, &mut |fraction: f32| {
                encode_tracker.report(ExportStage::Encode, fraction)
            })
        })
        .await
        .map_err(|e| StudioError::Encode(format!("encode task failed: {e}")))??;

        let mut warnings = render.warnings;
        let mut tagged = false;
        tracker.report(ExportStage::Tag, 0.0);
        let bytes = if metadata.has_tag_fields() {
            let tagged_bytes = tags::build_id3_tag(&metadata)
                .and_then(|tag| self.encoder.embed_tag(&encoded, &tag));
            match tagged_bytes {
                Ok(bytes) => {
                    tagged = true;
                    bytes
                }
                Err(err) => {
                    warn!(error = %err, "exporting without tags");
                    warnings.push(err.to_string());
                    encoded
                }
            }
        } else {
            encoded
        };
        tracker.report(ExportStage::Tag, 1.0);

        let date = metadata.date.unwrap_or_else(|| Utc::now().date_naive());
        let filename = export_filename(&metadata.title, date, self.encoder.extension());
        let duration_seconds = render.buffer.duration_seconds();
        info!(%filename, bytes = bytes.len(), duration_seconds, tagged, "export finished");

        Ok(ExportOutput {
            bytes,
            filename,
            mime_type: self.encoder.mime_type(),
            duration_seconds,
            tagged,
            warnings,
        })
    }

    async fn fetch_music(
        &self,
        music: &MusicSettings,
        kind: MusicKind,
        cancel: &CancellationToken,
    ) -> Result<Option<PcmBuffer>> {
        let Some(track) = music.requested(kind)? else {
            return Ok(None);
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(StudioError::Cancelled),
            fetched = self.fetcher.fetch(track) => fetched.map(Some),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(StudioError::Cancelled)
    } else {
        Ok(())
    }
}

/// `export_{title}_{YYYY-MM-DD}.{ext}` with the title reduced to lowercase
/// ASCII letters, digits and single underscores.
pub fn export_filename(title: &str, date: NaiveDate, extension: &str) -> String {
    let mut sanitized = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            sanitized.push(ch.to_ascii_lowercase());
        } else if !sanitized.ends_with('_') && !sanitized.is_empty() {
            sanitized.push('_');
        }
    }
    let sanitized = sanitized.trim_end_matches('_');
    let title = if sanitized.is_empty() {
        FALLBACK_TITLE
    } else {
        sanitized
    };
    format!("export_{title}_{}.{extension}", date.format("%Y-%m-%d"))
}
