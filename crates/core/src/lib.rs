//! Core library for the Sermon Studio editing pipeline.
//!
//! Recordings are decoded into immutable [`PcmBuffer`]s and wrapped as
//! segments inside a [`Session`]. The session trims them, detects and removes
//! silences, enhances them and records undo history. The composite renderer
//! joins every segment (and optional intro/outro music) into one buffer, which
//! the [`Exporter`] encodes and tags. A single draft slot lets an unfinished
//! edit survive a restart.

pub mod analysis;
pub mod assets;
pub mod buffer;
pub mod concat;
pub mod config;
pub mod decode;
pub mod draft;
pub mod edit;
pub mod enhance;
pub mod error;
pub mod export;
pub mod history;
pub mod playback;
pub mod render;
pub mod segment;
pub mod session;
pub mod silence;

pub use analysis::{LevelAnalyzer, LevelFrame, LevelSummary};
pub use assets::{MusicKind, MusicTrack, TrackCatalog};
pub use buffer::PcmBuffer;
pub use concat::{Concatenator, FadeCurve, JoinMode};
pub use config::StudioConfig;
pub use decode::{decode_async, decode_bytes, DecodedAudio, FileInfo};
pub use draft::{Draft, DraftRecord, DraftStore};
pub use edit::TrimWindow;
pub use enhance::{EnhancementSettings, GraphState, PreviewGraph};
pub use error::{Result, StudioError};
pub use export::{
    ExportOutput, ExportProgress, ExportSettings, Exporter, HttpTrackFetcher, Metadata,
    MusicSettings, ProgressSink, TrackFetcher,
};
pub use history::{EditHistory, EditHistoryEntry, HistoryEdit};
pub use playback::{PlaybackClock, PlaybackResources, PlaybackSource};
pub use render::{CompositeRender, CompositeRenderer};
pub use segment::{AudioSegment, SegmentId};
pub use session::{DraftSnapshot, Session};
pub use silence::{detect_silences, SilenceOptions, SilenceRegion};
