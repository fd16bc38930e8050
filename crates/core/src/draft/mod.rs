//! Single-slot draft persistence.
//!
//! A draft is three files under one key: `<key>.json` holds the record,
//! `<key>.audio` the primary audio asset and `<key>.cover` the optional cover
//! image. The JSON file is written last, so its presence marks a complete
//! draft.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    assets::TrackCatalog,
    config::StudioConfig,
    decode::{decode_bytes, DecodedAudio},
    export::{Metadata, MusicSettings},
    silence::SilenceRegion,
    Result, StudioError,
};

/// Storage key of the one draft slot.
pub const DRAFT_KEY: &str = "sermon_draft";

/// Music choices stored by reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftMusic {
    pub include_intro: bool,
    pub include_outro: bool,
    pub intro_track_id: Option<String>,
    pub outro_track_id: Option<String>,
}

impl From<&MusicSettings> for DraftMusic {
    fn from(music: &MusicSettings) -> Self {
        Self {
            include_intro: music.include_intro,
            include_outro: music.include_outro,
            intro_track_id: music.intro_track.as_ref().map(|track| track.id.clone()),
            outro_track_id: music.outro_track.as_ref().map(|track| track.id.clone()),
        }
    }
}

impl DraftMusic {
    /// Looks the stored track ids up again. Tracks that have since vanished
    /// from the catalog are dropped.
    pub fn resolve(&self, catalog: &TrackCatalog) -> MusicSettings {
        let lookup = |id: &Option<String>| {
            let id = id.as_deref()?;
            let track = catalog.track(id).cloned();
            if track.is_none() {
                warn!(track = id, "draft refers to an unknown music track");
            }
            track
        };
        MusicSettings {
            include_intro: self.include_intro,
            include_outro: self.include_outro,
            intro_track: lookup(&self.intro_track_id),
            outro_track: lookup(&self.outro_track_id),
        }
    }
}

/// The JSON part of a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRecord {
    pub metadata: Metadata,
    pub trim_start: f64,
    pub trim_end: f64,
    pub duration: f64,
    pub music_settings: DraftMusic,
    pub silences: Vec<SilenceRegion>,
    pub saved_at: DateTime<Utc>,
}

/// A draft read back from disk, with its audio already decoded.
#[derive(Debug, Clone)]
pub struct Draft {
    pub record: DraftRecord,
    pub audio: DecodedAudio,
    pub audio_bytes: Vec<u8>,
    pub cover_image: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct DraftStore {
    root: PathBuf,
    key: String,
    /// `None` stores audio of any size.
    max_audio_bytes: Option<u64>,
}

impl DraftStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            key: DRAFT_KEY.to_string(),
            max_audio_bytes: None,
        }
    }

    /// A store for when the primary draft backend is unreachable. It refuses
    /// audio larger than `config.max_local_asset_bytes`.
    pub fn local_fallback(root: impl Into<PathBuf>, config: &StudioConfig) -> Self {
        Self::new(root).with_max_audio_bytes(config.max_local_asset_bytes)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_max_audio_bytes(mut self, max: u64) -> Self {
        self.max_audio_bytes = Some(max);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(format!("{}.json", self.key))
    }

    pub fn audio_path(&self) -> PathBuf {
        self.root.join(format!("{}.audio", self.key))
    }

    pub fn cover_path(&self) -> PathBuf {
        self.root.join(format!("{}.cover", self.key))
    }

    pub fn exists(&self) -> bool {
        self.record_path().is_file()
    }

    /// Writes the draft, replacing whatever was stored before.
    pub fn save(&self, record: &DraftRecord, audio: &[u8], cover: Option<&[u8]>) -> Result<()> {
        if let Some(max) = self.max_audio_bytes.filter(|max| audio.len() as u64 > *max) {
            return Err(StudioError::invalid(format!(
                "draft audio is {} bytes; the limit is {max}",
                audio.len()
            )));
        }

        std::fs::create_dir_all(&self.root)?;
        // Hide the old draft first so a crash mid-save never pairs the old
        // record with new audio.
        remove_if_present(&self.record_path())?;

        std::fs::write(self.audio_path(), audio)?;
        match cover {
            Some(cover) => std::fs::write(self.cover_path(), cover)?,
            None => remove_if_present(&self.cover_path())?,
        }

        let json = serde_json::to_string_pretty(record)?;
        let staging = self.root.join(format!("{}.json.tmp", self.key));
        std::fs::write(&staging, json.as_bytes())?;
        std::fs::rename(&staging, self.record_path())?;

        info!(
            path = %self.record_path().display(),
            audio_bytes = audio.len(),
            "saved draft"
        );
        Ok(())
    }

    /// Reads the draft back. A missing or unreadable draft is `None`.
    pub fn load(&self) -> Option<Draft> {
        match self.try_load() {
            Ok(draft) => draft,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable draft");
                None
            }
        }
    }

    /// Like [`DraftStore::load`] but reports why a stored draft was
    /// unusable.
    pub fn try_load(&self) -> Result<Option<Draft>> {
        let json = match std::fs::read_to_string(self.record_path()) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StudioError::DraftCorrupt(e.to_string())),
        };
        let mut record: DraftRecord =
            serde_json::from_str(&json).map_err(|e| StudioError::DraftCorrupt(e.to_string()))?;

        let audio_bytes = std::fs::read(self.audio_path())
            .map_err(|e| StudioError::DraftCorrupt(format!("audio asset: {e}")))?;
        let audio = decode_bytes(&format!("{}.audio", self.key), &audio_bytes)
            .map_err(|e| StudioError::DraftCorrupt(e.to_string()))?;

        let cover_image = match std::fs::read(self.cover_path()) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StudioError::DraftCorrupt(format!("cover image: {e}"))),
        };
        record.metadata.cover_image = cover_image.clone();

        debug!(saved_at = %record.saved_at, "loaded draft");
        Ok(Some(Draft {
            record,
            audio,
            audio_bytes,
            cover_image,
        }))
    }

    /// Empties the slot. Clearing an empty slot is fine.
    pub fn clear(&self) -> Result<()> {
        remove_if_present(&self.record_path())?;
        remove_if_present(&self.audio_path())?;
        remove_if_present(&self.cover_path())?;
        debug!(key = %self.key, "cleared draft");
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
