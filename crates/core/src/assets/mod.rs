use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Result, StudioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicKind {
    Intro,
    Outro,
}

/// Reference to a remote intro or outro track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicTrack {
    pub id: String,
    pub kind: MusicKind,
    pub audio_url: String,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub is_default: bool,
}

/// Registry of the music tracks available for framing an export.
#[derive(Debug, Default)]
pub struct TrackCatalog {
    tracks: HashMap<String, MusicTrack>,
}

impl TrackCatalog {
    pub fn new() -> Self {
        Self {
            tracks: HashMap::new(),
        }
    }

    pub fn from_tracks(tracks: impl IntoIterator<Item = MusicTrack>) -> Self {
        let mut catalog = Self::new();
        for track in tracks {
            catalog.register(track);
        }
        catalog
    }

    pub fn register(&mut self, track: MusicTrack) {
        self.tracks.insert(track.id.clone(), track);
    }

    pub fn track(&self, id: &str) -> Option<&MusicTrack> {
        self.tracks.get(id)
    }

    /// Tracks of one kind, sorted by id.
    pub fn tracks_of(&self, kind: MusicKind) -> Vec<&MusicTrack> {
        let mut tracks: Vec<&MusicTrack> = self
            .tracks
            .values()
            .filter(|track| track.kind == kind)
            .collect();
        tracks.sort_by(|a, b| a.id.cmp(&b.id));
        tracks
    }

    /// The track flagged as default for `kind`. When several are flagged the
    /// lowest id wins.
    pub fn default_for(&self, kind: MusicKind) -> Option<&MusicTrack> {
        self.tracks_of(kind).into_iter().find(|track| track.is_default)
    }

    /// Resolves an explicit choice, or the default when there is none.
    pub fn resolve(&self, kind: MusicKind, id: Option<&str>) -> Result<Option<&MusicTrack>> {
        match id {
            Some(id) => {
                let track = self.track(id).ok_or_else(|| {
                    StudioError::invalid(format!("unknown music track `{id}`"))
                })?;
                if track.kind != kind {
                    return Err(StudioError::invalid(format!(
                        "track `{id}` is not an {kind:?} track"
                    )));
                }
                Ok(Some(track))
            }
            None => Ok(self.default_for(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, kind: MusicKind, is_default: bool) -> MusicTrack {
        MusicTrack {
            id: id.to_string(),
            kind,
            audio_url: format!("https://media.example/{id}.wav"),
            duration_seconds: 8.0,
            is_default,
        }
    }

    #[test]
    fn finds_defaults_per_kind() {
        let catalog = TrackCatalog::from_tracks([
            track("bells", MusicKind::Intro, false),
            track("organ", MusicKind::Intro, true),
            track("choir", MusicKind::Outro, true),
        ]);

        assert_eq!(catalog.default_for(MusicKind::Intro).unwrap().id, "organ");
        assert_eq!(catalog.default_for(MusicKind::Outro).unwrap().id, "choir");
        assert_eq!(catalog.tracks_of(MusicKind::Intro).len(), 2);
    }

    #[test]
    fn resolves_explicit_choices_and_rejects_mismatches() {
        let catalog = TrackCatalog::from_tracks([
            track("bells", MusicKind::Intro, false),
            track("choir", MusicKind::Outro, true),
        ]);

        let chosen = catalog.resolve(MusicKind::Intro, Some("bells")).unwrap();
        assert_eq!(chosen.unwrap().id, "bells");
        assert!(catalog.resolve(MusicKind::Intro, None).unwrap().is_none());

        let err = catalog.resolve(MusicKind::Intro, Some("choir")).unwrap_err();
        assert!(format!("{err}").contains("choir"));
        assert!(catalog.resolve(MusicKind::Outro, Some("missing")).is_err());
    }
}
