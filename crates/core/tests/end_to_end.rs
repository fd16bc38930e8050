use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use sermon_studio_core::{
    decode_bytes, export::encode_wav, ExportProgress, ExportSettings, Exporter, Metadata, MusicKind,
    MusicSettings, MusicTrack, PcmBuffer, ProgressSink, Result, Session, SilenceOptions,
    StudioError, TrackCatalog, TrackFetcher, TrimWindow,
};
use tokio_util::sync::CancellationToken;

const RATE: u32 = 8_000;

fn tone_samples(seconds: f64) -> Vec<f32> {
    let frames = (seconds * RATE as f64).round() as usize;
    (0..frames)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / RATE as f32).sin())
        .collect()
}

fn tone(seconds: f64) -> PcmBuffer {
    PcmBuffer::new(RATE, vec![tone_samples(seconds)]).unwrap()
}

/// A tone with digital silence over `[gap_start, gap_end)`.
fn tone_with_gap(seconds: f64, gap_start: f64, gap_end: f64) -> PcmBuffer {
    let mut samples = tone_samples(seconds);
    let from = (gap_start * RATE as f64).round() as usize;
    let to = (gap_end * RATE as f64).round() as usize;
    samples[from..to].iter_mut().for_each(|s| *s = 0.0);
    PcmBuffer::new(RATE, vec![samples]).unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-6, "expected {expected}, got {actual}");
}

fn track(id: &str, kind: MusicKind) -> MusicTrack {
    MusicTrack {
        id: id.to_string(),
        kind,
        audio_url: format!("https://media.example/{id}.wav"),
        duration_seconds: 2.0,
        is_default: true,
    }
}

/// Serves a fixed tone for every track, or fails every fetch.
struct StubFetcher {
    fail: bool,
}

#[async_trait]
impl TrackFetcher for StubFetcher {
    async fn fetch(&self, track: &MusicTrack) -> Result<PcmBuffer> {
        if self.fail {
            Err(StudioError::fetch(&track.audio_url, "connection refused"))
        } else {
            Ok(tone(track.duration_seconds))
        }
    }
}

fn exporter(fail: bool) -> Exporter {
    Exporter::new(Arc::new(StubFetcher { fail }), ExportSettings::default())
}

fn recorded_progress() -> (Arc<Mutex<Vec<ExportProgress>>>, Arc<dyn ProgressSink>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink: Arc<dyn ProgressSink> =
        Arc::new(move |progress: ExportProgress| sink_seen.lock().unwrap().push(progress));
    (seen, sink)
}

#[test]
fn trimmed_segment_with_one_removed_region_renders_108_seconds() {
    let mut session = Session::default();
    session
        .add_buffer("sermon.wav", tone_with_gap(120.0, 40.1, 41.9))
        .unwrap();

    let regions = session.detect_silences(None).unwrap().to_vec();
    assert_eq!(regions.len(), 1);
    assert_close(regions[0].start, 40.0);
    assert_close(regions[0].end, 42.0);

    session.toggle_silence_removal(regions[0].id).unwrap();
    session.set_trim(5.0, 115.0).unwrap();

    let duration = session.render_composite(None, None).unwrap().duration_seconds();
    assert_close(duration, 108.0);
}

#[test]
fn two_crossfaded_segments_render_149_5_seconds() {
    let mut session = Session::default();
    session.add_buffer("first.wav", tone(60.0)).unwrap();
    session.add_buffer("second.wav", tone(90.0)).unwrap();

    let duration = session.render_composite(None, None).unwrap().duration_seconds();
    assert_close(duration, 149.5);
}

#[test]
fn one_second_gap_is_detected_with_padding() {
    let mut session = Session::default();
    session.add_buffer("gap.wav", tone_with_gap(20.0, 10.0, 11.0)).unwrap();

    let options = SilenceOptions {
        threshold_db: -40.0,
        min_silence_duration_ms: 300.0,
        padding_ms: 100.0,
        ..Default::default()
    };
    let first = session.detect_silences(Some(options)).unwrap().to_vec();
    assert_eq!(first.len(), 1);
    assert_close(first[0].start, 9.9);
    assert_close(first[0].end, 11.1);
    assert!(!first[0].marked_for_removal);

    let again = session.detect_silences(Some(options)).unwrap();
    assert_eq!(again, first.as_slice());
}

#[test]
fn undo_restores_the_trim_window_exactly() {
    let mut session = Session::default();
    let id = session.add_buffer("take.wav", tone(30.0)).unwrap();
    session.set_trim(1.25, 27.5).unwrap();
    assert!(session.apply_trim().unwrap());
    assert_close(session.segment(id).unwrap().duration(), 26.25);

    assert!(session.undo().unwrap());
    assert_eq!(
        session.active_trim(),
        Some(TrimWindow {
            start: 1.25,
            end: 27.5
        })
    );
    assert_close(session.segment(id).unwrap().duration(), 30.0);
}

#[tokio::test]
async fn failed_music_fetch_aborts_the_export_and_keeps_the_session() {
    let mut session = Session::default();
    let id = session.add_buffer("take.wav", tone(10.0)).unwrap();
    session.set_trim(1.0, 9.0).unwrap();
    let catalog = TrackCatalog::from_tracks([
        track("organ", MusicKind::Intro),
        track("choir", MusicKind::Outro),
    ]);
    session.set_music(
        MusicSettings {
            include_intro: true,
            include_outro: true,
            ..Default::default()
        }
        .with_defaults(&catalog),
    );

    let (seen, sink) = recorded_progress();
    let err = session
        .export(&exporter(true), sink, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StudioError::Fetch { .. }));
    assert!(seen.lock().unwrap().iter().all(|p| p.total_percent <= 20.0));
    assert_eq!(session.segments().len(), 1);
    assert_eq!(
        session.segment(id).unwrap().trim(),
        TrimWindow { start: 1.0, end: 9.0 }
    );
}

#[tokio::test]
async fn cancelled_export_produces_nothing() {
    let mut session = Session::default();
    session.add_buffer("take.wav", tone(4.0)).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (_, sink) = recorded_progress();
    let err = session.export(&exporter(false), sink, cancel).await.unwrap_err();
    assert!(matches!(err, StudioError::Cancelled));
    assert!(!session.is_empty());
}

#[tokio::test]
async fn successful_export_is_framed_tagged_and_clears_the_session() {
    let mut session = Session::default();
    session.add_buffer("take.wav", tone(10.0)).unwrap();
    let catalog = TrackCatalog::from_tracks([
        track("organ", MusicKind::Intro),
        track("choir", MusicKind::Outro),
    ]);
    session.set_music(
        MusicSettings {
            include_intro: true,
            include_outro: true,
            ..Default::default()
        }
        .with_defaults(&catalog),
    );
    session.set_metadata(Metadata {
        title: "Grace & Peace".to_string(),
        speaker: "Ana Ruiz".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 3, 10),
        ..Default::default()
    });

    let (seen, sink) = recorded_progress();
    let output = session
        .export(&exporter(false), sink, CancellationToken::new())
        .await
        .unwrap();

    // 2 s intro + 10 s body + 2 s outro, less two 0.5 s overlaps.
    assert_close(output.duration_seconds, 13.0);
    assert_eq!(output.filename, "export_grace_peace_2024-03-10.mp3");
    assert_eq!(output.mime_type, "audio/mpeg");
    assert!(output.tagged);
    assert!(output.warnings.is_empty());

    let tag = id3::Tag::read_from2(std::io::Cursor::new(&output.bytes)).unwrap();
    assert_eq!(id3::TagLike::title(&tag), Some("Grace & Peace"));
    let decoded = decode_bytes(&output.filename, &output.bytes).unwrap();
    let seconds = decoded.buffer.duration_seconds();
    assert!((12.95..13.6).contains(&seconds), "decoded {seconds} s");

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0].total_percent <= w[1].total_percent));
    assert_eq!(seen.last().map(|p| p.total_percent), Some(100.0));
    assert!(session.is_empty());
}

#[tokio::test]
async fn unreadable_cover_art_exports_untagged_with_a_warning() {
    let mut session = Session::default();
    session.add_buffer("take.wav", tone(3.0)).unwrap();
    session.set_metadata(Metadata {
        title: "Hope".to_string(),
        speaker: "Ana Ruiz".to_string(),
        cover_image: Some(vec![1, 2, 3, 4]),
        ..Default::default()
    });

    let (seen, sink) = recorded_progress();
    let output = session
        .export(&exporter(false), sink, CancellationToken::new())
        .await
        .unwrap();

    assert!(!output.tagged);
    assert_eq!(output.warnings.len(), 1);
    assert!(!output.bytes.starts_with(b"ID3"));
    let decoded = decode_bytes(&output.filename, &output.bytes).unwrap();
    assert!(decoded.buffer.duration_seconds() >= 2.95);
    assert_eq!(seen.lock().unwrap().last().map(|p| p.total_percent), Some(100.0));
    assert!(session.is_empty());
}

#[test]
fn draft_round_trip_restores_the_edit() {
    let dir = tempfile::tempdir().unwrap();
    let store = sermon_studio_core::DraftStore::new(dir.path());
    let catalog = TrackCatalog::from_tracks([track("organ", MusicKind::Intro)]);

    let wav = encode_wav(&tone_with_gap(6.0, 2.0, 3.0)).unwrap();
    let mut session = Session::default();
    session.load_file("sermon.wav", &wav).unwrap();
    session.detect_silences(None).unwrap();
    session.toggle_silence_removal(0).unwrap();
    session.set_trim(0.5, 5.5).unwrap();
    session.set_music(
        MusicSettings {
            include_intro: true,
            ..Default::default()
        }
        .with_defaults(&catalog),
    );
    session.set_metadata(Metadata {
        title: "Hope".to_string(),
        ..Default::default()
    });
    session.save_draft(&store).unwrap();

    let draft = store.load().unwrap();
    let mut restored = Session::default();
    restored.restore_draft(draft, &catalog).unwrap();

    assert_eq!(restored.active_trim(), Some(TrimWindow { start: 0.5, end: 5.5 }));
    assert_eq!(restored.active_silences(), session.active_silences());
    assert!(restored.active_silences()[0].marked_for_removal);
    assert_eq!(restored.metadata().title, "Hope");
    assert_eq!(
        restored.music().intro_track.as_ref().map(|t| t.id.as_str()),
        Some("organ")
    );
}

#[test]
fn malformed_input_is_a_decode_error() {
    let mut session = Session::default();
    let err = session.load_file("broken.mp3", b"definitely not audio").unwrap_err();
    assert!(matches!(err, StudioError::Decode(_)));
    assert!(session.is_empty());
}
