use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use sermon_studio_core::{
    decode_bytes, DraftStore, EnhancementSettings, ExportProgress, ExportSettings, Exporter,
    HttpTrackFetcher, JoinMode, LevelAnalyzer, Metadata, MusicSettings, MusicTrack, Session,
    SilenceOptions, StudioConfig, StudioError,
};
use sermon_studio_core::export::WavEncoder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> sermon_studio_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StudioConfig::from_path(path)?,
        None => StudioConfig::default(),
    };

    match cli.command {
        Commands::Inspect { input } => run_inspect(&input, &config),
        Commands::Detect { input, overrides } => run_detect(&input, overrides.apply(config.silence)),
        Commands::Export {
            manifest,
            output,
            wav,
        } => run_export(&manifest, &output, wav, config).await,
        Commands::Draft { action } => run_draft(action),
    }
}

fn run_inspect(input: &Path, config: &StudioConfig) -> sermon_studio_core::Result<()> {
    tracing::info!(?input, "inspecting recording");
    let decoded = decode_file(input)?;
    let summary = LevelAnalyzer::new(config.silence.window_ms)
        .with_spectrum(true)
        .summarize(&decoded.buffer)?;

    let report = serde_json::json!({ "file": decoded.info, "levels": summary });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_detect(input: &Path, options: SilenceOptions) -> sermon_studio_core::Result<()> {
    tracing::info!(?input, threshold_db = options.threshold_db, "detecting silences");
    let decoded = decode_file(input)?;
    let regions = sermon_studio_core::detect_silences(&decoded.buffer, &options)?;
    println!("{}", serde_json::to_string_pretty(&regions)?);
    Ok(())
}

async fn run_export(
    manifest_path: &Path,
    output_dir: &Path,
    wav: bool,
    config: StudioConfig,
) -> sermon_studio_core::Result<()> {
    let manifest: ProjectManifest = serde_json::from_str(&std::fs::read_to_string(manifest_path)?)?;
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    tracing::info!(?manifest_path, segments = manifest.segments.len(), "building session");

    let mut exporter = Exporter::new(
        Arc::new(HttpTrackFetcher::new(Duration::from_secs(config.fetch_timeout_secs))?),
        ExportSettings::from_config(&config),
    );
    if wav {
        exporter = exporter.with_encoder(Arc::new(WavEncoder));
    }
    let mut session = Session::new(config);
    for entry in &manifest.segments {
        entry.load_into(&mut session, base)?;
    }

    session.set_music(MusicSettings {
        include_intro: manifest.music.intro.is_some(),
        include_outro: manifest.music.outro.is_some(),
        intro_track: manifest.music.intro,
        outro_track: manifest.music.outro,
    });
    let mut metadata = manifest.metadata;
    if let Some(cover) = &manifest.cover_image {
        metadata.cover_image = Some(std::fs::read(base.join(cover))?);
    }
    session.set_metadata(metadata);

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ExportProgress>();
    let reporter = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            tracing::info!(
                stage = ?progress.stage,
                percent = progress.total_percent.round(),
                "export progress"
            );
        }
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling export");
            on_interrupt.cancel();
        }
    });

    let result = session.export(&exporter, Arc::new(progress_tx), cancel).await;
    // The sender went away with the export, so the reporter drains and ends.
    let _ = reporter.await;
    let export = result?;

    for warning in &export.warnings {
        tracing::warn!(%warning, "export finished with a warning");
    }
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(&export.filename);
    std::fs::write(&path, &export.bytes)?;
    tracing::info!(
        path = %path.display(),
        seconds = export.duration_seconds,
        tagged = export.tagged,
        "export written"
    );
    Ok(())
}

fn run_draft(action: DraftCommand) -> sermon_studio_core::Result<()> {
    match action {
        DraftCommand::Show { dir } => {
            let store = DraftStore::new(dir);
            match store.load() {
                Some(draft) => println!("{}", serde_json::to_string_pretty(&draft.record)?),
                None => println!("no draft stored in {}", store.root().display()),
            }
        }
        DraftCommand::Clear { dir } => {
            let store = DraftStore::new(dir);
            store.clear()?;
            tracing::info!(dir = %store.root().display(), "draft cleared");
        }
    }
    Ok(())
}

fn decode_file(path: &Path) -> sermon_studio_core::Result<sermon_studio_core::DecodedAudio> {
    let bytes = std::fs::read(path)?;
    decode_bytes(&file_name(path), &bytes)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// A project to export: segment files in play order plus music and tags.
#[derive(Debug, Deserialize)]
struct ProjectManifest {
    segments: Vec<SegmentEntry>,
    #[serde(default)]
    music: MusicEntry,
    #[serde(default)]
    metadata: Metadata,
    /// PNG or JPEG file, relative to the manifest.
    #[serde(default)]
    cover_image: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SegmentEntry {
    path: PathBuf,
    #[serde(default)]
    trim_start: Option<f64>,
    #[serde(default)]
    trim_end: Option<f64>,
    /// Detect silences with the configured options and remove all of them.
    #[serde(default)]
    remove_silences: bool,
    #[serde(default)]
    join_mode: JoinMode,
    #[serde(default)]
    enhancement: EnhancementSettings,
}

impl SegmentEntry {
    fn load_into(&self, session: &mut Session, base: &Path) -> sermon_studio_core::Result<()> {
        let path = base.join(&self.path);
        let bytes = std::fs::read(&path)?;
        let id = session.add_segment(&file_name(&path), &bytes)?;
        let duration = session
            .segment(id)
            .map(|segment| segment.duration())
            .ok_or_else(|| StudioError::UnknownSegment(id.to_string()))?;

        session.set_trim(
            self.trim_start.unwrap_or(0.0),
            self.trim_end.unwrap_or(duration),
        )?;
        if self.remove_silences {
            let ids: Vec<u32> = session
                .detect_silences(None)?
                .iter()
                .map(|region| region.id)
                .collect();
            for region in ids {
                session.toggle_silence_removal(region)?;
            }
        }
        session.set_join_mode(id, self.join_mode)?;
        session.set_enhancement(self.enhancement)?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct MusicEntry {
    #[serde(default)]
    intro: Option<MusicTrack>,
    #[serde(default)]
    outro: Option<MusicTrack>,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Spoken-word recording editor and exporter", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print file details and a level summary for a recording.
    Inspect {
        input: PathBuf,
    },
    /// Print the silent regions of a recording as JSON.
    Detect {
        input: PathBuf,
        #[command(flatten)]
        overrides: SilenceOverrides,
    },
    /// Render and encode a project manifest.
    Export {
        manifest: PathBuf,
        /// Directory the exported file is written to.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Write lossless 16-bit WAV instead of MP3.
        #[arg(long)]
        wav: bool,
    },
    /// Inspect or clear the stored draft.
    Draft {
        #[command(subcommand)]
        action: DraftCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DraftCommand {
    Show {
        #[arg(long)]
        dir: PathBuf,
    },
    Clear {
        #[arg(long)]
        dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SilenceOverrides {
    #[arg(long, allow_hyphen_values = true)]
    threshold_db: Option<f32>,
    #[arg(long)]
    min_duration_ms: Option<f64>,
    #[arg(long)]
    padding_ms: Option<f64>,
}

impl SilenceOverrides {
    fn apply(&self, mut options: SilenceOptions) -> SilenceOptions {
        if let Some(threshold) = self.threshold_db {
            options.threshold_db = threshold;
        }
        if let Some(min) = self.min_duration_ms {
            options.min_silence_duration_ms = min;
        }
        if let Some(padding) = self.padding_ms {
            options.padding_ms = padding;
        }
        options
    }
}
