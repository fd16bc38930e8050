use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Stages of an export, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Fetch,
    Render,
    Encode,
    Tag,
}

impl ExportStage {
    /// Share of the overall progress owned by this stage, in percent.
    pub fn span(self) -> (f32, f32) {
        match self {
            Self::Fetch => (0.0, 20.0),
            Self::Render => (20.0, 60.0),
            Self::Encode => (60.0, 90.0),
            Self::Tag => (90.0, 100.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub stage: ExportStage,
    /// Completion of the current stage in `[0, 1]`.
    pub stage_fraction: f32,
    /// Overall completion in `[0, 100]`; never decreases within one export.
    pub total_percent: f32,
}

/// Receives progress updates from an export.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: ExportProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(ExportProgress) + Send + Sync,
{
    fn on_progress(&self, progress: ExportProgress) {
        self(progress)
    }
}

impl ProgressSink for UnboundedSender<ExportProgress> {
    fn on_progress(&self, progress: ExportProgress) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.send(progress);
    }
}

/// Sink that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _progress: ExportProgress) {}
}

/// Maps per-stage fractions onto the overall scale and clamps the result so
/// observers never see progress go backwards.
#[derive(Clone)]
pub(crate) struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    // Bit pattern of the highest total reported so far. Non-negative f32
    // values order the same way as their bits.
    high_water: Arc<AtomicU32>,
}

impl ProgressTracker {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            high_water: Arc::new(AtomicU32::new(0.0_f32.to_bits())),
        }
    }

    pub(crate) fn report(&self, stage: ExportStage, fraction: f32) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (start, end) = stage.span();
        let candidate = start + (end - start) * fraction;
        let previous = self.high_water.fetch_max(candidate.to_bits(), Ordering::AcqRel);
        let total_percent = candidate.max(f32::from_bits(previous));

        self.sink.on_progress(ExportProgress {
            stage,
            stage_fraction: fraction,
            total_percent,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn collecting() -> (Arc<Mutex<Vec<ExportProgress>>>, ProgressTracker) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |progress: ExportProgress| seen.lock().unwrap().push(progress)
        };
        (seen, ProgressTracker::new(Arc::new(sink)))
    }

    #[test]
    fn maps_stage_fractions_onto_the_total() {
        let (seen, tracker) = collecting();
        tracker.report(ExportStage::Fetch, 0.5);
        tracker.report(ExportStage::Render, 0.5);
        tracker.report(ExportStage::Encode, 1.0);
        tracker.report(ExportStage::Tag, 1.0);

        let totals: Vec<f32> = seen.lock().unwrap().iter().map(|p| p.total_percent).collect();
        assert_eq!(totals, vec![10.0, 40.0, 90.0, 100.0]);
    }

    #[test]
    fn never_reports_a_lower_total() {
        let (seen, tracker) = collecting();
        tracker.report(ExportStage::Encode, 0.5);
        tracker.report(ExportStage::Render, 0.0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[1].total_percent, 75.0);
        assert_eq!(seen[1].stage, ExportStage::Render);
    }

    #[tokio::test]
    async fn channel_sink_forwards_updates() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let tracker = ProgressTracker::new(Arc::new(tx));
        tracker.report(ExportStage::Tag, 0.0);
        assert_eq!(rx.recv().await.unwrap().total_percent, 90.0);
    }
}
