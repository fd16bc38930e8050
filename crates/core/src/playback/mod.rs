//! Preview playback bookkeeping.
//!
//! The session owns at most one [`PlaybackResources`] at a time. It is built
//! when playback starts and released before anything it refers to goes away.

use std::time::Instant;

use tracing::debug;

use crate::{enhance::PreviewGraph, segment::SegmentId, Result};

/// Wall-clock playback cursor. The position is the seek offset plus the time
/// elapsed since the clock last started, capped at the programme length.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    offset_seconds: f64,
    started_at: Option<Instant>,
    duration_seconds: f64,
}

impl PlaybackClock {
    /// A running clock positioned at zero.
    pub fn start(duration_seconds: f64) -> Self {
        Self {
            offset_seconds: 0.0,
            started_at: Some(Instant::now()),
            duration_seconds: duration_seconds.max(0.0),
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && !self.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.position_seconds() >= self.duration_seconds
    }

    pub fn position_seconds(&self) -> f64 {
        let elapsed = self
            .started_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        (self.offset_seconds + elapsed).min(self.duration_seconds)
    }

    pub fn pause(&mut self) {
        self.offset_seconds = self.position_seconds();
        self.started_at = None;
    }

    pub fn resume(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Moves the cursor, keeping the running/paused state.
    pub fn seek(&mut self, seconds: f64) {
        self.offset_seconds = seconds.clamp(0.0, self.duration_seconds);
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn reset(&mut self) {
        self.seek(0.0);
    }
}

/// What is being previewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSource {
    Segment(SegmentId),
    Composite,
}

/// Everything an in-flight preview holds on to.
#[derive(Debug)]
pub struct PlaybackResources {
    clock: PlaybackClock,
    source: PlaybackSource,
    graph: Option<PreviewGraph>,
}

impl PlaybackResources {
    pub fn new(source: PlaybackSource, duration_seconds: f64, graph: Option<PreviewGraph>) -> Self {
        debug!(?source, duration_seconds, "playback started");
        Self {
            clock: PlaybackClock::start(duration_seconds),
            source,
            graph,
        }
    }

    pub fn source(&self) -> PlaybackSource {
        self.source
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut PlaybackClock {
        &mut self.clock
    }

    pub fn graph(&self) -> Option<&PreviewGraph> {
        self.graph.as_ref()
    }

    pub fn plays_segment(&self, id: SegmentId) -> bool {
        self.source == PlaybackSource::Segment(id)
    }

    /// Pulls one interleaved block through the preview graph, if any.
    pub fn process_block(&self, block: &mut [f32]) -> Result<()> {
        match &self.graph {
            Some(graph) => graph.process_block(block),
            None => Ok(()),
        }
    }

    /// Stops the clock and lets go of the graph handle. The graph itself
    /// belongs to the session and is disposed there.
    pub fn release(mut self) -> f64 {
        self.clock.pause();
        let position = self.clock.position_seconds();
        self.graph = None;
        debug!(source = ?self.source, position, "playback released");
        position
    }
}
