//! Live enhancement graph used during preview playback.
//!
//! The graph keeps one [`EnhancementChain`] alive for the lifetime of a
//! segment view. Engaging or bypassing only switches the signal path around
//! the chain, so filter memory and playback position carry across a toggle.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::{Result, StudioError};

use super::{EnhancementChain, EnhancementSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Bypassed,
    Engaged,
}

#[derive(Debug)]
struct GraphInner {
    state: GraphState,
    settings: EnhancementSettings,
    chain: EnhancementChain,
    disposed: bool,
}

/// Handle to a live graph. Clones share the same graph, so the playback side
/// and the session always agree on its state.
#[derive(Debug, Clone)]
pub struct PreviewGraph {
    shared: Arc<Mutex<GraphInner>>,
}

impl PreviewGraph {
    pub fn new(sample_rate: u32, channels: usize, settings: EnhancementSettings) -> Self {
        let state = if settings.enabled {
            GraphState::Engaged
        } else {
            GraphState::Bypassed
        };
        Self {
            shared: Arc::new(Mutex::new(GraphInner {
                state,
                chain: EnhancementChain::new(sample_rate, channels, &settings),
                settings,
                disposed: false,
            })),
        }
    }

    pub fn state(&self) -> Result<GraphState> {
        Ok(self.lock()?.state)
    }

    pub fn settings(&self) -> Result<EnhancementSettings> {
        Ok(self.lock()?.settings)
    }

    pub fn engage(&self) -> Result<()> {
        self.transition(GraphState::Engaged)
    }

    pub fn bypass(&self) -> Result<()> {
        self.transition(GraphState::Bypassed)
    }

    /// Pushes new parameters into the running chain. A change of the
    /// `enabled` flag engages or bypasses the graph; anything else is
    /// retuned in place without a state change.
    pub fn update(&self, settings: EnhancementSettings) -> Result<()> {
        settings.validate()?;
        let mut inner = self.lock_live()?;
        inner.chain.configure(&settings);
        inner.settings = settings;
        inner.state = if settings.enabled {
            GraphState::Engaged
        } else {
            GraphState::Bypassed
        };
        Ok(())
    }

    /// Runs one interleaved block through the graph. A bypassed graph passes
    /// the block through untouched. The whole block sees a single state.
    pub fn process_block(&self, block: &mut [f32]) -> Result<()> {
        let mut inner = self.lock_live()?;
        if inner.state == GraphState::Engaged {
            inner.chain.process_interleaved(block);
        }
        Ok(())
    }

    /// Tears the graph down. Later calls other than `dispose` and
    /// `is_disposed` fail.
    pub fn dispose(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.disposed {
            inner.chain.reset();
            inner.disposed = true;
            debug!("disposed preview graph");
        }
        Ok(())
    }

    pub fn is_disposed(&self) -> Result<bool> {
        Ok(self.lock()?.disposed)
    }

    fn transition(&self, target: GraphState) -> Result<()> {
        let mut inner = self.lock_live()?;
        if inner.state != target {
            debug!(from = ?inner.state, to = ?target, "preview graph transition");
            inner.state = target;
            inner.settings.enabled = target == GraphState::Engaged;
        }
        Ok(())
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, GraphInner>> {
        let inner = self.lock()?;
        if inner.disposed {
            return Err(StudioError::msg("preview graph has been disposed"));
        }
        Ok(inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, GraphInner>> {
        self.shared
            .lock()
            .map_err(|_| StudioError::Poisoned("preview graph"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boosted() -> EnhancementSettings {
        EnhancementSettings {
            enabled: true,
            gain_db: 6.0,
            ..Default::default()
        }
    }

    #[test]
    fn initial_state_follows_the_enabled_flag() {
        let graph = PreviewGraph::new(48_000, 2, EnhancementSettings::default());
        assert_eq!(graph.state().unwrap(), GraphState::Bypassed);
        let graph = PreviewGraph::new(48_000, 2, boosted());
        assert_eq!(graph.state().unwrap(), GraphState::Engaged);
    }

    #[test]
    fn bypassed_blocks_pass_through() {
        let graph = PreviewGraph::new(48_000, 1, boosted());
        graph.bypass().unwrap();
        let mut block = vec![0.25_f32; 64];
        graph.process_block(&mut block).unwrap();
        assert!(block.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn engaged_blocks_are_processed() {
        let graph = PreviewGraph::new(48_000, 1, EnhancementSettings::default());
        graph.engage().unwrap();
        graph
            .update(EnhancementSettings {
                enabled: true,
                gain_db: 20.0,
                ..Default::default()
            })
            .unwrap();
        let mut block = vec![0.01_f32; 64];
        graph.process_block(&mut block).unwrap();
        assert!((block[0] - 0.1).abs() < 1e-4);
    }

    #[test]
    fn update_toggles_state_without_rebuilding() {
        let graph = PreviewGraph::new(48_000, 2, boosted());
        let clone = graph.clone();
        graph
            .update(EnhancementSettings {
                enabled: false,
                ..boosted()
            })
            .unwrap();
        assert_eq!(clone.state().unwrap(), GraphState::Bypassed);
        assert_eq!(clone.settings().unwrap().gain_db, 6.0);
    }

    #[test]
    fn disposed_graph_rejects_work() {
        let graph = PreviewGraph::new(48_000, 1, boosted());
        graph.dispose().unwrap();
        graph.dispose().unwrap();
        assert!(graph.is_disposed().unwrap());
        assert!(graph.process_block(&mut [0.0; 4]).is_err());
        assert!(graph.engage().is_err());
    }
}
