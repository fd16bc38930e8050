//! Bounded undo log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::{edit::TrimWindow, segment::SegmentId, silence::SilenceRegion, PcmBuffer};

/// What an entry restores.
#[derive(Debug, Clone)]
pub enum HistoryEdit {
    /// State captured before a destructive trim: the trim window, the buffer
    /// it applied to and the regions detected on that buffer.
    Trim {
        window: TrimWindow,
        buffer: PcmBuffer,
        silences: Vec<SilenceRegion>,
    },
    /// Region list captured before it was replaced or toggled.
    SilenceSnapshot(Vec<SilenceRegion>),
}

#[derive(Debug, Clone)]
pub struct EditHistoryEntry {
    pub segment_id: SegmentId,
    pub edit: HistoryEdit,
    pub timestamp: DateTime<Utc>,
}

impl EditHistoryEntry {
    pub fn new(segment_id: SegmentId, edit: HistoryEdit) -> Self {
        Self {
            segment_id,
            edit,
            timestamp: Utc::now(),
        }
    }
}

/// Fixed-capacity ring of entries; pushing onto a full ring evicts the
/// oldest entry.
#[derive(Debug)]
pub struct EditHistory {
    entries: VecDeque<EditHistoryEntry>,
    capacity: usize,
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_HISTORY)
    }
}

impl EditHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: EditHistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<EditHistoryEntry> {
        self.entries.pop_back()
    }

    pub fn peek(&self) -> Option<&EditHistoryEntry> {
        self.entries.back()
    }

    /// Drops every entry that targets `segment_id`.
    pub fn forget_segment(&mut self, segment_id: SegmentId) {
        self.entries.retain(|entry| entry.segment_id != segment_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
