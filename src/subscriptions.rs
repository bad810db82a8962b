//! Reference counting for watch interest.
//!
//! Multiple UI surfaces can watch the same participant at once; the remote
//! subscription must be opened exactly once for the first of them and closed
//! exactly once when the last loses interest. [`WatchLedger`] tracks that
//! per-participant count and reports the edges.

use std::collections::BTreeMap;

use crate::ParticipantId;

/// What a [`WatchLedger::decrement`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
    /// The participant was not being watched at all.
    NotWatched,
    /// Interest remains; the subscription stays open.
    Retained,
    /// The last interest was released; the subscription should be closed.
    Released,
}

/// Per-participant watch interest counts.
///
/// Keys are kept in id order so iteration during reconnect is deterministic.
#[derive(Debug, Default)]
pub(crate) struct WatchLedger {
    counts: BTreeMap<ParticipantId, u32>,
}

impl WatchLedger {
    pub(crate) fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Registers interest in `id`. Returns `true` when this is the first
    /// interest, meaning a remote subscription should be opened.
    pub(crate) fn increment(&mut self, id: ParticipantId) -> bool {
        let count = self.counts.entry(id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Releases one interest in `id`.
    pub(crate) fn decrement(&mut self, id: ParticipantId) -> ReleaseOutcome {
        match self.counts.get_mut(&id) {
            None => ReleaseOutcome::NotWatched,
            Some(count) if *count > 1 => {
                *count -= 1;
                ReleaseOutcome::Retained
            }
            Some(_) => {
                self.counts.remove(&id);
                ReleaseOutcome::Released
            }
        }
    }

    /// Whether any interest in `id` is held.
    pub(crate) fn contains(&self, id: ParticipantId) -> bool {
        self.counts.contains_key(&id)
    }

    /// All participants with held interest, in id order.
    pub(crate) fn held_ids(&self) -> Vec<ParticipantId> {
        self.counts.keys().copied().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
