//! Queue entries and the ranking rule
//!
//! Ranking within one queue is a pure function of (votes descending,
//! insertion sequence ascending). Sequence numbers are unique, so the order
//! is total and deterministic.

use partyq_common::{SessionId, Track, TrackId};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

/// A track placed into one of the two queues
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub track: Track,
    /// Sessions currently voting for this track; the cardinality is the score
    #[serde(skip)]
    pub votes: HashSet<SessionId>,
    /// Monotonic position used for tie-break and FIFO fallback
    pub insertion_sequence: u64,
}

impl QueueEntry {
    pub fn new(track: Track, insertion_sequence: u64) -> Self {
        Self {
            track,
            votes: HashSet::new(),
            insertion_sequence,
        }
    }

    pub fn track_id(&self) -> &TrackId {
        &self.track.track_id
    }

    /// Current score
    pub fn score(&self) -> usize {
        self.votes.len()
    }

    pub fn has_vote(&self, voter: &SessionId) -> bool {
        self.votes.contains(voter)
    }

    /// Set or clear one voter's vote
    ///
    /// A voter holds at most one vote per entry, so repeating the same call
    /// changes nothing. Returns true if the vote set changed.
    pub fn set_vote(&mut self, voter: &SessionId, up: bool) -> bool {
        if up {
            self.votes.insert(voter.clone())
        } else {
            self.votes.remove(voter)
        }
    }
}

/// Ordering of two entries in the same queue (best first)
pub fn rank_cmp(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.score()
        .cmp(&a.score())
        .then_with(|| a.insertion_sequence.cmp(&b.insertion_sequence))
}
