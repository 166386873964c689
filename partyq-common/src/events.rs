//! Event types for the PartyQ event system
//!
//! The queue store and the scheduler publish events here; the HTTP layer
//! forwards them to clients as Server-Sent Events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{QueueType, SchedulerState, TrackId};

/// Why the queue contents changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueChangeTrigger {
    Enqueued,
    Voted,
    Removed,
    Moved,
    /// Scheduler took the top entry for playback
    Popped,
    /// A popped entry went back after a failed play
    Restored,
}

/// PartyQ event types
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PartyEvent {
    /// Queue contents or ordering changed
    QueueChanged {
        trigger: QueueChangeTrigger,
        track_id: TrackId,
        queue_type: QueueType,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Scheduler handed a track to the playback service
    TrackStarted {
        track_id: TrackId,
        title: String,
        artist: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Scheduler moved between states
    SchedulerStateChanged {
        old_state: SchedulerState,
        new_state: SchedulerState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Device volume changed through player control
    VolumeChanged {
        /// Volume in percent (0-100)
        volume: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PartyEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PartyEvent::QueueChanged { .. } => "QueueChanged",
            PartyEvent::TrackStarted { .. } => "TrackStarted",
            PartyEvent::SchedulerStateChanged { .. } => "SchedulerStateChanged",
            PartyEvent::VolumeChanged { .. } => "VolumeChanged",
        }
    }
}

/// Central event distribution bus
///
/// Wraps a `tokio::broadcast` channel: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PartyEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PartyEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PartyEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
