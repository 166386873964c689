//! Queue Store
//!
//! Owns both queues, the vote sets and the session table. All queue
//! mutations take the single exclusive lock; `snapshot()` takes the shared
//! lock and therefore never observes a half-applied mutation.
//!
//! Lock discipline: the queue lock and the session lock are never held at
//! the same time, and no lock is held across an await on anything but the
//! lock itself. Events are emitted after the lock is released.

use super::entry::{rank_cmp, QueueEntry};
use partyq_common::events::QueueChangeTrigger;
use partyq_common::{
    Error, EventBus, PartyEvent, PlaybackTrack, QueueType, Result, SessionId, Track, TrackId,
};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One connected client
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: SessionId,
    pub nickname: Option<String>,
    pub is_admin: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Consistent point-in-time view of both queues
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Ranked, best first
    pub normal: Vec<QueueEntry>,
    /// Ranked, best first
    pub admin: Vec<QueueEntry>,
    /// Last playback reported by the scheduler's poll
    pub now_playing: Option<PlaybackTrack>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.normal.len() + self.admin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entry taken off a queue by the scheduler
#[derive(Debug, Clone)]
pub struct PoppedEntry {
    pub entry: QueueEntry,
    pub queue_type: QueueType,
}

#[derive(Debug, Default)]
struct QueueState {
    normal: Vec<QueueEntry>,
    admin: Vec<QueueEntry>,
    next_sequence: u64,
    now_playing: Option<PlaybackTrack>,
}

impl QueueState {
    fn queue(&self, queue_type: QueueType) -> &Vec<QueueEntry> {
        match queue_type {
            QueueType::Normal => &self.normal,
            QueueType::Admin => &self.admin,
        }
    }

    fn queue_mut(&mut self, queue_type: QueueType) -> &mut Vec<QueueEntry> {
        match queue_type {
            QueueType::Normal => &mut self.normal,
            QueueType::Admin => &mut self.admin,
        }
    }

    fn locate(&self, track_id: &TrackId) -> Option<(QueueType, usize)> {
        [QueueType::Admin, QueueType::Normal]
            .into_iter()
            .find_map(|qt| {
                self.queue(qt)
                    .iter()
                    .position(|e| e.track_id() == track_id)
                    .map(|idx| (qt, idx))
            })
    }

    fn take_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    /// Re-derive the order of one queue from votes and sequence numbers
    fn rerank(&mut self, queue_type: QueueType) {
        self.queue_mut(queue_type).sort_by(rank_cmp);
    }
}

/// Vote-ordered queues plus session bookkeeping
pub struct QueueStore {
    state: RwLock<QueueState>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    events: EventBus,
}

impl QueueStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            sessions: RwLock::new(HashMap::new()),
            events,
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Register a new session with a freshly generated id
    pub async fn create_session(&self, nickname: Option<String>, is_admin: bool) -> Session {
        let session = Session {
            session_id: SessionId::generate(),
            nickname,
            is_admin,
            created_at: chrono::Utc::now(),
        };
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        info!(
            "Session created (admin={}, nickname={:?})",
            session.is_admin, session.nickname
        );
        session
    }

    /// Look up a session
    pub async fn session(&self, session_id: &SessionId) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session '{}'", session_id)))
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ------------------------------------------------------------------
    // Queue mutations
    // ------------------------------------------------------------------

    /// Append a track with zero votes
    ///
    /// Fails with `AlreadyExists` if the track is in either queue; the
    /// queues are untouched in that case.
    pub async fn enqueue(&self, track: Track, queue_type: QueueType) -> Result<()> {
        let track_id = track.track_id.clone();
        {
            let mut state = self.state.write().await;
            if let Some((existing, _)) = state.locate(&track_id) {
                return Err(Error::AlreadyExists(format!(
                    "track '{}' is already in the {} queue",
                    track_id, existing
                )));
            }
            let seq = state.take_sequence();
            state.queue_mut(queue_type).push(QueueEntry::new(track, seq));
            state.rerank(queue_type);
        }

        info!("Enqueued {} into {} queue", track_id, queue_type);
        self.emit(QueueChangeTrigger::Enqueued, track_id, queue_type);
        Ok(())
    }

    /// Set or clear one voter's vote on a queued track
    pub async fn vote(&self, track_id: &TrackId, voter: &SessionId, up: bool) -> Result<()> {
        let (queue_type, changed) = {
            let mut state = self.state.write().await;
            let (queue_type, idx) = state
                .locate(track_id)
                .ok_or_else(|| Error::NotFound(format!("track '{}' is not queued", track_id)))?;
            let changed = state.queue_mut(queue_type)[idx].set_vote(voter, up);
            if changed {
                state.rerank(queue_type);
            }
            (queue_type, changed)
        };

        debug!("Vote on {} (up={}, changed={})", track_id, up, changed);
        if changed {
            self.emit(QueueChangeTrigger::Voted, track_id.clone(), queue_type);
        }
        Ok(())
    }

    /// Delete a queued track
    pub async fn remove(&self, track_id: &TrackId) -> Result<QueueEntry> {
        let (queue_type, entry) = {
            let mut state = self.state.write().await;
            let (queue_type, idx) = state
                .locate(track_id)
                .ok_or_else(|| Error::NotFound(format!("track '{}' is not queued", track_id)))?;
            (queue_type, state.queue_mut(queue_type).remove(idx))
        };

        info!("Removed {} from {} queue", track_id, queue_type);
        self.emit(QueueChangeTrigger::Removed, track_id.clone(), queue_type);
        Ok(entry)
    }

    /// Relocate a queued track to `target`
    ///
    /// Votes are kept; the entry gets a fresh insertion sequence, so it
    /// lands behind every entry of equal score in the destination. Moving
    /// into the queue the entry is already in changes nothing.
    pub async fn move_entry(&self, track_id: &TrackId, target: QueueType) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let (source, idx) = state
                .locate(track_id)
                .ok_or_else(|| Error::NotFound(format!("track '{}' is not queued", track_id)))?;
            if source == target {
                debug!("{} already in {} queue, move skipped", track_id, target);
                return Ok(());
            }
            let mut entry = state.queue_mut(source).remove(idx);
            entry.insertion_sequence = state.take_sequence();
            state.queue_mut(target).push(entry);
            state.rerank(target);
        }

        info!("Moved {} to {} queue", track_id, target);
        self.emit(QueueChangeTrigger::Moved, track_id.clone(), target);
        Ok(())
    }

    /// Remove and return the top-ranked entry, Admin queue first
    ///
    /// Called only by the scheduler.
    pub async fn pop_next(&self) -> Option<PoppedEntry> {
        let popped = {
            let mut state = self.state.write().await;
            [QueueType::Admin, QueueType::Normal]
                .into_iter()
                .find(|qt| !state.queue(*qt).is_empty())
                .map(|queue_type| PoppedEntry {
                    entry: state.queue_mut(queue_type).remove(0),
                    queue_type,
                })
        };

        if let Some(p) = &popped {
            info!(
                "Popped {} from {} queue ({} votes)",
                p.entry.track_id(),
                p.queue_type,
                p.entry.score()
            );
            self.emit(
                QueueChangeTrigger::Popped,
                p.entry.track_id().clone(),
                p.queue_type,
            );
        }
        popped
    }

    /// Put a popped entry back where it came from
    ///
    /// Used when handing the entry to the playback service failed. Votes and
    /// the original insertion sequence are kept, so the entry regains its
    /// rank. If the same track was enqueued again in the meantime the newer
    /// entry wins and this returns false.
    pub async fn restore(&self, popped: PoppedEntry) -> bool {
        let track_id = popped.entry.track_id().clone();
        let queue_type = popped.queue_type;
        {
            let mut state = self.state.write().await;
            if state.locate(&track_id).is_some() {
                debug!("{} re-enqueued meanwhile, restore skipped", track_id);
                return false;
            }
            state.queue_mut(queue_type).push(popped.entry);
            state.rerank(queue_type);
        }

        info!("Restored {} to {} queue", track_id, queue_type);
        self.emit(QueueChangeTrigger::Restored, track_id, queue_type);
        true
    }

    /// Record what the playback service last reported
    pub async fn set_now_playing(&self, playback: Option<PlaybackTrack>) {
        self.state.write().await.now_playing = playback;
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.read().await;
        QueueSnapshot {
            normal: state.normal.clone(),
            admin: state.admin.clone(),
            now_playing: state.now_playing.clone(),
        }
    }

    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state.normal.is_empty() && state.admin.is_empty()
    }

    pub async fn contains(&self, track_id: &TrackId) -> bool {
        self.state.read().await.locate(track_id).is_some()
    }

    fn emit(&self, trigger: QueueChangeTrigger, track_id: TrackId, queue_type: QueueType) {
        self.events.emit_lossy(PartyEvent::QueueChanged {
            trigger,
            track_id,
            queue_type,
            timestamp: chrono::Utc::now(),
        });
    }
}
