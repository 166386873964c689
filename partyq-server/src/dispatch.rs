//! Dispatch contract
//!
//! The operations inbound requests invoke. Each one validates the caller's
//! session, acts on the queue store (or, for search and player control, the
//! gateway) and returns a value or one typed error. Nothing here touches
//! scheduler state.

use crate::gateway::PlaybackGateway;
use crate::queue::{QueueEntry, QueueStore, Session};
use partyq_common::{
    Error, EventBus, PartyEvent, PlaybackTrack, PlayerAction, QueueType, Result, SessionId, Track,
    TrackId,
};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Search result count used when the caller gives none
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Tracks remembered from searches and lookups
pub const TRACK_CACHE_CAPACITY: usize = 1000;

/// Tracks seen recently, oldest evicted first once full
#[derive(Debug)]
pub struct TrackCache {
    tracks: HashMap<TrackId, Track>,
    order: VecDeque<TrackId>,
    capacity: usize,
}

impl TrackCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            tracks: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, track_id: &TrackId) -> Option<&Track> {
        self.tracks.get(track_id)
    }

    /// Remember `track`; a track already cached keeps its age
    pub fn insert(&mut self, track: Track) {
        let track_id = track.track_id.clone();
        if self.tracks.insert(track_id.clone(), track).is_none() {
            self.order.push_back(track_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.tracks.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Queue entry as one session sees it
#[derive(Debug, Clone, Serialize)]
pub struct QueueTrack {
    #[serde(flatten)]
    pub track: Track,
    pub votes: usize,
    /// Whether the requesting session voted for this entry
    pub current_vote: bool,
}

impl QueueTrack {
    fn from_entry(entry: QueueEntry, viewer: &SessionId) -> Self {
        Self {
            votes: entry.score(),
            current_vote: entry.has_vote(viewer),
            track: entry.track,
        }
    }
}

/// Both queues plus the currently playing track
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub currently_playing: Option<PlaybackTrack>,
    pub normal_queue: Vec<QueueTrack>,
    pub admin_queue: Vec<QueueTrack>,
}

pub struct Dispatcher {
    store: Arc<QueueStore>,
    gateway: Arc<PlaybackGateway>,
    events: EventBus,
    /// Tracks seen in search results, so enqueue needs no round trip
    catalog: RwLock<TrackCache>,
    admin_password: Option<String>,
    volume_step: u8,
}

impl Dispatcher {
    pub fn new(
        store: Arc<QueueStore>,
        gateway: Arc<PlaybackGateway>,
        events: EventBus,
        admin_password: Option<String>,
        volume_step: u8,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            catalog: RwLock::new(TrackCache::new(TRACK_CACHE_CAPACITY)),
            admin_password: admin_password.filter(|p| !p.is_empty()),
            volume_step,
        }
    }

    /// Create a session
    ///
    /// The session is an admin session when no admin password is configured
    /// or `password` matches it. A wrong password still yields a normal
    /// session.
    pub async fn generate_session(
        &self,
        password: Option<String>,
        nickname: Option<String>,
    ) -> Result<SessionId> {
        let is_admin = match &self.admin_password {
            None => true,
            Some(expected) => password.as_deref() == Some(expected.as_str()),
        };
        if password.is_some() && !is_admin {
            debug!("Admin password mismatch, creating normal session");
        }
        Ok(self.store.create_session(nickname, is_admin).await.session_id)
    }

    /// Search the playback service
    ///
    /// Results are remembered for a later enqueue but never change the
    /// queues.
    pub async fn query_tracks(&self, pattern: &str, max_entries: Option<i64>) -> Result<Vec<Track>> {
        let limit = match max_entries {
            None => DEFAULT_MAX_ENTRIES,
            Some(n) if n > 0 => n as usize,
            Some(n) => {
                return Err(Error::InvalidValue(format!(
                    "max_entries must be positive, got {}",
                    n
                )))
            }
        };

        let tracks = self.gateway.search(pattern, limit).await.map_err(|e| {
            error!("Search for '{}' failed: {}", pattern, e);
            e
        })?;
        let mut catalog = self.catalog.write().await;
        for track in &tracks {
            catalog.insert(track.clone());
        }
        debug!("Search '{}' returned {} tracks", pattern, tracks.len());
        Ok(tracks)
    }

    pub async fn get_current_queues(&self, session_id: &SessionId) -> Result<QueueStatus> {
        self.session(session_id).await?;
        let snapshot = self.store.snapshot().await;
        let view = |entries: Vec<QueueEntry>| -> Vec<QueueTrack> {
            entries
                .into_iter()
                .map(|e| QueueTrack::from_entry(e, session_id))
                .collect()
        };
        Ok(QueueStatus {
            currently_playing: snapshot.now_playing,
            normal_queue: view(snapshot.normal),
            admin_queue: view(snapshot.admin),
        })
    }

    pub async fn add_track_to_queue(
        &self,
        session_id: &SessionId,
        track_id: &TrackId,
        queue_type: QueueType,
    ) -> Result<()> {
        let session = self.session(session_id).await?;
        if queue_type == QueueType::Admin {
            require_admin(&session, "adding to the admin queue")?;
        }
        let track = self.resolve_track(track_id).await?;
        self.store.enqueue(track, queue_type).await
    }

    /// Vote for (`up`) or withdraw the vote from a queued track
    pub async fn vote_track(&self, session_id: &SessionId, track_id: &TrackId, up: bool) -> Result<()> {
        self.session(session_id).await?;
        self.store.vote(track_id, session_id, up).await
    }

    pub async fn control_player(&self, session_id: &SessionId, action: PlayerAction) -> Result<()> {
        let session = self.session(session_id).await?;
        require_admin(&session, "controlling the player")?;
        info!("Player control: {}", action);

        let step = i16::from(self.volume_step);
        let result = match action {
            PlayerAction::Play => self.gateway.resume().await,
            PlayerAction::Pause | PlayerAction::Stop => self.gateway.pause().await,
            PlayerAction::Skip => self.gateway.skip().await,
            PlayerAction::VolumeUp => self.step_volume(step).await,
            PlayerAction::VolumeDown => self.step_volume(-step).await,
        };
        if let Err(e) = &result {
            error!("Player control {} failed: {}", action, e);
        }
        result
    }

    pub async fn remove_track(&self, session_id: &SessionId, track_id: &TrackId) -> Result<()> {
        let session = self.session(session_id).await?;
        require_admin(&session, "removing tracks")?;
        self.store.remove(track_id).await.map(|_| ())
    }

    pub async fn move_track(
        &self,
        session_id: &SessionId,
        track_id: &TrackId,
        queue_type: QueueType,
    ) -> Result<()> {
        let session = self.session(session_id).await?;
        require_admin(&session, "moving tracks")?;
        self.store.move_entry(track_id, queue_type).await
    }

    async fn session(&self, session_id: &SessionId) -> Result<Session> {
        self.store.session(session_id).await
    }

    async fn step_volume(&self, delta: i16) -> Result<()> {
        let volume = self.gateway.adjust_volume(delta).await?;
        self.events.emit_lossy(PartyEvent::VolumeChanged {
            volume,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    async fn resolve_track(&self, track_id: &TrackId) -> Result<Track> {
        if let Some(track) = self.catalog.read().await.get(track_id) {
            return Ok(track.clone());
        }
        debug!("{} not in search cache, looking it up", track_id);
        let track = self.gateway.lookup_track(track_id).await?;
        self.catalog.write().await.insert(track.clone());
        Ok(track)
    }
}

fn require_admin(session: &Session, what: &str) -> Result<()> {
    if session.is_admin {
        Ok(())
    } else {
        Err(Error::AccessDenied(format!("{} requires an admin session", what)))
    }
}
