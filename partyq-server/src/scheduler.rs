//! Scheduler
//!
//! Background state machine that polls the playback service on a fixed
//! interval, decides when the current track is over and hands the next
//! top-ranked queue entry to the gateway.
//!
//! ```text
//! Idle ──(queue non-empty, nothing playing)──> PlayNextSong
//! PlayNextSong ──(play issued)──> CheckPlaying
//! PlayNextSong ──(queues empty)──> Idle
//! PlayNextSong ──(play failed)──> PlayNextSong
//! CheckPlaying ──(requested track reported)──> Playing
//! CheckPlaying ──(attempts exhausted)──> Idle
//! Playing ──(track ended)──> PlayNextSong
//! ```
//!
//! The scheduler and request handlers only meet in the queue store. Its own
//! state, its last-playback cache and the requested track each sit behind
//! their own lock; none of them is ever held while the store is locked.

use crate::gateway::PlaybackGateway;
use crate::queue::QueueStore;
use partyq_common::config::SchedulerConfig;
use partyq_common::{Error, EventBus, PartyEvent, PlaybackTrack, Result, SchedulerState, Track};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    /// Polls spent waiting for a freshly started track to show up
    pub check_attempts: u32,
    /// Stopped tracks below this progress count as finished
    pub end_of_track_threshold_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            check_attempts: config.check_attempts,
            end_of_track_threshold_ms: config.end_of_track_threshold_ms,
        }
    }
}

/// Result of the most recent poll
#[derive(Debug, Clone, Default)]
pub struct LastPlayback {
    /// Last successfully polled playback
    pub playback: Option<PlaybackTrack>,
    /// Error of the most recent poll, cleared by the next success
    pub error: Option<Error>,
    pub polled_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Decide whether the track the scheduler started is over
///
/// Finished means: nothing reported, nothing expected, a different track
/// reported, or the expected track stopped with its progress regressed to
/// near zero. `previous_progress_ms` is the progress seen on the poll
/// before; a stopped track that never got past the threshold is still
/// starting, not over.
pub fn is_finished(
    expected: Option<&Track>,
    current: Option<&PlaybackTrack>,
    previous_progress_ms: u64,
    threshold_ms: u64,
) -> bool {
    match (expected, current) {
        (Some(expected), Some(current)) => {
            current.track_id() != &expected.track_id
                || (!current.is_playing
                    && current.progress_ms < threshold_ms
                    && previous_progress_ms > threshold_ms)
        }
        _ => true,
    }
}

/// Whether the started track is reported as actually running
fn is_confirmed(expected: &Track, current: &PlaybackTrack) -> bool {
    current.track_id() == &expected.track_id && (current.is_playing || current.progress_ms > 0)
}

/// Play failures that may clear up by themselves
///
/// Anything else means the service will never play this track.
fn is_transient(err: &Error) -> bool {
    !matches!(
        err,
        Error::NotFound(_) | Error::InvalidValue(_) | Error::InvalidFormat(_) | Error::AccessDenied(_)
    )
}

pub struct Scheduler {
    store: Arc<QueueStore>,
    gateway: Arc<PlaybackGateway>,
    events: EventBus,
    settings: SchedulerSettings,
    state: RwLock<SchedulerState>,
    last_playback: RwLock<LastPlayback>,
    /// Track most recently handed to the gateway
    requested: RwLock<Option<Track>>,
    check_attempts: AtomicU32,
    /// Progress of the requested track at the previous poll
    last_progress_ms: AtomicU64,
}

impl Scheduler {
    pub fn new(
        store: Arc<QueueStore>,
        gateway: Arc<PlaybackGateway>,
        events: EventBus,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            settings,
            state: RwLock::new(SchedulerState::Idle),
            last_playback: RwLock::new(LastPlayback::default()),
            requested: RwLock::new(None),
            check_attempts: AtomicU32::new(0),
            last_progress_ms: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn last_playback(&self) -> LastPlayback {
        self.last_playback.read().await.clone()
    }

    pub async fn requested_track(&self) -> Option<Track> {
        self.requested.read().await.clone()
    }

    /// True when the last requested track and the last polled playback disagree
    ///
    /// Diagnostic only; the state machine never corrects itself from it.
    pub async fn check_for_inconsistency(&self) -> bool {
        let requested = self.requested.read().await.clone();
        let Some(requested) = requested else {
            return false;
        };
        let last = self.last_playback.read().await;
        last.playback
            .as_ref()
            .map_or(true, |p| p.track_id() != &requested.track_id)
    }

    /// Start the polling loop on its own task
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run(cancel).await })
    }

    /// Poll until `cancel` fires
    ///
    /// A tick always runs to completion; cancellation is observed between
    /// ticks. A slow tick delays the next one instead of overlapping it.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Scheduler started (interval {}ms, backend {})",
            self.settings.interval.as_millis(),
            self.gateway.backend_name()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        let state = self.state().await;
                        warn!("Scheduler tick failed in {}: {}", state, e);
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Run one step of the state machine
    ///
    /// Entering `PlayNextSong` is acted on within the same tick. A failed
    /// poll leaves the state unchanged and is returned.
    pub async fn tick(&self) -> Result<SchedulerState> {
        let current = self.state().await;
        let mut next = match current {
            SchedulerState::Idle => self.on_idle().await?,
            SchedulerState::PlayNextSong => self.on_play_next_song().await,
            SchedulerState::CheckPlaying => self.on_check_playing().await?,
            SchedulerState::Playing => self.on_playing().await?,
        };
        self.transition(next).await;

        if next == SchedulerState::PlayNextSong && current != SchedulerState::PlayNextSong {
            next = self.on_play_next_song().await;
            self.transition(next).await;
        }
        Ok(next)
    }

    /// Pop the next entry and hand it to the gateway
    ///
    /// `Ok(None)` when both queues are empty. When the gateway fails, the
    /// error is returned; the entry goes back to its queue if the failure is
    /// transient and is dropped otherwise.
    pub async fn next_track(&self) -> Result<Option<Track>> {
        let Some(popped) = self.store.pop_next().await else {
            return Ok(None);
        };
        let track = popped.entry.track.clone();

        match self.gateway.play(&track).await {
            Ok(()) => {
                *self.requested.write().await = Some(track.clone());
                self.check_attempts.store(0, Ordering::SeqCst);
                self.last_progress_ms.store(0, Ordering::SeqCst);
                self.events.emit_lossy(PartyEvent::TrackStarted {
                    track_id: track.track_id.clone(),
                    title: track.title.clone(),
                    artist: track.artist.clone(),
                    timestamp: chrono::Utc::now(),
                });
                Ok(Some(track))
            }
            Err(e) if is_transient(&e) => {
                self.store.restore(popped).await;
                Err(e)
            }
            Err(e) => {
                warn!("Dropping {} from the queue, service refused it: {}", track.track_id, e);
                Err(e)
            }
        }
    }

    async fn on_idle(&self) -> Result<SchedulerState> {
        let playback = self.poll().await?;
        if playback.as_ref().is_some_and(|p| p.is_playing) {
            return Ok(SchedulerState::Idle);
        }
        if self.store.is_empty().await {
            Ok(SchedulerState::Idle)
        } else {
            Ok(SchedulerState::PlayNextSong)
        }
    }

    async fn on_play_next_song(&self) -> SchedulerState {
        match self.next_track().await {
            Ok(Some(track)) => {
                info!("Requested {} ({} - {})", track.track_id, track.artist, track.title);
                SchedulerState::CheckPlaying
            }
            Ok(None) => {
                debug!("Queues empty, nothing to play");
                SchedulerState::Idle
            }
            Err(e) => {
                warn!("Play failed, retrying next tick: {}", e);
                SchedulerState::PlayNextSong
            }
        }
    }

    async fn on_check_playing(&self) -> Result<SchedulerState> {
        let playback = self.poll().await?;
        let requested = self.requested.read().await.clone();

        let confirmed_at = match (&requested, &playback) {
            (Some(r), Some(p)) if is_confirmed(r, p) => Some(p.progress_ms),
            _ => None,
        };
        if let Some(progress_ms) = confirmed_at {
            self.check_attempts.store(0, Ordering::SeqCst);
            self.last_progress_ms.store(progress_ms, Ordering::SeqCst);
            return Ok(SchedulerState::Playing);
        }

        let attempts = self.check_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts >= self.settings.check_attempts {
            warn!(
                "Requested track {} not reported after {} polls, giving up",
                requested
                    .as_ref()
                    .map(|t| t.track_id.to_string())
                    .unwrap_or_default(),
                attempts
            );
            self.check_attempts.store(0, Ordering::SeqCst);
            *self.requested.write().await = None;
            return Ok(SchedulerState::Idle);
        }
        debug!("Waiting for requested track (attempt {})", attempts);
        Ok(SchedulerState::CheckPlaying)
    }

    async fn on_playing(&self) -> Result<SchedulerState> {
        let playback = self.poll().await?;
        let requested = self.requested.read().await.clone();
        let previous = self.last_progress_ms.load(Ordering::SeqCst);
        if let (Some(r), Some(p)) = (&requested, &playback) {
            if p.track_id() == &r.track_id {
                self.last_progress_ms.store(p.progress_ms, Ordering::SeqCst);
            }
        }
        if is_finished(
            requested.as_ref(),
            playback.as_ref(),
            previous,
            self.settings.end_of_track_threshold_ms,
        ) {
            info!("Track finished");
            Ok(SchedulerState::PlayNextSong)
        } else {
            Ok(SchedulerState::Playing)
        }
    }

    /// Fetch the current playback and record it
    async fn poll(&self) -> Result<Option<PlaybackTrack>> {
        let result = self.gateway.current_playback().await;
        {
            let mut last = self.last_playback.write().await;
            match &result {
                Ok(playback) => {
                    last.playback = playback.clone();
                    last.error = None;
                }
                Err(e) => last.error = Some(e.clone()),
            }
            last.polled_at = Some(chrono::Utc::now());
        }
        if let Ok(playback) = &result {
            self.store.set_now_playing(playback.clone()).await;
        }
        result
    }

    async fn transition(&self, next: SchedulerState) {
        let old = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, next)
        };
        if old != next {
            info!("Scheduler: {} -> {}", old, next);
            self.events.emit_lossy(PartyEvent::SchedulerStateChanged {
                old_state: old,
                new_state: next,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}
