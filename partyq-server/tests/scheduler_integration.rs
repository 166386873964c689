//! Scheduler scenarios against scripted and simulated playback services

use async_trait::async_trait;
use partyq_common::{
    Error, EventBus, PartyEvent, PlaybackTrack, QueueType, Result, SchedulerState, SessionId,
    Track, TrackId,
};
use partyq_server::gateway::{Device, MemoryBackend, PlaybackBackend, PlaybackGateway};
use partyq_server::{QueueStore, Scheduler, SchedulerSettings};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn track(id: &str) -> Track {
    Track {
        track_id: TrackId::new(id),
        title: format!("Track {}", id),
        artist: "Band".into(),
        album: "Album".into(),
        duration_ms: 180_000,
        icon_uri: String::new(),
    }
}

/// Backend whose `start_track` answers come from a script
#[derive(Default)]
struct ScriptedBackend {
    play_results: Mutex<VecDeque<Result<()>>>,
    playing: Mutex<Option<PlaybackTrack>>,
    start_calls: Mutex<Vec<TrackId>>,
    refreshes: Mutex<usize>,
    /// Polls after each start that report the track paused at zero
    buffering_polls: Mutex<usize>,
    buffering_left: Mutex<usize>,
}

impl ScriptedBackend {
    fn script_play(&self, results: Vec<Result<()>>) {
        self.play_results.lock().unwrap().extend(results);
    }

    fn start_calls(&self) -> Vec<TrackId> {
        self.start_calls.lock().unwrap().clone()
    }

    fn refreshes(&self) -> usize {
        *self.refreshes.lock().unwrap()
    }

    fn buffer_after_start(&self, polls: usize) {
        *self.buffering_polls.lock().unwrap() = polls;
    }

    fn report(&self, id: &str, is_playing: bool, progress_ms: u64) {
        *self.playing.lock().unwrap() = Some(PlaybackTrack {
            track: track(id),
            is_playing,
            progress_ms,
        });
    }
}

#[async_trait]
impl PlaybackBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn refresh_credentials(&self) -> Result<()> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(())
    }

    async fn search(&self, _pattern: &str, _limit: usize) -> Result<Vec<Track>> {
        Ok(Vec::new())
    }

    async fn lookup_track(&self, track_id: &TrackId) -> Result<Track> {
        Ok(track(track_id.as_str()))
    }

    async fn current_playback(&self) -> Result<Option<PlaybackTrack>> {
        let playing = self.playing.lock().unwrap().clone();
        let mut left = self.buffering_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Ok(playing.map(|p| PlaybackTrack {
                is_playing: false,
                progress_ms: 0,
                ..p
            }));
        }
        Ok(playing)
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        Ok(vec![Device {
            id: "dev".into(),
            name: "Party Speaker".into(),
            is_active: true,
            volume_percent: Some(40),
        }])
    }

    async fn transfer_playback(&self, _device: &Device) -> Result<()> {
        Ok(())
    }

    async fn start_track(&self, track_id: &TrackId, _device: &Device) -> Result<()> {
        self.start_calls.lock().unwrap().push(track_id.clone());
        let result = self.play_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.report(track_id.as_str(), true, 0);
            *self.buffering_left.lock().unwrap() = *self.buffering_polls.lock().unwrap();
        }
        result
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn skip(&self) -> Result<()> {
        Ok(())
    }

    async fn volume(&self) -> Result<Option<u8>> {
        Ok(Some(40))
    }

    async fn set_volume(&self, _percent: u8) -> Result<()> {
        Ok(())
    }
}

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        interval: Duration::from_millis(10),
        check_attempts: 3,
        end_of_track_threshold_ms: 1000,
    }
}

fn build(backend: Arc<dyn PlaybackBackend>, events: &EventBus) -> (Arc<QueueStore>, Arc<Scheduler>) {
    let store = Arc::new(QueueStore::new(events.clone()));
    let gateway = Arc::new(PlaybackGateway::new(backend, None));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        gateway,
        events.clone(),
        settings(),
    ));
    (store, scheduler)
}

#[tokio::test]
async fn test_credential_expiry_on_play_is_retried_transparently() {
    let events = EventBus::new(64);
    let backend = Arc::new(ScriptedBackend::default());
    backend.script_play(vec![Err(Error::CredentialExpired("token expired".into())), Ok(())]);
    let (store, scheduler) = build(backend.clone(), &events);
    store.enqueue(track("x"), QueueType::Normal).await.unwrap();

    let state = scheduler.tick().await.unwrap();

    assert_eq!(state, SchedulerState::CheckPlaying);
    assert_eq!(backend.refreshes(), 1);
    assert_eq!(backend.start_calls(), vec![TrackId::new("x"), TrackId::new("x")]);
    assert!(store.is_empty().await);
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::Playing);
}

#[tokio::test]
async fn test_double_credential_failure_keeps_track_queued() {
    let events = EventBus::new(64);
    let backend = Arc::new(ScriptedBackend::default());
    backend.script_play(vec![
        Err(Error::CredentialExpired("token expired".into())),
        Err(Error::CredentialExpired("still expired".into())),
    ]);
    let (store, scheduler) = build(backend.clone(), &events);
    store.enqueue(track("x"), QueueType::Normal).await.unwrap();
    store.vote(&TrackId::new("x"), &SessionId::from("fan"), true).await.unwrap();

    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::PlayNextSong);
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.normal.len(), 1);
    assert_eq!(snapshot.normal[0].score(), 1);

    // Next tick retries the same selection
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::CheckPlaying);
    assert_eq!(backend.start_calls().len(), 3);
}

#[tokio::test]
async fn test_admin_queue_drains_first() {
    let events = EventBus::new(64);
    let backend = Arc::new(MemoryBackend::with_demo_catalog());
    let (store, scheduler) = build(backend.clone(), &events);
    let catalog = backend.search("", 3).await.unwrap();

    store.enqueue(catalog[0].clone(), QueueType::Normal).await.unwrap();
    store.enqueue(catalog[1].clone(), QueueType::Admin).await.unwrap();
    store.enqueue(catalog[2].clone(), QueueType::Normal).await.unwrap();
    for voter in ["a", "b", "c"] {
        store
            .vote(&catalog[2].track_id, &SessionId::from(voter), true)
            .await
            .unwrap();
    }

    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::CheckPlaying);
    for _ in 0..3 {
        assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::Playing);
        backend.finish_current();
        scheduler.tick().await.unwrap();
    }
    assert_eq!(scheduler.state().await, SchedulerState::Idle);

    let history: Vec<TrackId> = backend.play_history().into_iter().map(|(t, _)| t).collect();
    assert_eq!(
        history,
        vec![
            catalog[1].track_id.clone(),
            catalog[2].track_id.clone(),
            catalog[0].track_id.clone(),
        ]
    );
}

#[tokio::test]
async fn test_events_follow_playback() {
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let backend = Arc::new(MemoryBackend::with_demo_catalog());
    let (store, scheduler) = build(backend.clone(), &events);
    let song = backend.search("blinding", 1).await.unwrap().remove(0);
    store.enqueue(song.clone(), QueueType::Normal).await.unwrap();

    scheduler.tick().await.unwrap();
    scheduler.tick().await.unwrap();

    let mut started = None;
    let mut transitions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            PartyEvent::TrackStarted { track_id, .. } => started = Some(track_id),
            PartyEvent::SchedulerStateChanged { new_state, .. } => transitions.push(new_state),
            _ => {}
        }
    }
    assert_eq!(started, Some(song.track_id));
    assert_eq!(
        transitions,
        vec![
            SchedulerState::PlayNextSong,
            SchedulerState::CheckPlaying,
            SchedulerState::Playing,
        ]
    );
}

#[tokio::test]
async fn test_loop_survives_outage_and_stops_on_cancel() {
    let events = EventBus::new(64);
    let backend = Arc::new(MemoryBackend::with_demo_catalog());
    let (store, scheduler) = build(backend.clone(), &events);
    let cancel = CancellationToken::new();

    backend.set_offline(true);
    let handle = scheduler.spawn(cancel.clone());
    let song = {
        backend.set_offline(false);
        let t = backend.search("bad guy", 1).await.unwrap().remove(0);
        backend.set_offline(true);
        t
    };
    store.enqueue(song, QueueType::Normal).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scheduler.state().await, SchedulerState::Idle);
    assert!(scheduler.last_playback().await.error.is_some());

    backend.set_offline(false);
    tokio::time::timeout(Duration::from_secs(2), async {
        while scheduler.state().await != SchedulerState::Playing {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(backend.play_history().len(), 1);
}

#[tokio::test]
async fn test_buffering_start_is_not_taken_for_a_finished_track() {
    let events = EventBus::new(64);
    let backend = Arc::new(ScriptedBackend::default());
    backend.buffer_after_start(2);
    let (store, scheduler) = build(backend.clone(), &events);
    store.enqueue(track("a"), QueueType::Normal).await.unwrap();
    store.enqueue(track("b"), QueueType::Normal).await.unwrap();

    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::CheckPlaying);
    // Reported paused at zero while buffering
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::CheckPlaying);
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::CheckPlaying);
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::Playing);
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::Playing);

    assert_eq!(backend.start_calls(), vec![TrackId::new("a")]);
    assert_eq!(store.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_end_of_track_needs_progress_to_regress() {
    let events = EventBus::new(64);
    let backend = Arc::new(ScriptedBackend::default());
    let (store, scheduler) = build(backend.clone(), &events);
    store.enqueue(track("a"), QueueType::Normal).await.unwrap();
    store.enqueue(track("b"), QueueType::Normal).await.unwrap();

    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::CheckPlaying);
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::Playing);

    // Paused at zero right after starting: not an ending
    backend.report("a", false, 0);
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::Playing);

    backend.report("a", true, 120_000);
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::Playing);

    // Progress fell back to zero and playback stopped: the track ended
    backend.report("a", false, 0);
    assert_eq!(scheduler.tick().await.unwrap(), SchedulerState::CheckPlaying);
    assert_eq!(
        backend.start_calls(),
        vec![TrackId::new("a"), TrackId::new("b")]
    );
}
