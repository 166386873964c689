//! In-memory playback backend
//!
//! Simulates one playback service with a fixed catalog, a device list and
//! a single player whose progress follows tokio time. Used for local runs
//! without service credentials and by the test suites, which drive its
//! fault injection hooks.

use super::{Device, PlaybackBackend};
use async_trait::async_trait;
use partyq_common::model::join_artists;
use partyq_common::{Error, PlaybackTrack, Result, Track, TrackId};
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_VOLUME: u8 = 50;
/// Oldest play records are dropped beyond this
pub const PLAY_HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone)]
struct Loaded {
    track: Track,
    /// Progress accumulated before the last resume
    offset_ms: u64,
    /// Set while playing
    resumed_at: Option<Instant>,
}

impl Loaded {
    fn progress_ms(&self) -> u64 {
        let running = self
            .resumed_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        (self.offset_ms + running).min(self.track.duration_ms)
    }

    fn finished(&self) -> bool {
        self.progress_ms() >= self.track.duration_ms
    }
}

#[derive(Debug)]
struct MemoryState {
    catalog: Vec<Track>,
    devices: Vec<Device>,
    active_device: Option<String>,
    loaded: Option<Loaded>,
    volume: u8,
    credentials_valid: bool,
    refresh_ineffective: bool,
    offline: bool,
    refresh_count: usize,
    play_history: Vec<(TrackId, String)>,
}

/// Simulated playback service
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new(catalog: Vec<Track>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                catalog,
                devices: vec![Device {
                    id: "memory-device-0".to_string(),
                    name: "Memory Speaker".to_string(),
                    is_active: false,
                    volume_percent: Some(DEFAULT_VOLUME),
                }],
                active_device: None,
                loaded: None,
                volume: DEFAULT_VOLUME,
                credentials_valid: true,
                refresh_ineffective: false,
                offline: false,
                refresh_count: 0,
                play_history: Vec::new(),
            }),
        }
    }

    /// Backend preloaded with a small catalog of demo tracks
    pub fn with_demo_catalog() -> Self {
        let demo = [
            ("4uLU6hMCjMI75M1A2tKUQC", "Never Gonna Give You Up", &["Rick Astley"][..], "Whenever You Need Somebody", 213_573),
            ("7GhIk7Il098yCjg4BQjzvb", "Around the World", &["Daft Punk"][..], "Homework", 429_533),
            ("3n3Ppam7vgaVa1iaRUc9Lp", "Mr. Brightside", &["The Killers"][..], "Hot Fuss", 222_973),
            ("0VjIjW4GlUZAMYd2vXMi3b", "Blinding Lights", &["The Weeknd"][..], "After Hours", 200_040),
            ("2Fxmhks0bxGSBdJ92vM42m", "Bad Guy", &["Billie Eilish"][..], "When We All Fall Asleep", 194_088),
            ("6habFhsOp2NvshLv26DqMb", "Despacito", &["Luis Fonsi", "Daddy Yankee"][..], "Vida", 228_827),
            ("1mea3bSkSGXuIRvnydlB5b", "Viva La Vida", &["Coldplay"][..], "Viva La Vida", 242_373),
            ("5ghIJDpPoe3CfHMGu71E6T", "Smells Like Teen Spirit", &["Nirvana"][..], "Nevermind", 301_920),
        ];
        let catalog = demo
            .iter()
            .map(|(id, title, artists, album, duration_ms)| Track {
                track_id: TrackId::new(format!("spotify:track:{}", id)),
                title: title.to_string(),
                artist: join_artists(artists.iter()),
                album: album.to_string(),
                duration_ms: *duration_ms,
                icon_uri: String::new(),
            })
            .collect();
        Self::new(catalog)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // Poisoning only happens if a test panicked while holding the lock
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock and check the simulated connection and credentials
    fn connect(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = self.lock();
        if state.offline {
            return Err(Error::GatewayUnavailable(
                "memory backend is offline".to_string(),
            ));
        }
        if !state.credentials_valid {
            return Err(Error::CredentialExpired(
                "memory backend token expired".to_string(),
            ));
        }
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Fault injection and inspection
    // ------------------------------------------------------------------

    /// Make every call fail with `CredentialExpired` until refreshed
    pub fn expire_credentials(&self) {
        self.lock().credentials_valid = false;
    }

    /// Make refreshes report success without renewing anything
    pub fn set_refresh_ineffective(&self, ineffective: bool) {
        self.lock().refresh_ineffective = ineffective;
    }

    /// Make every call fail with `GatewayUnavailable`
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        self.lock().devices = devices;
    }

    /// The most recent `(track, device id)` pairs a play was issued for,
    /// oldest first
    pub fn play_history(&self) -> Vec<(TrackId, String)> {
        self.lock().play_history.clone()
    }

    /// Number of refreshes that actually renewed credentials
    pub fn refresh_count(&self) -> usize {
        self.lock().refresh_count
    }

    /// End the loaded track as if it had played through
    pub fn finish_current(&self) {
        self.lock().loaded = None;
    }

    /// Start a track the way another client of the service would
    pub fn simulate_external_play(&self, track: Track) {
        self.lock().loaded = Some(Loaded {
            track,
            offset_ms: 0,
            resumed_at: Some(Instant::now()),
        });
    }
}

#[async_trait]
impl PlaybackBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn refresh_credentials(&self) -> Result<()> {
        let mut state = self.lock();
        if state.offline {
            return Err(Error::GatewayUnavailable(
                "memory backend is offline".to_string(),
            ));
        }
        if state.credentials_valid {
            debug!("Credentials already fresh, refresh skipped");
            return Ok(());
        }
        state.refresh_count += 1;
        if !state.refresh_ineffective {
            state.credentials_valid = true;
        }
        Ok(())
    }

    async fn search(&self, pattern: &str, limit: usize) -> Result<Vec<Track>> {
        let state = self.connect()?;
        let needle = pattern.to_lowercase();
        Ok(state
            .catalog
            .iter()
            .filter(|t| {
                needle.is_empty()
                    || t.title.to_lowercase().contains(&needle)
                    || t.artist.to_lowercase().contains(&needle)
                    || t.album.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn lookup_track(&self, track_id: &TrackId) -> Result<Track> {
        let state = self.connect()?;
        state
            .catalog
            .iter()
            .find(|t| &t.track_id == track_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("track '{}'", track_id)))
    }

    async fn current_playback(&self) -> Result<Option<PlaybackTrack>> {
        let mut state = self.connect()?;
        // A track that played through is unloaded
        if state.loaded.as_ref().is_some_and(Loaded::finished) {
            state.loaded = None;
        }
        Ok(state.loaded.as_ref().map(|loaded| PlaybackTrack {
            track: loaded.track.clone(),
            is_playing: loaded.resumed_at.is_some(),
            progress_ms: loaded.progress_ms(),
        }))
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        let state = self.connect()?;
        let active = state.active_device.clone();
        let volume = state.volume;
        Ok(state
            .devices
            .iter()
            .map(|d| {
                let is_active = active.as_deref() == Some(d.id.as_str());
                Device {
                    is_active,
                    volume_percent: if is_active { Some(volume) } else { d.volume_percent },
                    ..d.clone()
                }
            })
            .collect())
    }

    async fn transfer_playback(&self, device: &Device) -> Result<()> {
        let mut state = self.connect()?;
        if !state.devices.iter().any(|d| d.id == device.id) {
            return Err(Error::NoDeviceAvailable(format!("device '{}'", device.id)));
        }
        state.active_device = Some(device.id.clone());
        Ok(())
    }

    async fn start_track(&self, track_id: &TrackId, device: &Device) -> Result<()> {
        let mut state = self.connect()?;
        if !state.devices.iter().any(|d| d.id == device.id) {
            return Err(Error::NoDeviceAvailable(format!("device '{}'", device.id)));
        }
        let track = state
            .catalog
            .iter()
            .find(|t| &t.track_id == track_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("track '{}'", track_id)))?;
        state.active_device = Some(device.id.clone());
        state.loaded = Some(Loaded {
            track,
            offset_ms: 0,
            resumed_at: Some(Instant::now()),
        });
        state.play_history.push((track_id.clone(), device.id.clone()));
        if state.play_history.len() > PLAY_HISTORY_LIMIT {
            let excess = state.play_history.len() - PLAY_HISTORY_LIMIT;
            state.play_history.drain(..excess);
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let mut state = self.connect()?;
        match state.loaded.as_mut() {
            Some(loaded) => {
                if loaded.resumed_at.is_none() {
                    loaded.resumed_at = Some(Instant::now());
                }
                Ok(())
            }
            None => Err(Error::InvalidValue("nothing loaded".to_string())),
        }
    }

    async fn pause(&self) -> Result<()> {
        let mut state = self.connect()?;
        if let Some(loaded) = state.loaded.as_mut() {
            loaded.offset_ms = loaded.progress_ms();
            loaded.resumed_at = None;
        }
        Ok(())
    }

    async fn skip(&self) -> Result<()> {
        let mut state = self.connect()?;
        // No service-side queue: skipping ends the current track
        match state.loaded.take() {
            Some(_) => Ok(()),
            None => Err(Error::InvalidValue("nothing loaded to skip".to_string())),
        }
    }

    async fn volume(&self) -> Result<Option<u8>> {
        let state = self.connect()?;
        Ok(state.loaded.as_ref().map(|_| state.volume))
    }

    async fn set_volume(&self, percent: u8) -> Result<()> {
        let mut state = self.connect()?;
        if state.loaded.is_none() {
            return Err(Error::InvalidValue("no active playback".to_string()));
        }
        state.volume = percent.min(100);
        Ok(())
    }
}
