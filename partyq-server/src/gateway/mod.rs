//! Playback Gateway
//!
//! Contract between the scheduler/dispatcher and the external service that
//! actually renders audio. A [`PlaybackBackend`] speaks to one concrete
//! service; [`PlaybackGateway`] wraps it with the behavior every caller
//! relies on:
//!
//! - one credential refresh and one retry when a call reports
//!   [`Error::CredentialExpired`]
//! - device selection for `play`
//! - serialized play/pause commands and serialized volume commands

pub mod memory;
pub mod spotify;

pub use memory::MemoryBackend;
pub use spotify::SpotifyBackend;

use async_trait::async_trait;
use partyq_common::{Error, PlaybackTrack, Result, Track, TrackId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Playback device known to the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub volume_percent: Option<u8>,
}

/// Raw capabilities of one playback service
///
/// Implementations report an expired access token as
/// [`Error::CredentialExpired`] and never retry on their own.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Renew the access credentials
    ///
    /// Must be cheap when the credentials were already renewed by a
    /// concurrent caller.
    async fn refresh_credentials(&self) -> Result<()>;

    async fn search(&self, pattern: &str, limit: usize) -> Result<Vec<Track>>;

    async fn lookup_track(&self, track_id: &TrackId) -> Result<Track>;

    /// `None` when nothing is loaded on any device
    async fn current_playback(&self) -> Result<Option<PlaybackTrack>>;

    async fn devices(&self) -> Result<Vec<Device>>;

    async fn transfer_playback(&self, device: &Device) -> Result<()>;

    async fn start_track(&self, track_id: &TrackId, device: &Device) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn skip(&self) -> Result<()>;

    /// `None` when there is no active playback to read the volume from
    async fn volume(&self) -> Result<Option<u8>>;

    async fn set_volume(&self, percent: u8) -> Result<()>;
}

/// Pick the device to play on
///
/// The preferred device wins when it is present by name, otherwise the
/// first reported device is used.
pub fn select_device<'a>(devices: &'a [Device], preferred: Option<&str>) -> Result<&'a Device> {
    if let Some(name) = preferred {
        if let Some(device) = devices.iter().find(|d| d.name == name) {
            return Ok(device);
        }
        debug!("Preferred device '{}' not available", name);
    }
    devices
        .first()
        .ok_or_else(|| Error::NoDeviceAvailable("service reports no devices".to_string()))
}

/// Gateway used by the scheduler and the dispatcher
pub struct PlaybackGateway {
    backend: Arc<dyn PlaybackBackend>,
    preferred_device: Option<String>,
    play_lock: Mutex<()>,
    volume_lock: Mutex<()>,
}

impl PlaybackGateway {
    pub fn new(backend: Arc<dyn PlaybackBackend>, preferred_device: Option<String>) -> Self {
        Self {
            backend,
            preferred_device,
            play_lock: Mutex::new(()),
            volume_lock: Mutex::new(()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run `call`; on expired credentials refresh once and run it once more
    async fn with_refresh<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match call().await {
            Err(e) if e.is_credential_expired() => {
                warn!("{}: credentials expired, refreshing", op);
                self.backend.refresh_credentials().await?;
                let retried = call().await;
                if let Err(e) = &retried {
                    warn!("{}: failed after credential refresh: {}", op, e);
                }
                retried
            }
            other => other,
        }
    }

    pub async fn current_playback(&self) -> Result<Option<PlaybackTrack>> {
        let backend = self.backend.as_ref();
        self.with_refresh("current_playback", move || backend.current_playback())
            .await
    }

    pub async fn search(&self, pattern: &str, limit: usize) -> Result<Vec<Track>> {
        let backend = self.backend.as_ref();
        self.with_refresh("search", move || backend.search(pattern, limit))
            .await
    }

    pub async fn lookup_track(&self, track_id: &TrackId) -> Result<Track> {
        let backend = self.backend.as_ref();
        self.with_refresh("lookup_track", move || backend.lookup_track(track_id))
            .await
    }

    /// Start `track` on the selected device
    ///
    /// Playback is transferred to the device first when the service reports
    /// nothing loaded.
    pub async fn play(&self, track: &Track) -> Result<()> {
        let _guard = self.play_lock.lock().await;
        let backend = self.backend.as_ref();

        let devices = self
            .with_refresh("devices", move || backend.devices())
            .await?;
        let device = select_device(&devices, self.preferred_device.as_deref())?;

        let playback = self
            .with_refresh("current_playback", move || backend.current_playback())
            .await?;
        if playback.is_none() {
            info!("No active playback, transferring to '{}'", device.name);
            self.with_refresh("transfer_playback", move || {
                backend.transfer_playback(device)
            })
            .await?;
        }

        let track_id = &track.track_id;
        self.with_refresh("play", move || backend.start_track(track_id, device))
            .await?;
        info!("Playing {} on '{}'", track_id, device.name);
        Ok(())
    }

    /// Resume whatever is loaded
    ///
    /// Fails with `InvalidValue` when nothing is loaded; a no-op when
    /// already playing.
    pub async fn resume(&self) -> Result<()> {
        let _guard = self.play_lock.lock().await;
        let backend = self.backend.as_ref();
        match self
            .with_refresh("current_playback", move || backend.current_playback())
            .await?
        {
            None => Err(Error::InvalidValue(
                "nothing is loaded to resume".to_string(),
            )),
            Some(p) if p.is_playing => {
                debug!("Resume ignored, {} already playing", p.track_id());
                Ok(())
            }
            Some(_) => self.with_refresh("resume", move || backend.resume()).await,
        }
    }

    /// Pause playback; a no-op when nothing is playing
    pub async fn pause(&self) -> Result<()> {
        let _guard = self.play_lock.lock().await;
        let backend = self.backend.as_ref();
        match self
            .with_refresh("current_playback", move || backend.current_playback())
            .await?
        {
            Some(p) if p.is_playing => {
                self.with_refresh("pause", move || backend.pause()).await
            }
            _ => {
                debug!("Pause ignored, nothing playing");
                Ok(())
            }
        }
    }

    pub async fn skip(&self) -> Result<()> {
        let _guard = self.play_lock.lock().await;
        let backend = self.backend.as_ref();
        self.with_refresh("skip", move || backend.skip()).await
    }

    /// Current volume in percent
    pub async fn volume(&self) -> Result<u8> {
        let _guard = self.volume_lock.lock().await;
        self.read_volume().await
    }

    pub async fn set_volume(&self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(Error::InvalidValue(format!(
                "volume must be within 0..=100, got {}",
                percent
            )));
        }
        let _guard = self.volume_lock.lock().await;
        let backend = self.backend.as_ref();
        self.with_refresh("set_volume", move || backend.set_volume(percent))
            .await
    }

    /// Step the volume by `delta` percent, clamped to 0..=100
    ///
    /// Read and write happen under one volume lock, so concurrent steps
    /// never lose an update. Returns the volume written.
    pub async fn adjust_volume(&self, delta: i16) -> Result<u8> {
        let _guard = self.volume_lock.lock().await;
        let current = self.read_volume().await?;
        let target = (i16::from(current) + delta).clamp(0, 100) as u8;
        if target != current {
            let backend = self.backend.as_ref();
            self.with_refresh("set_volume", move || backend.set_volume(target))
                .await?;
        }
        debug!("Volume {} -> {}", current, target);
        Ok(target)
    }

    async fn read_volume(&self) -> Result<u8> {
        let backend = self.backend.as_ref();
        self.with_refresh("volume", move || backend.volume())
            .await?
            .ok_or_else(|| Error::InvalidValue("no active playback to read volume from".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device(id: &str, name: &str) -> Device {
        Device {
            id: id.to_string(),
            name: name.to_string(),
            is_active: false,
            volume_percent: Some(50),
        }
    }

    #[test]
    fn test_select_device_prefers_configured_name() {
        let devices = vec![device("1", "Kitchen"), device("2", "Living Room")];
        let chosen = select_device(&devices, Some("Living Room")).unwrap();
        assert_eq!(chosen.id, "2");
    }

    #[test]
    fn test_select_device_falls_back_to_first() {
        let devices = vec![device("1", "Kitchen"), device("2", "Living Room")];
        assert_eq!(select_device(&devices, Some("Garage")).unwrap().id, "1");
        assert_eq!(select_device(&devices, None).unwrap().id, "1");
    }

    #[test]
    fn test_select_device_empty_list() {
        let err = select_device(&[], Some("Kitchen")).unwrap_err();
        assert!(matches!(err, Error::NoDeviceAvailable(_)));
    }

    #[tokio::test]
    async fn test_refresh_once_then_retry() {
        let backend = Arc::new(MemoryBackend::with_demo_catalog());
        let gateway = PlaybackGateway::new(backend.clone(), None);
        backend.expire_credentials();

        let results = gateway.search("", 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(backend.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_second_credential_failure_propagates() {
        let backend = Arc::new(MemoryBackend::with_demo_catalog());
        let gateway = PlaybackGateway::new(backend.clone(), None);
        backend.expire_credentials();
        backend.set_refresh_ineffective(true);

        let err = gateway.current_playback().await.unwrap_err();
        assert!(err.is_credential_expired());
        assert_eq!(backend.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let backend = Arc::new(MemoryBackend::with_demo_catalog());
        let gateway = PlaybackGateway::new(backend.clone(), None);
        backend.set_offline(true);

        let err = gateway.current_playback().await.unwrap_err();
        assert!(matches!(err, Error::GatewayUnavailable(_)));
        assert_eq!(backend.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_with_refresh_calls_at_most_twice() {
        let backend = Arc::new(MemoryBackend::with_demo_catalog());
        let gateway = PlaybackGateway::new(backend, None);
        let calls = AtomicUsize::new(0);

        let result: Result<()> = gateway
            .with_refresh("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::CredentialExpired("stale".into())) }
            })
            .await;
        assert!(result.unwrap_err().is_credential_expired());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_play_transfers_and_starts_on_preferred_device() {
        let backend = Arc::new(MemoryBackend::with_demo_catalog());
        backend.set_devices(vec![device("1", "Kitchen"), device("2", "Bar")]);
        let gateway = PlaybackGateway::new(backend.clone(), Some("Bar".into()));
        let track = backend.search("", 1).await.unwrap().remove(0);

        gateway.play(&track).await.unwrap();

        assert_eq!(backend.play_history(), vec![(track.track_id.clone(), "2".to_string())]);
        let playback = gateway.current_playback().await.unwrap().unwrap();
        assert_eq!(playback.track_id(), &track.track_id);
        assert!(playback.is_playing);
    }

    #[tokio::test]
    async fn test_play_without_devices() {
        let backend = Arc::new(MemoryBackend::with_demo_catalog());
        backend.set_devices(Vec::new());
        let gateway = PlaybackGateway::new(backend.clone(), None);
        let track = backend.search("", 1).await.unwrap().remove(0);

        let err = gateway.play(&track).await.unwrap_err();
        assert!(matches!(err, Error::NoDeviceAvailable(_)));
        assert!(backend.play_history().is_empty());
    }

    #[tokio::test]
    async fn test_resume_and_pause_semantics() {
        let backend = Arc::new(MemoryBackend::with_demo_catalog());
        let gateway = PlaybackGateway::new(backend.clone(), None);

        let err = gateway.resume().await.unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        gateway.pause().await.unwrap();

        let track = backend.search("", 1).await.unwrap().remove(0);
        gateway.play(&track).await.unwrap();
        gateway.resume().await.unwrap();
        gateway.pause().await.unwrap();
        assert!(!gateway.current_playback().await.unwrap().unwrap().is_playing);
        gateway.resume().await.unwrap();
        assert!(gateway.current_playback().await.unwrap().unwrap().is_playing);
    }

    #[tokio::test]
    async fn test_adjust_volume_clamps() {
        let backend = Arc::new(MemoryBackend::with_demo_catalog());
        let gateway = PlaybackGateway::new(backend.clone(), None);

        let err = gateway.adjust_volume(10).await.unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));

        let track = backend.search("", 1).await.unwrap().remove(0);
        gateway.play(&track).await.unwrap();
        gateway.set_volume(95).await.unwrap();
        assert_eq!(gateway.adjust_volume(10).await.unwrap(), 100);
        gateway.set_volume(3).await.unwrap();
        assert_eq!(gateway.adjust_volume(-10).await.unwrap(), 0);
        assert_eq!(gateway.volume().await.unwrap(), 0);
        assert!(gateway.set_volume(101).await.is_err());
    }
}
