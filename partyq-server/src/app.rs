//! Service assembly
//!
//! Builds every component once and wires them together explicitly: the
//! queue store and the gateway are shared by the scheduler and the
//! dispatcher, nothing is looked up globally.

use crate::api::{self, AppContext};
use crate::dispatch::Dispatcher;
use crate::gateway::{MemoryBackend, PlaybackBackend, PlaybackGateway, SpotifyBackend};
use crate::queue::QueueStore;
use crate::scheduler::{Scheduler, SchedulerSettings};
use axum::Router;
use partyq_common::config::{BackendKind, TomlConfig};
use partyq_common::{EventBus, Result};
use std::sync::Arc;
use tracing::info;

/// Event bus capacity per subscriber
const EVENT_CAPACITY: usize = 256;

/// Construct the configured playback backend
pub fn build_backend(config: &TomlConfig) -> Result<Arc<dyn PlaybackBackend>> {
    let backend: Arc<dyn PlaybackBackend> = match config.playback.backend {
        BackendKind::Spotify => Arc::new(SpotifyBackend::new(&config.spotify)?),
        BackendKind::Memory => Arc::new(MemoryBackend::with_demo_catalog()),
    };
    info!("Playback backend: {}", backend.name());
    Ok(backend)
}

/// All long-lived services of one process
pub struct App {
    pub events: EventBus,
    pub store: Arc<QueueStore>,
    pub gateway: Arc<PlaybackGateway>,
    pub scheduler: Arc<Scheduler>,
    pub dispatcher: Arc<Dispatcher>,
}

impl App {
    pub fn new(config: &TomlConfig, backend: Arc<dyn PlaybackBackend>) -> Self {
        let events = EventBus::new(EVENT_CAPACITY);
        let store = Arc::new(QueueStore::new(events.clone()));
        let gateway = Arc::new(PlaybackGateway::new(
            backend,
            config.playback.preferred_device.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            events.clone(),
            SchedulerSettings::from(&config.scheduler),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            events.clone(),
            config.party.admin_password.clone(),
            config.playback.volume_step,
        ));

        Self {
            events,
            store,
            gateway,
            scheduler,
            dispatcher,
        }
    }

    pub fn router(&self) -> Router {
        api::create_router(AppContext {
            dispatcher: Arc::clone(&self.dispatcher),
            scheduler: Arc::clone(&self.scheduler),
            events: self.events.clone(),
            backend_name: self.gateway.backend_name(),
            startup_time: chrono::Utc::now(),
        })
    }
}
