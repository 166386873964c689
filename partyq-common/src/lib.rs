//! # PartyQ Common Library
//!
//! Shared code for the PartyQ services including:
//! - Track, playback and queue model types
//! - The error taxonomy used across the queue, scheduler and gateway
//! - Configuration loading (TOML bootstrap with layered overrides)
//! - Event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;
pub mod model;

pub use error::{Error, Result};
pub use events::{EventBus, PartyEvent};
pub use model::{
    PlaybackTrack, PlayerAction, QueueType, SchedulerState, SessionId, Track, TrackId,
};
