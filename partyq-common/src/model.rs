//! Track, playback and queue model types
//!
//! Types here are plain data: they carry no locks and perform no I/O. The
//! queue store wraps them in its own entries; the gateway produces them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Opaque external track identifier (e.g. `spotify:track:4uLU6hMCjMI75M1A2tKUQC`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TrackId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque, unguessable client session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Immutable track descriptor
///
/// Created when a search or lookup resolves it, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub track_id: TrackId,
    pub title: String,
    /// Artist names joined for display (`"A & B"`)
    pub artist: String,
    pub album: String,
    pub duration_ms: u64,
    pub icon_uri: String,
}

/// Join artist names the way they are displayed to clients
pub fn join_artists<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| n.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" & ")
}

/// Snapshot of what the playback service reports right now
///
/// Ephemeral: recomputed on every poll, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackTrack {
    #[serde(flatten)]
    pub track: Track,
    pub is_playing: bool,
    pub progress_ms: u64,
}

impl PlaybackTrack {
    pub fn track_id(&self) -> &TrackId {
        &self.track.track_id
    }
}

/// Which of the two queues an entry lives in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    #[default]
    Normal,
    Admin,
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueType::Normal => write!(f, "normal"),
            QueueType::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for QueueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(QueueType::Normal),
            "admin" => Ok(QueueType::Admin),
            other => Err(Error::InvalidFormat(format!(
                "queue type must either be 'admin' or 'normal', got '{}'",
                other
            ))),
        }
    }
}

/// Scheduler state machine position
///
/// Owned and written exclusively by the scheduler; everyone else reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Nothing scheduled; waiting for a queued track and a free device
    #[default]
    Idle,
    /// Next track must be popped and handed to the gateway
    PlayNextSong,
    /// Play was issued; waiting for the service to report the track
    CheckPlaying,
    /// Requested track confirmed playing; watching for its end
    Playing,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::PlayNextSong => "play_next_song",
            SchedulerState::CheckPlaying => "check_playing",
            SchedulerState::Playing => "playing",
        };
        f.write_str(s)
    }
}

/// Player control actions a client may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerAction {
    Play,
    Pause,
    Stop,
    Skip,
    VolumeUp,
    VolumeDown,
}

impl fmt::Display for PlayerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerAction::Play => "play",
            PlayerAction::Pause => "pause",
            PlayerAction::Stop => "stop",
            PlayerAction::Skip => "skip",
            PlayerAction::VolumeUp => "volume_up",
            PlayerAction::VolumeDown => "volume_down",
        };
        f.write_str(s)
    }
}

impl FromStr for PlayerAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "play" => Ok(PlayerAction::Play),
            "pause" => Ok(PlayerAction::Pause),
            "stop" => Ok(PlayerAction::Stop),
            "skip" => Ok(PlayerAction::Skip),
            "volume_up" => Ok(PlayerAction::VolumeUp),
            "volume_down" => Ok(PlayerAction::VolumeDown),
            other => Err(Error::InvalidFormat(format!(
                "'{}' is not a valid player action",
                other
            ))),
        }
    }
}
