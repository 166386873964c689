//! Spotify Web API backend
//!
//! Talks to the player endpoints of the Spotify Web API with an access
//! token obtained from a long-lived refresh token. A 401 answer invalidates
//! the cached token and surfaces as `CredentialExpired`; the gateway then
//! calls [`PlaybackBackend::refresh_credentials`] and retries.

use super::{Device, PlaybackBackend};
use async_trait::async_trait;
use partyq_common::config::SpotifyConfig;
use partyq_common::model::join_artists;
use partyq_common::{Error, PlaybackTrack, Result, Track, TrackId};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const USER_AGENT: &str = concat!("partyq/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Tokens are treated as expired this long before the service says so
const EXPIRY_MARGIN: Duration = Duration::from_secs(10);
const TRACK_URI_PREFIX: &str = "spotify:track:";
const MAX_SEARCH_LIMIT: usize = 50;

/// Spotify client errors
#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Access token expired or revoked")]
    Unauthorized,

    #[error("No active device")]
    NoActiveDevice,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Refresh token rejected: {0}")]
    RefreshRejected(String),
}

impl From<SpotifyError> for Error {
    fn from(err: SpotifyError) -> Self {
        let msg = err.to_string();
        match err {
            SpotifyError::Unauthorized => Error::CredentialExpired(msg),
            SpotifyError::NoActiveDevice => Error::NoDeviceAvailable(msg),
            SpotifyError::Network(_) | SpotifyError::RateLimited | SpotifyError::Parse(_) => {
                Error::GatewayUnavailable(msg)
            }
            SpotifyError::RefreshRejected(_) => Error::NotInitialized(msg),
            SpotifyError::Api(status, _) => match status {
                400 => Error::InvalidValue(msg),
                403 => Error::AccessDenied(msg),
                404 => Error::NotFound(msg),
                _ => Error::GatewayUnavailable(msg),
            },
        }
    }
}

/// Classify a non-success answer
fn classify_error(status: StatusCode, body: &str) -> SpotifyError {
    let detail: Option<ErrorDetail> = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error);

    if status == StatusCode::UNAUTHORIZED {
        return SpotifyError::Unauthorized;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SpotifyError::RateLimited;
    }
    if detail
        .as_ref()
        .and_then(|d| d.reason.as_deref())
        .is_some_and(|r| r == "NO_ACTIVE_DEVICE")
    {
        return SpotifyError::NoActiveDevice;
    }
    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| body.to_string());
    SpotifyError::Api(status.as_u16(), message)
}

/// Accept both bare ids and `spotify:track:` URIs
fn bare_track_id(track_id: &TrackId) -> &str {
    track_id
        .as_str()
        .strip_prefix(TRACK_URI_PREFIX)
        .unwrap_or(track_id.as_str())
}

fn track_uri(track_id: &TrackId) -> String {
    format!("{}{}", TRACK_URI_PREFIX, bare_track_id(track_id))
}

// ----------------------------------------------------------------------
// Wire types
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    /// Present when the service rotates the refresh token
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    uri: String,
    name: String,
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: SpotifyAlbum,
}

impl From<SpotifyTrack> for Track {
    fn from(t: SpotifyTrack) -> Self {
        Track {
            track_id: TrackId::new(t.uri),
            title: t.name,
            artist: join_artists(t.artists.iter().map(|a| a.name.as_str())),
            album: t.album.name,
            duration_ms: t.duration_ms,
            icon_uri: t
                .album
                .images
                .into_iter()
                .next()
                .map(|i| i.url)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpotifyDevice {
    id: Option<String>,
    name: String,
    #[serde(default)]
    is_active: bool,
    volume_percent: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    devices: Vec<SpotifyDevice>,
}

#[derive(Debug, Deserialize)]
struct CurrentPlayback {
    #[serde(default)]
    is_playing: bool,
    progress_ms: Option<u64>,
    item: Option<SpotifyTrack>,
    device: Option<SpotifyDevice>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    device_ids: [&'a str; 1],
    play: bool,
}

#[derive(Debug, Serialize)]
struct PlayRequest {
    uris: Vec<String>,
}

// ----------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Playback backend for the Spotify Web API
pub struct SpotifyBackend {
    http_client: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: RwLock<String>,
    token: RwLock<Option<AccessToken>>,
    /// Serializes token refreshes
    refresh_lock: Mutex<()>,
}

impl SpotifyBackend {
    /// Backend for the public Spotify endpoints
    pub fn new(config: &SpotifyConfig) -> Result<Self> {
        Self::with_endpoints(config, SPOTIFY_API_BASE, SPOTIFY_TOKEN_URL)
    }

    /// Backend for custom endpoints
    pub fn with_endpoints(config: &SpotifyConfig, api_base: &str, token_url: &str) -> Result<Self> {
        let (client_id, client_secret, refresh_token) = match (
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
            config.refresh_token.as_deref(),
        ) {
            (Some(id), Some(secret), Some(refresh)) if config.is_complete() => {
                (id.to_string(), secret.to_string(), refresh.to_string())
            }
            _ => {
                return Err(Error::NotInitialized(
                    "Spotify client_id, client_secret and refresh_token are required".to_string(),
                ))
            }
        };

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            client_id,
            client_secret,
            refresh_token: RwLock::new(refresh_token),
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    async fn access_token(&self) -> std::result::Result<String, SpotifyError> {
        match self.token.read().await.as_ref() {
            Some(token) if token.is_fresh() => Ok(token.value.clone()),
            _ => Err(SpotifyError::Unauthorized),
        }
    }

    /// Forget `rejected` unless another caller already replaced it
    async fn invalidate_token(&self, rejected: &str) {
        let mut token = self.token.write().await;
        if token.as_ref().is_some_and(|t| t.value == rejected) {
            *token = None;
        }
    }

    /// Send an authorized request, returning the body of a success answer
    ///
    /// `Ok(None)` stands for 204 No Content.
    async fn send(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> std::result::Result<Option<String>, SpotifyError> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.api_base, path);
        debug!(method = %method, url = %url, "Spotify request");

        let request = build(self.http_client.request(method, &url).bearer_auth(&token));
        let response = request
            .send()
            .await
            .map_err(|e| SpotifyError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SpotifyError::Network(e.to_string()))?;

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let err = classify_error(status, &body);
            if matches!(err, SpotifyError::Unauthorized) {
                self.invalidate_token(&token).await;
            }
            return Err(err);
        }
        Ok(if body.trim().is_empty() { None } else { Some(body) })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> std::result::Result<Option<T>, SpotifyError> {
        match self.send(Method::GET, path, |r| r).await? {
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| SpotifyError::Parse(e.to_string())),
            None => Ok(None),
        }
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<()> {
        self.send(method, path, build).await?;
        Ok(())
    }

    async fn player(&self) -> std::result::Result<Option<CurrentPlayback>, SpotifyError> {
        self.get_json("/me/player").await
    }
}

#[async_trait]
impl PlaybackBackend for SpotifyBackend {
    fn name(&self) -> &'static str {
        "spotify"
    }

    async fn refresh_credentials(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        if self.token.read().await.as_ref().is_some_and(AccessToken::is_fresh) {
            debug!("Access token already renewed, refresh skipped");
            return Ok(());
        }

        let refresh_token = self.refresh_token.read().await.clone();
        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SpotifyError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            warn!("Spotify rejected the refresh token ({}): {}", status, body);
            return Err(SpotifyError::RefreshRejected(body).into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body).into());
        }

        let renewed: TokenResponse = response
            .json()
            .await
            .map_err(|e| SpotifyError::Parse(e.to_string()))?;

        let lifetime = Duration::from_secs(renewed.expires_in).saturating_sub(EXPIRY_MARGIN);
        *self.token.write().await = Some(AccessToken {
            value: renewed.access_token,
            expires_at: Instant::now() + lifetime,
        });
        if let Some(rotated) = renewed.refresh_token {
            *self.refresh_token.write().await = rotated;
        }
        info!("Spotify access token renewed (valid {}s)", lifetime.as_secs());
        Ok(())
    }

    async fn search(&self, pattern: &str, limit: usize) -> Result<Vec<Track>> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let limit_param = limit.to_string();
        let body = self
            .send(Method::GET, "/search", |r| {
                r.query(&[("q", pattern), ("type", "track"), ("limit", limit_param.as_str())])
            })
            .await?;
        let Some(body) = body else {
            return Ok(Vec::new());
        };
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| SpotifyError::Parse(e.to_string()))?;
        Ok(parsed.tracks.items.into_iter().map(Track::from).collect())
    }

    async fn lookup_track(&self, track_id: &TrackId) -> Result<Track> {
        let path = format!("/tracks/{}", bare_track_id(track_id));
        self.get_json::<SpotifyTrack>(&path)
            .await?
            .map(Track::from)
            .ok_or_else(|| Error::NotFound(format!("track '{}'", track_id)))
    }

    async fn current_playback(&self) -> Result<Option<PlaybackTrack>> {
        Ok(self.player().await?.and_then(|p| {
            let is_playing = p.is_playing;
            let progress_ms = p.progress_ms.unwrap_or(0);
            p.item.map(|item| PlaybackTrack {
                track: item.into(),
                is_playing,
                progress_ms,
            })
        }))
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        let response: Option<DevicesResponse> = self.get_json("/me/player/devices").await?;
        Ok(response
            .map(|r| r.devices)
            .unwrap_or_default()
            .into_iter()
            // Restricted devices come without an id and cannot be targeted
            .filter_map(|d| {
                d.id.map(|id| Device {
                    id,
                    name: d.name,
                    is_active: d.is_active,
                    volume_percent: d.volume_percent,
                })
            })
            .collect())
    }

    async fn transfer_playback(&self, device: &Device) -> Result<()> {
        let body = TransferRequest {
            device_ids: [device.id.as_str()],
            play: false,
        };
        self.command(Method::PUT, "/me/player", |r| r.json(&body))
            .await
    }

    async fn start_track(&self, track_id: &TrackId, device: &Device) -> Result<()> {
        let body = PlayRequest {
            uris: vec![track_uri(track_id)],
        };
        self.command(Method::PUT, "/me/player/play", |r| {
            r.query(&[("device_id", device.id.as_str())]).json(&body)
        })
        .await
    }

    async fn resume(&self) -> Result<()> {
        self.command(Method::PUT, "/me/player/play", |r| r).await
    }

    async fn pause(&self) -> Result<()> {
        self.command(Method::PUT, "/me/player/pause", |r| r).await
    }

    async fn skip(&self) -> Result<()> {
        self.command(Method::POST, "/me/player/next", |r| r).await
    }

    async fn volume(&self) -> Result<Option<u8>> {
        Ok(self
            .player()
            .await?
            .and_then(|p| p.device)
            .and_then(|d| d.volume_percent))
    }

    async fn set_volume(&self, percent: u8) -> Result<()> {
        let percent = percent.min(100).to_string();
        self.command(Method::PUT, "/me/player/volume", |r| {
            r.query(&[("volume_percent", percent.as_str())])
        })
        .await
    }
}
