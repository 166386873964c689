//! Configuration loading and config file resolution
//!
//! Bootstrap configuration lives in a single TOML file. Every section and
//! every key is optional; missing values fall back to built-in defaults.
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (applied by the server binary)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PARTYQ_CONFIG";
pub const SPOTIFY_CLIENT_ID_ENV: &str = "PARTYQ_SPOTIFY_CLIENT_ID";
pub const SPOTIFY_CLIENT_SECRET_ENV: &str = "PARTYQ_SPOTIFY_CLIENT_SECRET";
pub const SPOTIFY_REFRESH_TOKEN_ENV: &str = "PARTYQ_SPOTIFY_REFRESH_TOKEN";

/// Complete bootstrap configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub playback: PlaybackConfig,
    pub spotify: SpotifyConfig,
    pub party: PartyConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Scheduler timing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Poll interval in milliseconds
    pub interval_ms: u64,
    /// Polls spent confirming a freshly started track before giving up on it
    pub check_attempts: u32,
    /// A stopped track whose progress is below this is considered finished
    pub end_of_track_threshold_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            check_attempts: 5,
            end_of_track_threshold_ms: 1000,
        }
    }
}

/// Which playback backend renders audio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Spotify,
    /// Simulated in-process device
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Spotify => write!(f, "spotify"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spotify" => Ok(BackendKind::Spotify),
            "memory" => Ok(BackendKind::Memory),
            other => Err(Error::Config(format!("Unknown playback backend '{}'", other))),
        }
    }
}

/// Playback gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub backend: BackendKind,
    /// Device name preferred when starting playback
    pub preferred_device: Option<String>,
    /// Percent added or removed per volume up/down action
    pub volume_step: u8,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            preferred_device: None,
            volume_step: 10,
        }
    }
}

/// Spotify application credentials
///
/// The refresh token is obtained out of band (authorization code flow);
/// the service only ever refreshes access tokens with it.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

impl SpotifyConfig {
    pub fn is_complete(&self) -> bool {
        [&self.client_id, &self.client_secret, &self.refresh_token]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

// Secrets stay out of logs
impl fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Party rules
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartyConfig {
    /// Password that turns a new session into an admin session.
    /// When unset every session is an admin.
    pub admin_password: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load configuration from a file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration, degrading to defaults when no file is available
    ///
    /// A missing file only produces a warning. A file that exists but does
    /// not parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::load_file(path)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Overlay values supplied through environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(SPOTIFY_CLIENT_ID_ENV) {
            self.spotify.client_id = Some(v);
        }
        if let Ok(v) = std::env::var(SPOTIFY_CLIENT_SECRET_ENV) {
            self.spotify.client_secret = Some(v);
        }
        if let Ok(v) = std::env::var(SPOTIFY_REFRESH_TOKEN_ENV) {
            self.spotify.refresh_token = Some(v);
        }
    }

    /// Check values that cannot be expressed in the type system
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval_ms == 0 {
            return Err(Error::Config("scheduler.interval_ms must be > 0".into()));
        }
        if self.scheduler.check_attempts == 0 {
            return Err(Error::Config("scheduler.check_attempts must be > 0".into()));
        }
        if self.playback.volume_step == 0 || self.playback.volume_step > 100 {
            return Err(Error::Config(
                "playback.volume_step must be within 1..=100".into(),
            ));
        }
        if self.playback.backend == BackendKind::Spotify && !self.spotify.is_complete() {
            return Err(Error::NotInitialized(
                "spotify backend requires client_id, client_secret and refresh_token".into(),
            ));
        }
        Ok(())
    }
}

/// Locate the configuration file
///
/// Priority: explicit path, `PARTYQ_CONFIG`, user config dir
/// (`~/.config/partyq/config.toml` on Linux), `/etc/partyq/config.toml`.
/// An explicit path is returned even if it does not exist so the caller can
/// report it.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("partyq").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/partyq/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.scheduler.interval_ms, 1000);
        assert_eq!(config.scheduler.check_attempts, 5);
        assert_eq!(config.playback.backend, BackendKind::Spotify);
        assert_eq!(config.playback.volume_step, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.party.admin_password.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [server]
            port = 9000

            [playback]
            backend = "memory"
            preferred_device = "Living Room"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.playback.backend, BackendKind::Memory);
        assert_eq!(config.playback.preferred_device.as_deref(), Some("Living Room"));
        assert_eq!(config.scheduler.interval_ms, 1000);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::from_toml_str("[server\nport = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_spotify_backend_requires_credentials() {
        let config = TomlConfig::default();
        assert!(matches!(config.validate(), Err(Error::NotInitialized(_))));

        let mut config = TomlConfig::default();
        config.spotify = SpotifyConfig {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            refresh_token: Some("refresh".into()),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_backend_needs_no_credentials() {
        let mut config = TomlConfig::default();
        config.playback.backend = BackendKind::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_numbers() {
        let mut config = TomlConfig::default();
        config.playback.backend = BackendKind::Memory;
        config.scheduler.interval_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = TomlConfig::default();
        config.playback.backend = BackendKind::Memory;
        config.playback.volume_step = 101;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let spotify = SpotifyConfig {
            client_id: Some("id".into()),
            client_secret: Some("very-secret".into()),
            refresh_token: Some("refresh-me".into()),
        };
        let out = format!("{:?}", spotify);
        assert!(!out.contains("very-secret"));
        assert!(!out.contains("refresh-me"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("Memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("spotify".parse::<BackendKind>().unwrap(), BackendKind::Spotify);
        assert!("winamp".parse::<BackendKind>().is_err());
    }
}
