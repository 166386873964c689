//! Runtime configuration resolution
//!
//! Combines the TOML bootstrap file, environment variables and command-line
//! overrides into one validated [`TomlConfig`].

use partyq_common::config::{resolve_config_path, BackendKind, TomlConfig};
use partyq_common::Result;
use std::path::PathBuf;

/// Values given on the command line (or their `PARTYQ_*` env fallbacks)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub backend: Option<BackendKind>,
}

/// Validated configuration plus the file it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TomlConfig,
    /// `None` when running on built-in defaults
    pub source: Option<PathBuf>,
}

/// Resolve, load, overlay and validate the configuration
pub fn load(overrides: &CliOverrides) -> Result<LoadedConfig> {
    let path = resolve_config_path(overrides.config.as_deref());
    let mut config = TomlConfig::load_or_default(path.as_deref())?;
    config.apply_env_overrides();

    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(backend) = overrides.backend {
        config.playback.backend = backend;
    }
    config.validate()?;

    Ok(LoadedConfig {
        config,
        source: path.filter(|p| p.exists()),
    })
}

/// Default tracing filter for a configured log level
pub fn log_filter(level: &str) -> String {
    format!(
        "partyq_server={level},partyq_common={level},tower_http=info",
        level = level
    )
}
