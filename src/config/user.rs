//! User configuration loading for inference-bridge.
//!
//! User config location: $XDG_CONFIG_HOME/inference-bridge/inference-bridge.toml
//! Fallback: the platform config directory (`dirs::config_dir()`)

use std::path::PathBuf;

use thiserror::Error;

use super::{BridgeConfig, CONFIG_FILE_NAME};

const APP_DIR: &str = "inference-bridge";

#[derive(Debug, Error)]
pub enum UserConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub type UserConfigResult<T> = Result<T, UserConfigError>;

/// Returns the path to the user configuration file.
///
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/inference-bridge/inference-bridge.toml
/// 2. Otherwise: <platform config dir>/inference-bridge/inference-bridge.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => dirs::config_dir()?,
    };
    Some(base.join(APP_DIR).join(CONFIG_FILE_NAME))
}

/// Load the user config file. `Ok(None)` when there is none.
pub fn load_user_config() -> UserConfigResult<Option<BridgeConfig>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path).map_err(|source| UserConfigError::Io {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| UserConfigError::Parse { path, source })
}
