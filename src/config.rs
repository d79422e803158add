pub mod defaults;
pub mod load;
pub mod user;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

pub use load::{SettingsEvent, SettingsEventKind, SettingsLoadOutcome, load_settings};
pub use user::{UserConfigError, UserConfigResult, load_user_config, user_config_path};

/// File name of user and project configuration files.
pub const CONFIG_FILE_NAME: &str = "inference-bridge.toml";

/// One configuration layer as written in TOML or JSON. Unset keys fall
/// through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    pub default_input_function: Option<String>,
    pub default_raw_input_function: Option<String>,
    pub retired_token_capacity: Option<usize>,
    pub pending_warn_threshold: Option<usize>,
    pub broadcast_unmatched_results: Option<bool>,
}

/// Effective settings of a bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSettings {
    /// Function name for structured input sent without one
    pub default_input_function: String,
    /// Function name for raw input sent without one
    pub default_raw_input_function: String,
    /// Retired tokens remembered to tell double resolutions from late results
    pub retired_token_capacity: usize,
    /// Pending calls above which a warning is logged (0 disables)
    pub pending_warn_threshold: usize,
    /// Broadcast results whose token matches no pending call instead of dropping them
    pub broadcast_unmatched_results: bool,
}

impl BridgeSettings {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.default_input_function.trim().is_empty() {
            return Err(BridgeError::config("defaultInputFunction must not be empty"));
        }
        if self.default_raw_input_function.trim().is_empty() {
            return Err(BridgeError::config(
                "defaultRawInputFunction must not be empty",
            ));
        }
        Ok(())
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings::from(defaults::default_config())
    }
}

impl From<BridgeConfig> for BridgeSettings {
    fn from(config: BridgeConfig) -> Self {
        let config = merge_configs(Some(defaults::default_config()), Some(config))
            .unwrap_or_else(defaults::default_config);
        Self {
            default_input_function: config.default_input_function.unwrap_or_default(),
            default_raw_input_function: config.default_raw_input_function.unwrap_or_default(),
            retired_token_capacity: config.retired_token_capacity.unwrap_or_default(),
            pending_warn_threshold: config.pending_warn_threshold.unwrap_or_default(),
            broadcast_unmatched_results: config.broadcast_unmatched_results.unwrap_or_default(),
        }
    }
}

/// Merge layers in order; later layers take precedence.
pub fn merge_all(configs: &[Option<BridgeConfig>]) -> Option<BridgeConfig> {
    configs.iter().cloned().reduce(merge_configs).flatten()
}

/// Merge two layers, preferring values from `primary` over `fallback`
pub fn merge_configs(
    fallback: Option<BridgeConfig>,
    primary: Option<BridgeConfig>,
) -> Option<BridgeConfig> {
    match (fallback, primary) {
        (None, None) => None,
        (Some(config), None) | (None, Some(config)) => Some(config),
        (Some(fallback), Some(primary)) => Some(BridgeConfig {
            default_input_function: primary
                .default_input_function
                .or(fallback.default_input_function),
            default_raw_input_function: primary
                .default_raw_input_function
                .or(fallback.default_raw_input_function),
            retired_token_capacity: primary
                .retired_token_capacity
                .or(fallback.retired_token_capacity),
            pending_warn_threshold: primary
                .pending_warn_threshold
                .or(fallback.pending_warn_threshold),
            broadcast_unmatched_results: primary
                .broadcast_unmatched_results
                .or(fallback.broadcast_unmatched_results),
        }),
    }
}

/// Run `f` with XDG_CONFIG_HOME set to `value` (or unset), restoring the
/// previous value afterwards. Callers must be `#[serial(xdg_env)]`.
#[cfg(test)]
pub(crate) fn with_xdg<T>(value: Option<&std::path::Path>, f: impl FnOnce() -> T) -> T {
    let original = std::env::var_os("XDG_CONFIG_HOME");
    // SAFETY: #[serial(xdg_env)] prevents concurrent modification of XDG_CONFIG_HOME
    unsafe {
        match value {
            Some(path) => std::env::set_var("XDG_CONFIG_HOME", path),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
    let result = f();
    // SAFETY: same as above, restoring the original value
    unsafe {
        match original {
            Some(val) => std::env::set_var("XDG_CONFIG_HOME", val),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
    result
}
