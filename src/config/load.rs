//! Layered settings loading.
//!
//! Layers, lowest precedence first:
//! 1. programmed defaults
//! 2. user config ($XDG_CONFIG_HOME/inference-bridge/inference-bridge.toml)
//! 3. project config (<project root>/inference-bridge.toml)
//! 4. JSON overrides supplied by the embedding application
//!
//! Problems never abort loading; they are reported as events and the layer
//! is skipped.

use std::fs;
use std::path::Path;

use serde_json::Value;

use super::defaults::default_config;
use super::{BridgeConfig, BridgeSettings, CONFIG_FILE_NAME, load_user_config, merge_all};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsEventKind {
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsEvent {
    pub kind: SettingsEventKind,
    pub message: String,
}

impl SettingsEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Warning,
            message: message.into(),
        }
    }

    /// Forward the event to the `log` facade.
    pub fn log(&self) {
        match self.kind {
            SettingsEventKind::Info => {
                log::info!(target: "inference_bridge::config", "{}", self.message)
            }
            SettingsEventKind::Warning => {
                log::warn!(target: "inference_bridge::config", "{}", self.message)
            }
        }
    }
}

#[derive(Debug)]
pub struct SettingsLoadOutcome {
    pub settings: BridgeSettings,
    pub events: Vec<SettingsEvent>,
}

pub fn load_settings(project_root: Option<&Path>, overrides: Option<Value>) -> SettingsLoadOutcome {
    let mut events = Vec::new();

    let defaults = Some(default_config());
    let user_config = load_user_config_with_events(&mut events);
    let project_config = load_project_config(project_root, &mut events);
    let overrides = overrides.and_then(|value| parse_overrides(value, &mut events));

    let merged = merge_all(&[defaults, user_config, project_config, overrides]);
    let settings = merged.map(BridgeSettings::from).unwrap_or_default();

    let settings = match settings.validate() {
        Ok(()) => settings,
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "{err}; falling back to default settings"
            )));
            BridgeSettings::default()
        }
    };

    SettingsLoadOutcome { settings, events }
}

fn load_user_config_with_events(events: &mut Vec<SettingsEvent>) -> Option<BridgeConfig> {
    match load_user_config() {
        Ok(Some(config)) => {
            events.push(SettingsEvent::info("Loaded user config"));
            Some(config)
        }
        // No user config file is the common case
        Ok(None) => None,
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to load user config: {}",
                err
            )));
            None
        }
    }
}

fn load_project_config(
    root: Option<&Path>,
    events: &mut Vec<SettingsEvent>,
) -> Option<BridgeConfig> {
    let config_path = root?.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        return None;
    }

    events.push(SettingsEvent::info(format!(
        "Found config file: {}",
        config_path.display()
    )));

    match fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<BridgeConfig>(&contents) {
            Ok(config) => Some(config),
            Err(err) => {
                events.push(SettingsEvent::warning(format!(
                    "Failed to parse {}: {}",
                    CONFIG_FILE_NAME, err
                )));
                None
            }
        },
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to read {}: {}",
                CONFIG_FILE_NAME, err
            )));
            None
        }
    }
}

fn parse_overrides(value: Value, events: &mut Vec<SettingsEvent>) -> Option<BridgeConfig> {
    match serde_json::from_value::<BridgeConfig>(value) {
        Ok(config) => Some(config),
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to parse override settings: {}",
                err
            )));
            None
        }
    }
}
