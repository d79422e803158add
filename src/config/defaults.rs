//! Default configuration values for inference-bridge.
//!
//! These form the lowest configuration layer; every other layer only
//! overrides what it sets.

use super::BridgeConfig;
use crate::bridge::protocol::{DEFAULT_INPUT_FUNCTION, DEFAULT_RAW_INPUT_FUNCTION};
use crate::bridge::registry::DEFAULT_RETIRED_TOKEN_CAPACITY;

/// Pending calls above which the registry starts warning.
pub const DEFAULT_PENDING_WARN_THRESHOLD: usize = 4096;

/// Returns the fully populated default configuration layer.
pub fn default_config() -> BridgeConfig {
    BridgeConfig {
        default_input_function: Some(DEFAULT_INPUT_FUNCTION.to_string()),
        default_raw_input_function: Some(DEFAULT_RAW_INPUT_FUNCTION.to_string()),
        retired_token_capacity: Some(DEFAULT_RETIRED_TOKEN_CAPACITY),
        pending_warn_threshold: Some(DEFAULT_PENDING_WARN_THRESHOLD),
        broadcast_unmatched_results: Some(false),
    }
}
