//! Counters for correlation problems absorbed by the bridge.
//!
//! Correlation errors never reach the caller; they are logged here and
//! counted so that a backend integration bug stays visible.

use log::{debug, error, warn};
use serde::Serialize;

use crate::error::CorrelationError;

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub unknown_tokens: u64,
    pub channel_mismatches: u64,
    pub double_resolutions: u64,
    pub already_parked: u64,
    pub completed_calls: u64,
    pub cancelled_calls: u64,
    pub broadcasts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    counts: DiagnosticsSnapshot,
}

impl Diagnostics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_correlation_error(&mut self, err: &CorrelationError) {
        match err {
            // Late results after a cancel land here routinely
            CorrelationError::UnknownToken { .. } => {
                debug!(target: "inference_bridge::router", "Dropping result: {}", err);
                self.counts.unknown_tokens += 1;
            }
            CorrelationError::ChannelMismatch { .. } => {
                warn!(target: "inference_bridge::router", "Rejecting result: {}", err);
                self.counts.channel_mismatches += 1;
            }
            CorrelationError::DoubleResolution { .. } => {
                error!(
                    target: "inference_bridge::router",
                    "Backend protocol error: {}",
                    err
                );
                self.counts.double_resolutions += 1;
            }
            CorrelationError::AlreadyParked { .. } => {
                error!(target: "inference_bridge::latent", "{}", err);
                self.counts.already_parked += 1;
            }
        }
    }

    pub(crate) fn record_completed(&mut self) {
        self.counts.completed_calls += 1;
    }

    pub(crate) fn record_cancelled(&mut self, count: usize) {
        self.counts.cancelled_calls += count as u64;
    }

    pub(crate) fn record_broadcast(&mut self) {
        self.counts.broadcasts += 1;
    }

    pub(crate) fn snapshot(&self) -> DiagnosticsSnapshot {
        self.counts
    }
}
