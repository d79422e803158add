//! Error handling types for inference-bridge
//!
//! Correlation errors are absorbed at the router/registry boundary and only
//! reach diagnostics. Bridge errors are returned from caller-facing calls.

use std::sync::{MutexGuard, PoisonError};
use thiserror::Error;

use crate::bridge::protocol::ChannelKind;
use crate::bridge::token::CorrelationToken;

/// Errors raised while matching a backend result to a pending call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// No pending call exists for the token (never issued, or cancelled before
    /// the result arrived)
    #[error("unknown correlation token {token}")]
    UnknownToken { token: CorrelationToken },

    /// The payload belongs to the other channel; the pending call is left untouched
    #[error("channel mismatch for {token}: pending call is {expected}, result is {actual}")]
    ChannelMismatch {
        token: CorrelationToken,
        expected: ChannelKind,
        actual: ChannelKind,
    },

    /// The token was already resolved once
    #[error("correlation token {token} was already resolved")]
    DoubleResolution { token: CorrelationToken },

    /// A continuation is already parked for the token
    #[error("a continuation is already parked for {token}")]
    AlreadyParked { token: CorrelationToken },
}

/// Errors reported by a backend transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has shut down and accepts no more requests
    #[error("transport is closed")]
    Closed,

    /// The transport refused the request
    #[error("transport rejected request: {0}")]
    Rejected(String),
}

/// Errors returned from caller-facing bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The token sequence space is used up. The registry has leaked calls;
    /// the bridge must be rebuilt.
    #[error("correlation token space exhausted after {issued} tokens")]
    TokenExhaustion { issued: u64 },

    /// No backend connection is established
    #[error("not connected to a backend")]
    NotConnected,

    /// The transport failed to push the request
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }
}

/// Recover a poisoned mutex guard, logging which operation hit it.
pub(crate) trait LockResultExt<'a, T> {
    fn recover_poison(self, context: &str) -> MutexGuard<'a, T>;
}

impl<'a, T> LockResultExt<'a, T> for Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>> {
    fn recover_poison(self, context: &str) -> MutexGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "inference_bridge::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_mismatch_message_names_both_channels() {
        let err = CorrelationError::ChannelMismatch {
            token: CorrelationToken::from_raw(0x0001_0000_0000_0007),
            expected: ChannelKind::Structured,
            actual: ChannelKind::Raw,
        };
        let message = err.to_string();
        assert!(message.contains("structured"));
        assert!(message.contains("raw"));
    }

    #[test]
    fn transport_error_converts_into_bridge_error() {
        let err: BridgeError = TransportError::Closed.into();
        assert!(matches!(err, BridgeError::Transport(TransportError::Closed)));
        assert_eq!(err.to_string(), "transport error: transport is closed");
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let mutex = std::sync::Arc::new(std::sync::Mutex::new(5));
        let clone = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let guard = mutex.lock().recover_poison("test");
        assert_eq!(*guard, 5);
    }
}
