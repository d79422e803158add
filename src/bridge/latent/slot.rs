//! Output slots that receive the outcome of a latent call.

use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::bridge::protocol::{ChannelKind, Payload};
use crate::error::LockResultExt;

/// What a resumed call site finds in its output slot.
pub type LatentOutcome<T> = Result<T, LatentFailure>;

/// Why a latent call was cancelled instead of completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The backend connection dropped while the call was waiting
    Disconnected,
    /// The call was issued while no backend was connected
    NotConnected,
    /// The owner of the call site was torn down
    CallerTeardown,
    /// An external watchdog gave up on the call
    Watchdog,
    /// The transport could not push the request
    TransportFailure(String),
    /// The backend reported that it could not answer
    BackendFailure(String),
    /// The bridge itself is shutting down
    Shutdown,
    /// Cancelled by token
    Explicit,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Disconnected => f.write_str("backend disconnected"),
            CancelReason::NotConnected => f.write_str("not connected to a backend"),
            CancelReason::CallerTeardown => f.write_str("caller torn down"),
            CancelReason::Watchdog => f.write_str("watchdog timeout"),
            CancelReason::TransportFailure(message) => write!(f, "transport failure: {message}"),
            CancelReason::BackendFailure(message) => write!(f, "backend failure: {message}"),
            CancelReason::Shutdown => f.write_str("bridge shut down"),
            CancelReason::Explicit => f.write_str("cancelled"),
        }
    }
}

/// Failure marker written into the output slot of a cancelled call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("latent call cancelled: {reason}")]
pub struct LatentFailure {
    pub reason: CancelReason,
}

/// Shared cell the caller designates as the output of a latent call.
///
/// The caller keeps one clone and hands another to the bridge. The bridge
/// fills it when the call completes or is cancelled, before the call site is
/// resumed.
#[derive(Debug)]
pub struct OutputSlot<T> {
    inner: Arc<Mutex<Option<LatentOutcome<T>>>>,
}

impl<T> OutputSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.inner
            .lock()
            .recover_poison("OutputSlot::is_filled")
            .is_some()
    }

    /// Take the outcome out, leaving the slot empty for reuse.
    pub fn take(&self) -> Option<LatentOutcome<T>> {
        self.inner.lock().recover_poison("OutputSlot::take").take()
    }

    pub(crate) fn fill(&self, outcome: LatentOutcome<T>) {
        *self.inner.lock().recover_poison("OutputSlot::fill") = Some(outcome);
    }
}

impl<T: Clone> OutputSlot<T> {
    /// Copy of the outcome, leaving it in place.
    pub fn get(&self) -> Option<LatentOutcome<T>> {
        self.inner.lock().recover_poison("OutputSlot::get").clone()
    }
}

impl<T> Clone for OutputSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for OutputSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel-typed output slot stored with a parked continuation.
#[derive(Debug, Clone)]
pub(crate) enum OutputTarget {
    Structured(OutputSlot<String>),
    Raw(OutputSlot<Vec<f32>>),
}

impl OutputTarget {
    pub(crate) fn channel(&self) -> ChannelKind {
        match self {
            OutputTarget::Structured(_) => ChannelKind::Structured,
            OutputTarget::Raw(_) => ChannelKind::Raw,
        }
    }

    /// Write a successful result. Hands the payload back if its channel
    /// does not match the slot.
    pub(crate) fn complete(&self, payload: Payload) -> Result<(), Payload> {
        match (self, payload) {
            (OutputTarget::Structured(slot), Payload::Structured(data)) => {
                slot.fill(Ok(data));
                Ok(())
            }
            (OutputTarget::Raw(slot), Payload::Raw(data)) => {
                slot.fill(Ok(data));
                Ok(())
            }
            (_, payload) => Err(payload),
        }
    }

    pub(crate) fn fail(&self, reason: CancelReason) {
        let failure = LatentFailure { reason };
        match self {
            OutputTarget::Structured(slot) => slot.fill(Err(failure)),
            OutputTarget::Raw(slot) => slot.fill(Err(failure)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_cell() {
        let slot = OutputSlot::<String>::new();
        let bridge_side = slot.clone();

        bridge_side.fill(Ok("pong".to_string()));

        assert!(slot.is_filled());
        assert_eq!(slot.get(), Some(Ok("pong".to_string())));
        assert_eq!(slot.take(), Some(Ok("pong".to_string())));
        assert!(!slot.is_filled());
    }

    #[test]
    fn target_rejects_payload_of_other_channel() {
        let slot = OutputSlot::<Vec<f32>>::new();
        let target = OutputTarget::Raw(slot.clone());

        let rejected = target.complete(Payload::from("text"));
        assert_eq!(rejected, Err(Payload::from("text")));
        assert!(!slot.is_filled());
    }

    #[test]
    fn fail_writes_failure_marker() {
        let slot = OutputSlot::<String>::new();
        OutputTarget::Structured(slot.clone()).fail(CancelReason::Disconnected);

        let outcome = slot.take().expect("slot should be filled");
        assert_eq!(
            outcome,
            Err(LatentFailure {
                reason: CancelReason::Disconnected
            })
        );
    }

    #[test]
    fn failure_message_includes_reason() {
        let failure = LatentFailure {
            reason: CancelReason::TransportFailure("broken pipe".to_string()),
        };
        assert_eq!(
            failure.to_string(),
            "latent call cancelled: transport failure: broken pipe"
        );
    }
}
