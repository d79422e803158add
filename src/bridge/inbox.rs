//! Hand-off of backend events from the backend's context to the caller's.
//!
//! The backend may report from any thread (a worker, an event-loop callback,
//! a socket reader). It only ever pushes into the queue; the caller drains
//! it once per tick, so every mutation of bridge state happens on the
//! caller's thread, in the order the backend reported.

use tokio::sync::mpsc;

use super::protocol::{BackendEvent, BackendResult, Endpoint, Payload};
use super::token::CorrelationToken;
use crate::error::TransportError;

/// Cloneable handle a transport uses to report backend events.
///
/// Sending never blocks and does not need a tokio runtime.
#[derive(Debug, Clone)]
pub struct BackendSink {
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl BackendSink {
    pub fn report(&self, event: BackendEvent) -> Result<(), TransportError> {
        self.tx.send(event).map_err(|_| TransportError::Closed)
    }

    pub fn connected(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        self.report(BackendEvent::Connected(endpoint))
    }

    pub fn disconnected(&self) -> Result<(), TransportError> {
        self.report(BackendEvent::Disconnected)
    }

    /// Report a result; `token` is `None` for fire-and-forget requests.
    pub fn result(
        &self,
        payload: Payload,
        function_name: impl Into<String>,
        token: Option<CorrelationToken>,
    ) -> Result<(), TransportError> {
        self.report(BackendEvent::Result(BackendResult {
            payload,
            function_name: function_name.into(),
            token,
        }))
    }

    /// `true` once the bridge owning the other end is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving end, owned by the bridge.
#[derive(Debug)]
pub(crate) struct Inbox {
    rx: mpsc::UnboundedReceiver<BackendEvent>,
}

impl Inbox {
    /// Take the events queued so far. Events pushed while draining wait
    /// for the next tick, so a busy backend cannot stall the caller.
    pub(crate) fn drain(&mut self) -> Vec<BackendEvent> {
        let queued = self.rx.len();
        let mut events = Vec::with_capacity(queued);
        while events.len() < queued {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }
}

pub(crate) fn backend_channel() -> (BackendSink, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BackendSink { tx }, Inbox { rx })
}
