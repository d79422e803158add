//! Connection state machine for the backend link.
//!
//! Transitions only happen on backend-reported connect/disconnect events:
//! - Disconnected -> Connected (on connect, endpoint recorded)
//! - Connected -> Disconnected (on disconnect, all pending calls cancelled
//!   by the bridge)
//!
//! Repeated events in the same direction are no-ops so that notifications
//! fire exactly once per transition.

use log::debug;

use super::protocol::Endpoint;

/// State of the backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No backend is reachable; latent calls fail immediately
    #[default]
    Disconnected,
    /// Backend reported ready
    Connected,
}

/// Tracks the connection flag together with the endpoint it refers to.
#[derive(Debug, Default)]
pub(crate) struct ConnectionTracker {
    state: ConnectionState,
    endpoint: Option<Endpoint>,
}

impl ConnectionTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Endpoint of the current connection, or of the last one after a disconnect.
    pub(crate) fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Disconnected -> Connected.
    ///
    /// Returns the endpoint to announce, or `None` when already connected.
    pub(crate) fn set_connected(&mut self, endpoint: Endpoint) -> Option<Endpoint> {
        if self.is_connected() {
            debug!(
                target: "inference_bridge::connection",
                "Ignoring connect to {} while connected to {:?}",
                endpoint,
                self.endpoint
            );
            return None;
        }
        self.state = ConnectionState::Connected;
        self.endpoint = Some(endpoint.clone());
        Some(endpoint)
    }

    /// Connected -> Disconnected.
    ///
    /// Returns the endpoint that was dropped, or `None` when already disconnected.
    pub(crate) fn set_disconnected(&mut self) -> Option<Endpoint> {
        if !self.is_connected() {
            return None;
        }
        self.state = ConnectionState::Disconnected;
        // Connected always records an endpoint
        self.endpoint.clone()
    }
}
