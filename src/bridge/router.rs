//! Routing of backend results to pending calls or broadcast subscribers.
//!
//! - Token present and resolving: the latent call completes (latent path)
//! - No token: the result is broadcast on its channel (fire-and-forget path)
//! - Token present but not resolving: the correlation error is recorded and
//!   the result is dropped, unless unmatched results are configured to fall
//!   back to broadcast (unknown tokens only; mismatches and double
//!   resolutions are never delivered)

use log::trace;

use super::diagnostics::Diagnostics;
use super::latent::LatentBridge;
use super::notifications::Notifications;
use super::protocol::{BackendResult, ChannelKind};
use super::registry::PendingCallRegistry;
use super::token::CorrelationToken;
use crate::error::CorrelationError;

/// What happened to one backend result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Resolved a latent call; its call site resumes on this tick
    Resolved(CorrelationToken),
    /// Broadcast to `subscribers` handlers of the channel's notification
    Broadcast {
        channel: ChannelKind,
        subscribers: usize,
    },
    /// Not delivered
    Rejected(CorrelationError),
}

/// The bridge state a result may touch.
pub(crate) struct RouteTargets<'a> {
    pub(crate) registry: &'a mut PendingCallRegistry,
    pub(crate) latent: &'a mut LatentBridge,
    pub(crate) notifications: &'a mut Notifications,
    pub(crate) diagnostics: &'a mut Diagnostics,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ResultRouter {
    broadcast_unmatched: bool,
}

impl ResultRouter {
    pub(crate) fn new(broadcast_unmatched: bool) -> Self {
        Self {
            broadcast_unmatched,
        }
    }

    pub(crate) fn route(&self, result: BackendResult, targets: RouteTargets<'_>) -> RouteOutcome {
        let RouteTargets {
            registry,
            latent,
            notifications,
            diagnostics,
        } = targets;

        let Some(token) = result.token else {
            return Self::broadcast(result, notifications, diagnostics);
        };

        match registry.resolve(token, &result.payload) {
            Ok(call) => match call.continuation {
                Some(continuation) => {
                    trace!(
                        target: "inference_bridge::router",
                        "Resolved {} ({})",
                        token,
                        call.function_name
                    );
                    latent.complete(token, continuation, result.payload);
                    diagnostics.record_completed();
                    RouteOutcome::Resolved(token)
                }
                // Registered without a continuation: fire-and-forget with a token
                None => Self::broadcast(result, notifications, diagnostics),
            },
            Err(err) => {
                diagnostics.record_correlation_error(&err);
                if self.broadcast_unmatched && matches!(err, CorrelationError::UnknownToken { .. }) {
                    return Self::broadcast(result, notifications, diagnostics);
                }
                RouteOutcome::Rejected(err)
            }
        }
    }

    fn broadcast(
        result: BackendResult,
        notifications: &mut Notifications,
        diagnostics: &mut Diagnostics,
    ) -> RouteOutcome {
        let (channel, subscribers) = notifications.broadcast_result(result);
        diagnostics.record_broadcast();
        RouteOutcome::Broadcast {
            channel,
            subscribers,
        }
    }
}
