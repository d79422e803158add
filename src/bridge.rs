//! Request/response correlation between a caller and an inference backend.
//!
//! `InferenceBridge` owns every piece of correlation state and is only
//! mutated through `&mut self`, so connection changes, cancellations and
//! result routing are applied in one order on the caller's thread. The
//! backend reports through a `BackendSink`; reports are drained and applied
//! by `tick`, which also resumes completed latent calls.

pub mod connection_state;
pub mod diagnostics;
pub mod inbox;
pub mod latent;
pub mod notifications;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod token;

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::Transport;

use connection_state::ConnectionTracker;
use diagnostics::Diagnostics;
use inbox::Inbox;
use latent::{LatentBridge, OutputTarget};
use registry::PendingCallRegistry;
use router::{ResultRouter, RouteTargets};

pub use connection_state::ConnectionState;
pub use diagnostics::DiagnosticsSnapshot;
pub use inbox::BackendSink;
pub use latent::{
    CallSite, CancelReason, LatentFailure, LatentInfo, LatentOutcome, LatentState, OutputSlot,
    OwnerId, Resumption, Scheduler,
};
pub use notifications::{Delegate, Notifications, SubscriptionId};
pub use protocol::{BackendEvent, BackendResult, ChannelKind, Endpoint, InputResult, Payload, Request};
pub use router::RouteOutcome;
pub use token::CorrelationToken;

/// Caller-facing capability set of a bridge.
pub trait InferenceClient {
    /// Send structured input; the result is broadcast on `on_input_result`.
    fn send_input(&mut self, input: String, function_name: Option<&str>) -> BridgeResult<()>;

    /// Send raw input; the result is broadcast on `on_raw_input_result`.
    fn send_raw_input(&mut self, input: Vec<f32>, function_name: Option<&str>)
    -> BridgeResult<()>;

    /// Send structured input and park the call site until its result arrives.
    fn send_input_latent(
        &mut self,
        input: String,
        function_name: Option<&str>,
        info: LatentInfo,
        output: OutputSlot<String>,
    ) -> BridgeResult<CorrelationToken>;

    /// Send raw input and park the call site until its result arrives.
    fn send_raw_input_latent(
        &mut self,
        input: Vec<f32>,
        function_name: Option<&str>,
        info: LatentInfo,
        output: OutputSlot<Vec<f32>>,
    ) -> BridgeResult<CorrelationToken>;

    fn is_connected(&self) -> bool;
}

/// What one `tick` did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Backend events drained from the inbox
    pub events: usize,
    pub resolved: usize,
    pub broadcasts: usize,
    pub rejected: usize,
    /// Latent calls cancelled by disconnects or backend failures
    pub cancelled: usize,
    /// Call sites handed to the scheduler
    pub resumed: usize,
}

pub struct InferenceBridge<T: Transport> {
    transport: T,
    settings: BridgeSettings,
    connection: ConnectionTracker,
    registry: PendingCallRegistry,
    latent: LatentBridge,
    router: ResultRouter,
    notifications: Notifications,
    diagnostics: Diagnostics,
    sink: BackendSink,
    inbox: Inbox,
}

impl<T: Transport> InferenceBridge<T> {
    /// Build a bridge. `make_transport` receives the sink the transport
    /// reports backend events through.
    pub fn new<F>(settings: BridgeSettings, make_transport: F) -> BridgeResult<Self>
    where
        F: FnOnce(BackendSink) -> T,
    {
        settings.validate()?;
        let (sink, inbox) = inbox::backend_channel();
        let transport = make_transport(sink.clone());
        let registry = PendingCallRegistry::new(
            settings.retired_token_capacity,
            settings.pending_warn_threshold,
        );
        let router = ResultRouter::new(settings.broadcast_unmatched_results);

        Ok(Self {
            transport,
            settings,
            connection: ConnectionTracker::new(),
            registry,
            latent: LatentBridge::new(),
            router,
            notifications: Notifications::new(),
            diagnostics: Diagnostics::new(),
            sink,
            inbox,
        })
    }

    /// Apply every backend event reported so far, then resume the call sites
    /// whose latent calls finished.
    pub fn tick<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) -> TickReport {
        let mut report = TickReport::default();

        for event in self.inbox.drain() {
            report.events += 1;
            match event {
                BackendEvent::Connected(endpoint) => {
                    self.set_connected(endpoint);
                }
                BackendEvent::Disconnected => {
                    report.cancelled += self.disconnect();
                }
                BackendEvent::Result(result) => {
                    let outcome = self.router.route(
                        result,
                        RouteTargets {
                            registry: &mut self.registry,
                            latent: &mut self.latent,
                            notifications: &mut self.notifications,
                            diagnostics: &mut self.diagnostics,
                        },
                    );
                    match outcome {
                        RouteOutcome::Resolved(_) => report.resolved += 1,
                        RouteOutcome::Broadcast { .. } => report.broadcasts += 1,
                        RouteOutcome::Rejected(_) => report.rejected += 1,
                    }
                }
                BackendEvent::Failed {
                    token,
                    function_name,
                    message,
                } => {
                    let Some(token) = token else {
                        warn!(
                            target: "inference_bridge::bridge",
                            "Backend failed fire-and-forget call to {}: {}",
                            function_name,
                            message
                        );
                        continue;
                    };
                    if self.cancel_with(token, CancelReason::BackendFailure(message)) {
                        report.cancelled += 1;
                    } else {
                        debug!(
                            target: "inference_bridge::bridge",
                            "Backend failure for {} which is no longer pending",
                            token
                        );
                    }
                }
            }
        }

        report.resumed = self.latent.resume_ready(scheduler);
        report
    }

    /// Mark the backend connected. Returns `false` if it already was.
    pub fn set_connected(&mut self, endpoint: Endpoint) -> bool {
        match self.connection.set_connected(endpoint) {
            Some(endpoint) => {
                info!(target: "inference_bridge::bridge", "Connected to {}", endpoint);
                self.notifications.on_connected.broadcast(&endpoint);
                true
            }
            None => false,
        }
    }

    /// Mark the backend disconnected and cancel every outstanding call.
    /// Returns `false` if it already was disconnected.
    pub fn set_disconnected(&mut self) -> bool {
        let was_connected = self.connection.is_connected();
        self.disconnect();
        was_connected
    }

    fn disconnect(&mut self) -> usize {
        let Some(endpoint) = self.connection.set_disconnected() else {
            return 0;
        };
        let cancelled = self.cancel_all(CancelReason::Disconnected);
        info!(
            target: "inference_bridge::bridge",
            "Disconnected from {}; cancelled {} latent calls",
            endpoint,
            cancelled
        );
        self.notifications.on_disconnected.broadcast(&endpoint);
        cancelled
    }

    /// Cancel one call. A token that already resolved is left alone.
    pub fn cancel(&mut self, token: CorrelationToken) -> bool {
        self.cancel_with(token, CancelReason::Explicit)
    }

    /// Cancel the waiting latent calls of a tearing-down owner.
    pub fn cancel_owner(&mut self, owner: OwnerId) -> usize {
        self.latent
            .tokens_owned_by(owner)
            .into_iter()
            .filter(|token| self.cancel_with(*token, CancelReason::CallerTeardown))
            .count()
    }

    /// Cancel every outstanding call. Returns how many latent calls were failed.
    pub fn cancel_all(&mut self, reason: CancelReason) -> usize {
        let calls = self.registry.cancel_all();
        let cancelled = calls
            .into_iter()
            .map(|call| self.latent.cancel(call, &reason))
            .filter(|failed| *failed)
            .count();
        self.diagnostics.record_cancelled(cancelled);
        cancelled
    }

    /// Cancel calls pending for longer than `max_age`.
    pub fn cancel_stale(&mut self, max_age: Duration) -> usize {
        let stale = self.registry.stale(max_age, Instant::now());
        if !stale.is_empty() {
            warn!(
                target: "inference_bridge::bridge",
                "{} calls pending for more than {:?}; cancelling",
                stale.len(),
                max_age
            );
        }
        stale
            .into_iter()
            .filter(|token| self.cancel_with(*token, CancelReason::Watchdog))
            .count()
    }

    /// Cancel everything, resume the affected call sites and close the
    /// transport.
    pub fn shutdown<S: Scheduler + ?Sized>(mut self, scheduler: &mut S) -> DiagnosticsSnapshot {
        let cancelled = self.cancel_all(CancelReason::Shutdown);
        self.latent.resume_ready(scheduler);
        self.transport.close();
        debug!(
            target: "inference_bridge::bridge",
            "Shut down with {} latent calls cancelled",
            cancelled
        );
        self.diagnostics.snapshot()
    }

    pub fn latent_state(&self, token: CorrelationToken) -> LatentState {
        self.latent.state(token)
    }

    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    pub fn is_pending(&self, token: CorrelationToken) -> bool {
        self.registry.is_pending(token)
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut Notifications {
        &mut self.notifications
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.connection.endpoint()
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Another handle for reporting backend events.
    pub fn sink(&self) -> BackendSink {
        self.sink.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn cancel_with(&mut self, token: CorrelationToken, reason: CancelReason) -> bool {
        let Some(call) = self.registry.cancel(token) else {
            return false;
        };
        let cancelled = self.latent.cancel(call, &reason);
        if cancelled {
            self.diagnostics.record_cancelled(1);
        }
        cancelled
    }

    fn send_fire_and_forget(&mut self, payload: Payload, function_name: &str) -> BridgeResult<()> {
        if !self.connection.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        self.transport.send(Request {
            payload,
            function_name: function_name.to_string(),
            token: None,
        })?;
        Ok(())
    }

    fn send_latent(
        &mut self,
        payload: Payload,
        function_name: &str,
        info: LatentInfo,
        output: OutputTarget,
    ) -> BridgeResult<CorrelationToken> {
        let token = self
            .latent
            .issue(&mut self.registry, function_name, info, output)?;

        if !self.connection.is_connected() {
            debug!(
                target: "inference_bridge::bridge",
                "Not connected; failing {} immediately",
                token
            );
            self.cancel_with(token, CancelReason::NotConnected);
            return Ok(token);
        }

        let request = Request {
            payload,
            function_name: function_name.to_string(),
            token: Some(token),
        };
        if let Err(err) = self.transport.send(request) {
            warn!(
                target: "inference_bridge::bridge",
                "Failed to send {} to {}: {}",
                token,
                function_name,
                err
            );
            self.cancel_with(token, CancelReason::TransportFailure(err.to_string()));
        }
        Ok(token)
    }
}

impl<T: Transport> InferenceClient for InferenceBridge<T> {
    fn send_input(&mut self, input: String, function_name: Option<&str>) -> BridgeResult<()> {
        let function_name = function_name
            .unwrap_or(self.settings.default_input_function.as_str())
            .to_string();
        self.send_fire_and_forget(Payload::Structured(input), &function_name)
    }

    fn send_raw_input(
        &mut self,
        input: Vec<f32>,
        function_name: Option<&str>,
    ) -> BridgeResult<()> {
        let function_name = function_name
            .unwrap_or(self.settings.default_raw_input_function.as_str())
            .to_string();
        self.send_fire_and_forget(Payload::Raw(input), &function_name)
    }

    fn send_input_latent(
        &mut self,
        input: String,
        function_name: Option<&str>,
        info: LatentInfo,
        output: OutputSlot<String>,
    ) -> BridgeResult<CorrelationToken> {
        let function_name = function_name
            .unwrap_or(self.settings.default_input_function.as_str())
            .to_string();
        self.send_latent(
            Payload::Structured(input),
            &function_name,
            info,
            OutputTarget::Structured(output),
        )
    }

    fn send_raw_input_latent(
        &mut self,
        input: Vec<f32>,
        function_name: Option<&str>,
        info: LatentInfo,
        output: OutputSlot<Vec<f32>>,
    ) -> BridgeResult<CorrelationToken> {
        let function_name = function_name
            .unwrap_or(self.settings.default_raw_input_function.as_str())
            .to_string();
        self.send_latent(
            Payload::Raw(input),
            &function_name,
            info,
            OutputTarget::Raw(output),
        )
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}
