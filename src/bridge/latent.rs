//! Latent calls: blocking-looking calls for a frame-stepped caller.
//!
//! A latent call never blocks. Issuing it parks the call site against a
//! correlation token and returns at once. When the result arrives (or the
//! call is cancelled) the outcome is written into the caller's output slot
//! and the call site is queued; the next `resume_ready` hands it back to the
//! caller's scheduler, on the caller's thread.
//!
//! # States
//!
//! ```text
//! Idle -> Waiting -> Completed
//!                 -> Cancelled
//! ```
//!
//! The pending call itself (with its continuation) lives in the
//! `PendingCallRegistry`; this module only indexes tokens to call sites.

pub(crate) mod slot;

use std::collections::{HashMap, VecDeque};

use log::{debug, error};

pub use slot::{CancelReason, LatentFailure, LatentOutcome, OutputSlot};
pub(crate) use slot::OutputTarget;

use super::protocol::Payload;
use super::registry::{PendingCall, PendingCallRegistry};
use super::token::CorrelationToken;
use crate::error::BridgeError;

/// Identifies the object owning one or more call sites.
///
/// Tearing the owner down cancels every call it is still waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

/// A resumption point inside an owner (the "linkage" the scheduler jumps back to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub owner: OwnerId,
    pub linkage: u32,
}

/// Where a latent call resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatentInfo {
    pub call_site: CallSite,
}

impl LatentInfo {
    pub fn new(owner: OwnerId, linkage: u32) -> Self {
        Self {
            call_site: CallSite { owner, linkage },
        }
    }
}

/// Lifecycle of one latent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatentState {
    /// Not issued, or already resumed
    Idle,
    Waiting,
    /// Result written, resumption queued
    Completed,
    /// Failure written, resumption queued
    Cancelled,
}

/// A call site ready to continue, handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resumption {
    pub token: CorrelationToken,
    pub call_site: CallSite,
    /// `Completed` or `Cancelled`
    pub state: LatentState,
}

/// The caller's scheduler: resumes parked call sites.
pub trait Scheduler {
    fn resume(&mut self, resumption: Resumption);
}

impl<F: FnMut(Resumption)> Scheduler for F {
    fn resume(&mut self, resumption: Resumption) {
        self(resumption)
    }
}

/// Resumable unit parked in a pending call.
#[derive(Debug)]
pub(crate) struct Continuation {
    pub(crate) info: LatentInfo,
    pub(crate) output: OutputTarget,
}

#[derive(Default)]
pub(crate) struct LatentBridge {
    /// Lookup keys only; the registry owns the continuations
    waiting: HashMap<CorrelationToken, CallSite>,
    ready: VecDeque<Resumption>,
}

impl LatentBridge {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Idle -> Waiting.
    ///
    /// Every call gets its own token, even when issued again from a call
    /// site that is still waiting.
    pub(crate) fn issue(
        &mut self,
        registry: &mut PendingCallRegistry,
        function_name: &str,
        info: LatentInfo,
        output: OutputTarget,
    ) -> Result<CorrelationToken, BridgeError> {
        let token = registry.register(output.channel(), function_name)?;
        // Freshly registered, so the slot is empty
        if let Err(err) = registry.park(token, Continuation { info, output }) {
            error!(
                target: "inference_bridge::latent",
                "Failed to park continuation for fresh token: {}",
                err
            );
        }
        self.waiting.insert(token, info.call_site);
        debug!(
            target: "inference_bridge::latent",
            "Call site {:?} waiting on {}",
            info.call_site,
            token
        );
        Ok(token)
    }

    /// Waiting -> Completed: write the result and queue the resumption.
    pub(crate) fn complete(
        &mut self,
        token: CorrelationToken,
        continuation: Continuation,
        payload: Payload,
    ) {
        if let Err(payload) = continuation.output.complete(payload) {
            // The registry matched channels already
            error!(
                target: "inference_bridge::latent",
                "Result for {} does not fit its {} output slot; cancelling",
                token,
                payload.channel()
            );
            continuation.output.fail(CancelReason::Explicit);
            self.enqueue(token, continuation.info, LatentState::Cancelled);
            return;
        }
        self.enqueue(token, continuation.info, LatentState::Completed);
    }

    /// Waiting -> Cancelled: write the failure marker and queue the resumption.
    ///
    /// Returns `false` for calls without a parked continuation.
    pub(crate) fn cancel(&mut self, call: PendingCall, reason: &CancelReason) -> bool {
        let Some(continuation) = call.continuation else {
            return false;
        };
        debug!(
            target: "inference_bridge::latent",
            "Cancelling {}: {}",
            call.token,
            reason
        );
        continuation.output.fail(reason.clone());
        self.enqueue(call.token, continuation.info, LatentState::Cancelled);
        true
    }

    /// Hand every queued call site to the scheduler, in completion order.
    pub(crate) fn resume_ready<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) -> usize {
        let mut resumed = 0;
        while let Some(resumption) = self.ready.pop_front() {
            scheduler.resume(resumption);
            resumed += 1;
        }
        resumed
    }

    pub(crate) fn state(&self, token: CorrelationToken) -> LatentState {
        if self.waiting.contains_key(&token) {
            return LatentState::Waiting;
        }
        self.ready
            .iter()
            .find(|r| r.token == token)
            .map_or(LatentState::Idle, |r| r.state)
    }

    /// Waiting tokens whose call site belongs to `owner`, oldest first.
    pub(crate) fn tokens_owned_by(&self, owner: OwnerId) -> Vec<CorrelationToken> {
        let mut tokens: Vec<_> = self
            .waiting
            .iter()
            .filter(|(_, site)| site.owner == owner)
            .map(|(token, _)| *token)
            .collect();
        tokens.sort_unstable();
        tokens
    }

    #[cfg(test)]
    pub(crate) fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    #[cfg(test)]
    pub(crate) fn ready_count(&self) -> usize {
        self.ready.len()
    }

    fn enqueue(&mut self, token: CorrelationToken, info: LatentInfo, state: LatentState) {
        if self.waiting.remove(&token).is_none() {
            error!(
                target: "inference_bridge::latent",
                "{} left Waiting twice; resuming {:?} anyway",
                token,
                info.call_site
            );
        }
        self.ready.push_back(Resumption {
            token,
            call_site: info.call_site,
            state,
        });
    }
}
