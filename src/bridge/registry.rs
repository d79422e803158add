//! Registry of in-flight calls awaiting a backend result.
//!
//! The registry is the only owner of `PendingCall` entries. A call leaves it
//! exactly once, either resolved by a matching result or cancelled; ownership
//! of the removed entry (and of its parked continuation) moves to whoever
//! removed it.
//!
//! Retired tokens are remembered in a bounded ledger so that a second result
//! for a resolved token can be reported as a double resolution, while a late
//! result for a cancelled token is an ordinary unknown token.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::latent::Continuation;
use super::protocol::{ChannelKind, Payload};
use super::token::{CorrelationToken, TokenAllocator};
use crate::error::{BridgeError, CorrelationError};

/// Default number of retired tokens remembered for diagnostics.
pub const DEFAULT_RETIRED_TOKEN_CAPACITY: usize = 1024;

/// One outstanding request.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub(crate) token: CorrelationToken,
    pub(crate) channel: ChannelKind,
    pub(crate) function_name: String,
    /// Empty for fire-and-forget registrations
    pub(crate) continuation: Option<Continuation>,
    pub(crate) created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    Resolved,
    Cancelled,
}

pub(crate) struct PendingCallRegistry {
    allocator: TokenAllocator,
    pending: HashMap<CorrelationToken, PendingCall>,
    retired: HashMap<CorrelationToken, Retirement>,
    /// Eviction order for `retired`, oldest first
    retired_order: VecDeque<CorrelationToken>,
    retired_capacity: usize,
    /// Warn when the pending count grows past this (0 disables)
    warn_threshold: usize,
    above_threshold: bool,
}

impl PendingCallRegistry {
    pub(crate) fn new(retired_capacity: usize, warn_threshold: usize) -> Self {
        Self::with_allocator(TokenAllocator::new(), retired_capacity, warn_threshold)
    }

    pub(crate) fn with_allocator(
        allocator: TokenAllocator,
        retired_capacity: usize,
        warn_threshold: usize,
    ) -> Self {
        Self {
            allocator,
            pending: HashMap::new(),
            retired: HashMap::new(),
            retired_order: VecDeque::new(),
            retired_capacity,
            warn_threshold,
            above_threshold: false,
        }
    }

    /// Allocate a fresh token and record an awaiting call with an empty
    /// continuation slot.
    pub(crate) fn register(
        &mut self,
        channel: ChannelKind,
        function_name: &str,
    ) -> Result<CorrelationToken, BridgeError> {
        let token = self.allocator.allocate()?;
        self.pending.insert(
            token,
            PendingCall {
                token,
                channel,
                function_name: function_name.to_string(),
                continuation: None,
                created_at: Instant::now(),
            },
        );
        debug!(
            target: "inference_bridge::registry",
            "Registered {} call {} for {}",
            channel,
            token,
            function_name
        );
        self.check_threshold();
        Ok(token)
    }

    /// Park a continuation in the slot of a pending call.
    ///
    /// A filled slot is never overwritten.
    pub(crate) fn park(
        &mut self,
        token: CorrelationToken,
        continuation: Continuation,
    ) -> Result<(), CorrelationError> {
        let call = self
            .pending
            .get_mut(&token)
            .ok_or(CorrelationError::UnknownToken { token })?;
        if call.continuation.is_some() {
            return Err(CorrelationError::AlreadyParked { token });
        }
        call.continuation = Some(continuation);
        Ok(())
    }

    /// Remove the call matching `token` and hand it back for completion.
    ///
    /// A channel mismatch leaves the call pending. A repeated result is only
    /// recognised as `DoubleResolution` while its token is still in the
    /// retired ledger; once evicted it is reported as `UnknownToken`.
    pub(crate) fn resolve(
        &mut self,
        token: CorrelationToken,
        payload: &Payload,
    ) -> Result<PendingCall, CorrelationError> {
        let Some(call) = self.pending.get(&token) else {
            return Err(match self.retired.get(&token) {
                Some(Retirement::Resolved) => CorrelationError::DoubleResolution { token },
                Some(Retirement::Cancelled) | None => CorrelationError::UnknownToken { token },
            });
        };

        if call.channel != payload.channel() {
            return Err(CorrelationError::ChannelMismatch {
                token,
                expected: call.channel,
                actual: payload.channel(),
            });
        }

        let call = self.take(token, Retirement::Resolved);
        // Presence was checked above
        call.ok_or(CorrelationError::UnknownToken { token })
    }

    /// Cancel one call. `None` if it already left the registry.
    pub(crate) fn cancel(&mut self, token: CorrelationToken) -> Option<PendingCall> {
        self.take(token, Retirement::Cancelled)
    }

    /// Cancel every outstanding call, oldest token first.
    pub(crate) fn cancel_all(&mut self) -> Vec<PendingCall> {
        let mut tokens: Vec<_> = self.pending.keys().copied().collect();
        tokens.sort_unstable();
        tokens
            .into_iter()
            .filter_map(|token| self.take(token, Retirement::Cancelled))
            .collect()
    }

    /// Tokens of calls that have been pending for longer than `max_age`.
    pub(crate) fn stale(&self, max_age: Duration, now: Instant) -> Vec<CorrelationToken> {
        let mut tokens: Vec<_> = self
            .pending
            .values()
            .filter(|call| now.saturating_duration_since(call.created_at) > max_age)
            .map(|call| call.token)
            .collect();
        tokens.sort_unstable();
        tokens
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_pending(&self, token: CorrelationToken) -> bool {
        self.pending.contains_key(&token)
    }

    fn take(&mut self, token: CorrelationToken, retirement: Retirement) -> Option<PendingCall> {
        let call = self.pending.remove(&token)?;
        self.retire(token, retirement);
        self.check_threshold();
        Some(call)
    }

    fn retire(&mut self, token: CorrelationToken, retirement: Retirement) {
        if self.retired_capacity == 0 {
            return;
        }
        while self.retired_order.len() >= self.retired_capacity {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
        self.retired.insert(token, retirement);
        self.retired_order.push_back(token);
    }

    fn check_threshold(&mut self) {
        if self.warn_threshold == 0 {
            return;
        }
        let above = self.pending.len() > self.warn_threshold;
        if above && !self.above_threshold {
            warn!(
                target: "inference_bridge::registry",
                "{} calls pending (threshold {}); results may not be arriving",
                self.pending.len(),
                self.warn_threshold
            );
        }
        self.above_threshold = above;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::latent::{CallSite, LatentInfo, OwnerId};
    use crate::bridge::latent::{OutputSlot, OutputTarget};
    use std::collections::HashSet;

    fn registry() -> PendingCallRegistry {
        PendingCallRegistry::with_allocator(TokenAllocator::with_salt(1), 8, 0)
    }

    fn continuation() -> Continuation {
        Continuation {
            info: LatentInfo {
                call_site: CallSite {
                    owner: OwnerId(1),
                    linkage: 0,
                },
            },
            output: OutputTarget::Structured(OutputSlot::new()),
        }
    }

    #[test]
    fn new_registry_has_no_pending_calls() {
        assert_eq!(registry().pending_count(), 0);
    }

    #[test]
    fn registered_tokens_are_distinct_while_pending() {
        let mut registry = registry();
        let tokens: HashSet<_> = (0..100)
            .map(|i| {
                let channel = if i % 2 == 0 {
                    ChannelKind::Structured
                } else {
                    ChannelKind::Raw
                };
                registry.register(channel, "f").unwrap()
            })
            .collect();

        assert_eq!(tokens.len(), 100);
        assert_eq!(registry.pending_count(), 100);
    }

    #[test]
    fn resolve_removes_call_and_returns_continuation() {
        let mut registry = registry();
        let token = registry.register(ChannelKind::Structured, "f").unwrap();
        registry.park(token, continuation()).unwrap();

        let call = registry
            .resolve(token, &Payload::from("pong"))
            .expect("resolve should succeed");

        assert_eq!(call.token, token);
        assert_eq!(call.function_name, "f");
        assert!(call.continuation.is_some());
        assert!(!registry.is_pending(token));
    }

    #[test]
    fn second_resolve_is_double_resolution() {
        let mut registry = registry();
        let token = registry.register(ChannelKind::Structured, "f").unwrap();
        registry.resolve(token, &Payload::from("a")).unwrap();

        let err = registry.resolve(token, &Payload::from("b")).unwrap_err();
        assert_eq!(err, CorrelationError::DoubleResolution { token });
    }

    #[test]
    fn result_after_cancel_is_unknown_token() {
        let mut registry = registry();
        let token = registry.register(ChannelKind::Raw, "f").unwrap();
        assert!(registry.cancel(token).is_some());

        let err = registry.resolve(token, &Payload::from(vec![1.0])).unwrap_err();
        assert_eq!(err, CorrelationError::UnknownToken { token });
    }

    #[test]
    fn never_issued_token_is_unknown() {
        let mut registry = registry();
        let token = CorrelationToken::from_raw(999);
        let err = registry.resolve(token, &Payload::from("x")).unwrap_err();
        assert_eq!(err, CorrelationError::UnknownToken { token });
    }

    #[test]
    fn channel_mismatch_keeps_call_pending() {
        let mut registry = registry();
        let token = registry.register(ChannelKind::Structured, "f").unwrap();

        let err = registry
            .resolve(token, &Payload::from(vec![1.0, 2.0]))
            .unwrap_err();

        assert_eq!(
            err,
            CorrelationError::ChannelMismatch {
                token,
                expected: ChannelKind::Structured,
                actual: ChannelKind::Raw,
            }
        );
        assert!(registry.is_pending(token));
        assert!(registry.resolve(token, &Payload::from("ok")).is_ok());
    }

    #[test]
    fn park_never_overwrites_a_parked_continuation() {
        let mut registry = registry();
        let token = registry.register(ChannelKind::Structured, "f").unwrap();
        registry.park(token, continuation()).unwrap();

        let err = registry.park(token, continuation()).unwrap_err();
        assert_eq!(err, CorrelationError::AlreadyParked { token });
    }

    #[test]
    fn park_unknown_token_fails() {
        let mut registry = registry();
        let token = CorrelationToken::from_raw(5);
        assert_eq!(
            registry.park(token, continuation()).unwrap_err(),
            CorrelationError::UnknownToken { token }
        );
    }

    #[test]
    fn cancel_after_resolve_is_noop() {
        let mut registry = registry();
        let token = registry.register(ChannelKind::Structured, "f").unwrap();
        registry.resolve(token, &Payload::from("done")).unwrap();

        assert!(registry.cancel(token).is_none());
        // Still reported as resolved, not overwritten by the cancel
        assert_eq!(
            registry.resolve(token, &Payload::from("again")).unwrap_err(),
            CorrelationError::DoubleResolution { token }
        );
    }

    #[test]
    fn cancel_all_drains_in_token_order() {
        let mut registry = registry();
        let first = registry.register(ChannelKind::Structured, "f").unwrap();
        let second = registry.register(ChannelKind::Raw, "g").unwrap();
        let third = registry.register(ChannelKind::Structured, "h").unwrap();

        let cancelled: Vec<_> = registry.cancel_all().into_iter().map(|c| c.token).collect();

        assert_eq!(cancelled, vec![first, second, third]);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn retired_ledger_is_bounded() {
        let mut registry = PendingCallRegistry::with_allocator(TokenAllocator::with_salt(1), 2, 0);
        let oldest = registry.register(ChannelKind::Structured, "f").unwrap();
        registry.resolve(oldest, &Payload::from("1")).unwrap();
        for _ in 0..2 {
            let token = registry.register(ChannelKind::Structured, "f").unwrap();
            registry.resolve(token, &Payload::from("n")).unwrap();
        }

        // Evicted from the ledger, so it degrades to an unknown token
        assert_eq!(
            registry.resolve(oldest, &Payload::from("late")).unwrap_err(),
            CorrelationError::UnknownToken { token: oldest }
        );
    }

    #[test]
    fn stale_reports_only_old_calls() {
        let mut registry = registry();
        let token = registry.register(ChannelKind::Structured, "f").unwrap();
        let now = Instant::now();

        assert!(registry.stale(Duration::from_secs(60), now).is_empty());
        assert_eq!(
            registry.stale(Duration::ZERO, now + Duration::from_millis(1)),
            vec![token]
        );
    }

    #[test]
    fn exhaustion_surfaces_from_register() {
        let allocator = TokenAllocator::starting_at(1, (1 << 48) - 1);
        let mut registry = PendingCallRegistry::with_allocator(allocator, 8, 0);

        assert!(registry.register(ChannelKind::Structured, "f").is_ok());
        assert!(matches!(
            registry.register(ChannelKind::Structured, "f"),
            Err(BridgeError::TokenExhaustion { .. })
        ));
        assert_eq!(registry.pending_count(), 1);
    }
}
