//! Broadcast notifications with explicit subscribe/unsubscribe.

use super::protocol::{BackendResult, ChannelKind, Endpoint, InputResult, Payload};

/// Handle returned by `Delegate::subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Box<dyn FnMut(&E) + Send>;

/// Subscriber list for one kind of event.
///
/// Each broadcast invokes every handler subscribed at that moment exactly
/// once. Delivery order between handlers is unspecified.
pub struct Delegate<E> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler<E>)>,
}

impl<E> Delegate<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            handlers: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Returns `false` if the subscription was already removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(existing, _)| *existing != id);
        self.handlers.len() != before
    }

    /// Invoke every handler once; returns how many were invoked.
    pub fn broadcast(&mut self, event: &E) -> usize {
        for (_, handler) in &mut self.handlers {
            handler(event);
        }
        self.handlers.len()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<E> Default for Delegate<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The notifications a bridge exposes to its caller.
#[derive(Default)]
pub struct Notifications {
    /// Backend connection established
    pub on_connected: Delegate<Endpoint>,
    pub on_disconnected: Delegate<Endpoint>,
    /// Fire-and-forget results on the structured channel
    pub on_input_result: Delegate<InputResult<String>>,
    /// Fire-and-forget results on the raw channel
    pub on_raw_input_result: Delegate<InputResult<Vec<f32>>>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast a result on the notification matching its channel.
    pub(crate) fn broadcast_result(&mut self, result: BackendResult) -> (ChannelKind, usize) {
        let function_name = result.function_name;
        match result.payload {
            Payload::Structured(data) => (
                ChannelKind::Structured,
                self.on_input_result.broadcast(&InputResult {
                    data,
                    function_name,
                }),
            ),
            Payload::Raw(data) => (
                ChannelKind::Raw,
                self.on_raw_input_result.broadcast(&InputResult {
                    data,
                    function_name,
                }),
            ),
        }
    }
}
