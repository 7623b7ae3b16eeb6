//! Observable record of conditions the pipeline absorbs silently
//!
//! Forward failures, unroutable messages, unmatched responses and expired
//! waits never surface as errors to the chain's caller. They are published
//! here so hosts can count or alert on them. Publishing never blocks and never
//! fails: with no subscribers the event is dropped.

use crate::address::{MessageId, NodeAddress};
use crate::error::RoutingError;
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Largest per-subscriber buffer; the broadcast ring is allocated up front
pub const MAX_EVENT_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingEvent {
    /// Proxy could not forward a message not addressed to this node
    ForwardFailed {
        id: MessageId,
        destination: NodeAddress,
        error: RoutingError,
    },
    /// No middleware claimed the message
    Unroutable { id: MessageId, destination: NodeAddress },
    /// A response arrived with no pending wait for its id
    UnmatchedResponse { id: MessageId },
    /// A pending wait hit its deadline and was removed
    WaitExpired { id: MessageId, timeout_ms: u64 },
}

impl RoutingEvent {
    pub fn message_id(&self) -> MessageId {
        match self {
            RoutingEvent::ForwardFailed { id, .. }
            | RoutingEvent::Unroutable { id, .. }
            | RoutingEvent::UnmatchedResponse { id }
            | RoutingEvent::WaitExpired { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RoutingEvent>,
}

impl EventBus {
    /// Bus buffering `capacity` events per subscriber, clamped to `1..=MAX_EVENT_CAPACITY`
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.clamp(1, MAX_EVENT_CAPACITY));
        Self { sender }
    }

    pub fn publish(&self, event: RoutingEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
