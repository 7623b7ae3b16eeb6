//! Request/response correlation
//!
//! A caller registers a wait for a message id before sending its request and
//! gets back a [`PendingResponse`]. When a message with that id reaches the
//! correlator it is handed to the waiter exactly once and the registration is
//! removed.
//!
//! # Lifecycle of a registration
//!
//! ```text
//! register_wait(id) ──► pending[id] ──┬─ on_message(id)   → waiter gets Ok(message)
//!                                     ├─ deadline elapses → waiter gets Err(Timeout)
//!                                     ├─ handle dropped   → entry removed
//!                                     ├─ cancel(id)       → waiter gets Err(WaitCancelled)
//!                                     └─ register_wait(id) again → old waiter gets
//!                                                                  Err(WaitCancelled)
//! ```
//!
//! Without a deadline a registration lives until a matching message arrives.
//! Every removal path checks the registration's ticket, so a superseded handle
//! can never remove the entry that replaced it.

use crate::address::MessageId;
use crate::error::{Result, RoutingError};
use crate::events::{EventBus, RoutingEvent};
use crate::message::Message;
use crate::middleware::Middleware;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

type PendingMap = DashMap<MessageId, PendingWait>;

#[derive(Debug)]
struct PendingWait {
    ticket: u64,
    registered_at: Instant,
    sender: oneshot::Sender<Message>,
}

#[derive(Debug, Default)]
struct CorrelatorCounters {
    registered: AtomicU64,
    fulfilled: AtomicU64,
    unmatched: AtomicU64,
    expired: AtomicU64,
    cancelled: AtomicU64,
}

/// Snapshot of correlator counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorrelatorStats {
    pub pending: usize,
    pub registered: u64,
    pub fulfilled: u64,
    pub unmatched: u64,
    pub expired: u64,
    pub cancelled: u64,
}

#[derive(Debug)]
pub struct ResponseCorrelator {
    pending: Arc<PendingMap>,
    next_ticket: AtomicU64,
    default_timeout: Option<Duration>,
    events: EventBus,
    counters: Arc<CorrelatorCounters>,
}

impl ResponseCorrelator {
    /// Correlator whose waits never time out unless asked to
    pub fn new(events: EventBus) -> Self {
        Self::with_default_timeout(events, None)
    }

    /// Correlator applying `default_timeout` to [`PendingResponse::wait`]
    pub fn with_default_timeout(events: EventBus, default_timeout: Option<Duration>) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(1),
            default_timeout,
            events,
            counters: Arc::new(CorrelatorCounters::default()),
        }
    }

    /// Register interest in the response to `id`, replacing any earlier wait
    pub fn register_wait(&self, id: MessageId) -> PendingResponse {
        let (sender, receiver) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let wait = PendingWait {
            ticket,
            registered_at: Instant::now(),
            sender,
        };

        if self.pending.insert(id, wait).is_some() {
            debug!("Wait for {} superseded by a new registration", id);
        }
        self.counters.registered.fetch_add(1, Ordering::Relaxed);

        PendingResponse {
            id,
            ticket,
            receiver,
            pending: Arc::clone(&self.pending),
            default_timeout: self.default_timeout,
            events: self.events.clone(),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Drop the registration for `id`; its waiter resolves with `WaitCancelled`
    pub fn cancel(&self, id: MessageId) -> bool {
        let removed = self.pending.remove(&id).is_some();
        if removed {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!("Wait for {} cancelled", id);
        }
        removed
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Age of the oldest registration still waiting
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.pending
            .iter()
            .map(|entry| entry.value().registered_at.elapsed())
            .max()
    }

    pub fn stats(&self) -> CorrelatorStats {
        CorrelatorStats {
            pending: self.pending.len(),
            registered: self.counters.registered.load(Ordering::Relaxed),
            fulfilled: self.counters.fulfilled.load(Ordering::Relaxed),
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Middleware for ResponseCorrelator {
    async fn on_message(&self, message: &Message) -> Result<bool> {
        let Some((id, wait)) = self.pending.remove(&message.id()) else {
            if message.is_request() {
                trace!("No pending wait for request {}", message.id());
                return Ok(false);
            }
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!("No pending wait for {}, dropping", message.id());
            self.events.publish(RoutingEvent::UnmatchedResponse { id: message.id() });
            return Ok(false);
        };

        self.counters.fulfilled.fetch_add(1, Ordering::Relaxed);
        trace!("Correlated {} after {:?}", id, wait.registered_at.elapsed());
        if wait.sender.send(message.clone()).is_err() {
            debug!("Waiter for {} went away before its response arrived", id);
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "correlator"
    }
}

/// Handle to a registered wait
///
/// Dropping the handle cancels the wait and removes its registration.
///
/// The wait resolves with whichever message carrying its id reaches the
/// correlator first. Normally that is the response, but a request that comes
/// back to its own node and is claimed by no handler resolves the wait with
/// the original asking message; check [`Message::is_response`] when that can
/// happen.
#[must_use = "dropping a PendingResponse cancels the wait"]
#[derive(Debug)]
pub struct PendingResponse {
    id: MessageId,
    ticket: u64,
    receiver: oneshot::Receiver<Message>,
    pending: Arc<PendingMap>,
    default_timeout: Option<Duration>,
    events: EventBus,
    counters: Arc<CorrelatorCounters>,
}

impl PendingResponse {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Wait using the correlator's default deadline, or forever if it has none
    pub async fn wait(self) -> Result<Message> {
        match self.default_timeout {
            Some(timeout) => self.wait_timeout(timeout).await,
            None => self.wait_forever().await,
        }
    }

    /// Wait with no deadline
    pub async fn wait_forever(mut self) -> Result<Message> {
        self.recv().await
    }

    /// Wait at most `timeout`; the registration is removed when it elapses
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                if self.release() {
                    self.counters.expired.fetch_add(1, Ordering::Relaxed);
                    warn!("Wait for {} expired after {}ms", self.id, timeout_ms);
                    self.events.publish(RoutingEvent::WaitExpired {
                        id: self.id,
                        timeout_ms,
                    });
                    return Err(RoutingError::timeout(self.id, timeout_ms));
                }
                self.settle_after_deadline(timeout_ms)
            }
        }
    }

    /// Outcome once the deadline passed but the registration was already gone
    ///
    /// Either a response landed between the deadline and the removal, or the
    /// registration was cancelled or superseded.
    fn settle_after_deadline(&mut self, timeout_ms: u64) -> Result<Message> {
        self.receiver.try_recv().map_err(|e| match e {
            oneshot::error::TryRecvError::Closed => RoutingError::WaitCancelled { id: self.id },
            oneshot::error::TryRecvError::Empty => RoutingError::timeout(self.id, timeout_ms),
        })
    }

    async fn recv(&mut self) -> Result<Message> {
        (&mut self.receiver)
            .await
            .map_err(|_| RoutingError::WaitCancelled { id: self.id })
    }

    /// Remove this handle's registration if it is still the current one
    fn release(&self) -> bool {
        self.pending
            .remove_if(&self.id, |_, wait| wait.ticket == self.ticket)
            .is_some()
    }
}

impl IntoFuture for PendingResponse {
    type Output = Result<Message>;
    type IntoFuture = BoxFuture<'static, Result<Message>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.release() {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            trace!("Wait for {} dropped before completion", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;

    fn exchange() -> (Message, Message) {
        let request = Message::request("a", "b", Payload::empty("ping"));
        let reply = request.reply(Payload::empty("pong"));
        (request, reply)
    }

    #[tokio::test]
    async fn test_matching_response_fulfills_wait() {
        let correlator = ResponseCorrelator::new(EventBus::default());
        let (request, reply) = exchange();
        let pending = correlator.register_wait(request.id());
        assert!(correlator.is_pending(request.id()));

        assert!(correlator.on_message(&reply).await.unwrap());
        assert_eq!(pending.await.unwrap(), reply);
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.stats().fulfilled, 1);
    }

    #[tokio::test]
    async fn test_fulfilled_only_once() {
        let correlator = ResponseCorrelator::new(EventBus::default());
        let (request, reply) = exchange();
        let pending = correlator.register_wait(request.id());

        assert!(correlator.on_message(&reply).await.unwrap());
        assert!(!correlator.on_message(&reply).await.unwrap());
        assert_eq!(pending.wait_forever().await.unwrap(), reply);

        let stats = correlator.stats();
        assert_eq!(stats.fulfilled, 1);
        assert_eq!(stats.unmatched, 1);
    }

    #[tokio::test]
    async fn test_unmatched_id_leaves_wait_pending() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let correlator = ResponseCorrelator::new(events);
        let (request, _) = exchange();
        let (_, stranger) = exchange();
        let _pending = correlator.register_wait(request.id());

        assert!(!correlator.on_message(&stranger).await.unwrap());
        assert!(correlator.is_pending(request.id()));
        assert_eq!(
            rx.recv().await.unwrap(),
            RoutingEvent::UnmatchedResponse { id: stranger.id() }
        );
    }

    #[tokio::test]
    async fn test_timeout_removes_registration() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let correlator = ResponseCorrelator::new(events);
        let (request, reply) = exchange();
        let pending = correlator.register_wait(request.id());

        let err = pending
            .wait_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, RoutingError::timeout(request.id(), 20));
        assert!(!correlator.is_pending(request.id()));
        assert!(matches!(
            rx.recv().await.unwrap(),
            RoutingEvent::WaitExpired { timeout_ms: 20, .. }
        ));

        // A late response is now just unmatched
        assert!(!correlator.on_message(&reply).await.unwrap());
        assert_eq!(correlator.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_default_timeout_applies_to_wait() {
        let correlator = ResponseCorrelator::with_default_timeout(
            EventBus::default(),
            Some(Duration::from_millis(10)),
        );
        let pending = correlator.register_wait(MessageId::new());
        assert!(matches!(
            pending.wait().await,
            Err(RoutingError::Timeout { timeout_ms: 10, .. })
        ));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_handle_removes_registration() {
        let correlator = ResponseCorrelator::new(EventBus::default());
        let id = MessageId::new();
        let pending = correlator.register_wait(id);
        drop(pending);

        assert!(!correlator.is_pending(id));
        assert_eq!(correlator.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn test_reregistration_supersedes_previous_wait() {
        let correlator = ResponseCorrelator::new(EventBus::default());
        let (request, reply) = exchange();
        let first = correlator.register_wait(request.id());
        let second = correlator.register_wait(request.id());

        assert_eq!(
            first.wait_forever().await.unwrap_err(),
            RoutingError::WaitCancelled { id: request.id() }
        );
        // The superseded handle must not have removed the new registration
        assert!(correlator.is_pending(request.id()));

        assert!(correlator.on_message(&reply).await.unwrap());
        assert_eq!(second.await.unwrap(), reply);
    }

    #[tokio::test]
    async fn test_cancel_resolves_waiter() {
        let correlator = ResponseCorrelator::new(EventBus::default());
        let id = MessageId::new();
        let pending = correlator.register_wait(id);

        assert!(correlator.cancel(id));
        assert!(!correlator.cancel(id));
        assert!(matches!(
            pending.wait_forever().await,
            Err(RoutingError::WaitCancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_deadline_after_removal_distinguishes_cancel_from_reply() {
        let correlator = ResponseCorrelator::new(EventBus::default());
        let (request, reply) = exchange();

        let mut cancelled = correlator.register_wait(request.id());
        assert!(correlator.cancel(request.id()));
        assert!(!cancelled.release());
        assert_eq!(
            cancelled.settle_after_deadline(5).unwrap_err(),
            RoutingError::WaitCancelled { id: request.id() }
        );

        let mut answered = correlator.register_wait(request.id());
        assert!(correlator.on_message(&reply).await.unwrap());
        assert!(!answered.release());
        assert_eq!(answered.settle_after_deadline(5).unwrap(), reply);
    }

    #[tokio::test]
    async fn test_unclaimed_request_is_not_an_unmatched_response() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let correlator = ResponseCorrelator::new(events);
        let (request, _) = exchange();

        assert!(!correlator.on_message(&request).await.unwrap());
        assert_eq!(correlator.stats().unmatched, 0);
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_waits_resolve_independently() {
        let correlator = Arc::new(ResponseCorrelator::new(EventBus::default()));
        let exchanges: Vec<_> = (0..16).map(|_| exchange()).collect();
        let waits: Vec<_> = exchanges
            .iter()
            .map(|(request, _)| correlator.register_wait(request.id()))
            .collect();

        let replies: Vec<Message> = exchanges.iter().rev().map(|(_, r)| r.clone()).collect();
        let feeder = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                for reply in replies {
                    assert!(correlator.on_message(&reply).await.unwrap());
                }
            })
        };

        let results = futures::future::join_all(waits.into_iter().map(|w| w.wait_forever())).await;
        feeder.await.unwrap();

        for ((_, expected), result) in exchanges.iter().zip(results) {
            assert_eq!(&result.unwrap(), expected);
        }
        assert_eq!(correlator.pending_count(), 0);
    }
}
