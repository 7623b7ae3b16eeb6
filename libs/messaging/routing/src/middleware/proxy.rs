use super::Middleware;
use crate::address::NodeAddress;
use crate::error::Result;
use crate::events::{EventBus, RoutingEvent};
use crate::message::Message;
use crate::post_office::PostOffice;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Forwards messages whose destination is not this node
///
/// A forwarded message always counts as handled, even when delivery fails.
/// The failure is logged, counted, and published as
/// [`RoutingEvent::ForwardFailed`]; it is never returned to the chain.
#[derive(Debug)]
pub struct ProxyMiddleware {
    local: NodeAddress,
    post_office: Arc<PostOffice>,
    events: EventBus,
    forwarded: AtomicU64,
    forward_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProxyStats {
    pub forwarded: u64,
    pub forward_failures: u64,
}

impl ProxyMiddleware {
    pub fn new(local: NodeAddress, post_office: Arc<PostOffice>, events: EventBus) -> Self {
        Self {
            local,
            post_office,
            events,
            forwarded: AtomicU64::new(0),
            forward_failures: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Middleware for ProxyMiddleware {
    async fn on_message(&self, message: &Message) -> Result<bool> {
        let destination = message.destination();
        if *destination == self.local {
            return Ok(false);
        }

        match self.post_office.send(message).await {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                trace!("Forwarded {} to {}", message.id(), destination);
            }
            Err(error) => {
                self.forward_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Forwarding {} from {} to {} failed: {}",
                    message.id(),
                    self.local,
                    destination,
                    error
                );
                self.events.publish(RoutingEvent::ForwardFailed {
                    id: message.id(),
                    destination: destination.clone(),
                    error,
                });
            }
        }

        Ok(true)
    }

    fn name(&self) -> &'static str {
        "proxy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use crate::test_utils::{CallLog, ScriptedPostman};

    fn proxy_with(outcome: bool, log: &CallLog, events: EventBus) -> ProxyMiddleware {
        let office = Arc::new(PostOffice::new());
        office.add_postman(Arc::new(ScriptedPostman::new("p", outcome, log)));
        ProxyMiddleware::new(NodeAddress::from("a"), office, events)
    }

    #[tokio::test]
    async fn test_foreign_destination_forwarded_once() {
        let log = CallLog::new();
        let proxy = proxy_with(true, &log, EventBus::default());
        let msg = Message::request("a", "b", Payload::empty("ping"));

        assert!(proxy.on_message(&msg).await.unwrap());
        assert_eq!(log.calls(), vec!["p"]);
        assert_eq!(proxy.stats().forwarded, 1);
    }

    #[tokio::test]
    async fn test_forward_failure_still_handled_and_reported() {
        let log = CallLog::new();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let proxy = proxy_with(false, &log, events);
        let msg = Message::request("a", "b", Payload::empty("ping"));

        assert!(proxy.on_message(&msg).await.unwrap());
        assert_eq!(log.calls(), vec!["p"]);
        assert_eq!(
            proxy.stats(),
            ProxyStats {
                forwarded: 0,
                forward_failures: 1
            }
        );

        match rx.recv().await.unwrap() {
            RoutingEvent::ForwardFailed {
                id,
                destination,
                error,
            } => {
                assert_eq!(id, msg.id());
                assert_eq!(destination.as_str(), "b");
                assert!(error.is_delivery_error());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_destination_passes_through() {
        let log = CallLog::new();
        let proxy = proxy_with(true, &log, EventBus::default());
        let request = Message::request("a", "b", Payload::empty("ping"));
        let reply = request.reply(Payload::empty("pong"));

        assert!(!proxy.on_message(&reply).await.unwrap());
        assert!(log.calls().is_empty());
    }
}
