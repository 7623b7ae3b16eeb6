//! Outbound delivery through an ordered postman chain
//!
//! Postmen are tried strictly in registration order and the first success
//! ends the attempt. When every postman refuses, `send` fails with
//! `DeliveryFailed`. There is no retry or backoff here: a queueing or retrying
//! postman can be appended to the chain instead.

use crate::error::{Result, RoutingError};
use crate::message::Message;
use crate::postman::Postman;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Debug, Default)]
pub struct PostOffice {
    postmen: RwLock<Vec<Arc<dyn Postman>>>,
    messages_sent: AtomicU64,
    messages_failed: AtomicU64,
    fallback_deliveries: AtomicU64,
}

/// Snapshot of post office counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostOfficeStats {
    pub postmen: usize,
    pub messages_sent: u64,
    pub messages_failed: u64,
    /// Deliveries completed by a postman other than the first
    pub fallback_deliveries: u64,
}

impl PostOffice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a postman to the end of the chain
    pub fn add_postman(&self, postman: Arc<dyn Postman>) {
        self.postmen.write().push(postman);
    }

    pub fn postman_count(&self) -> usize {
        self.postmen.read().len()
    }

    /// Deliver through the first postman that accepts the message
    pub async fn send(&self, message: &Message) -> Result<()> {
        // Snapshot so no lock is held across awaits
        let postmen: Vec<Arc<dyn Postman>> = self.postmen.read().clone();

        for (i, postman) in postmen.iter().enumerate() {
            if postman.try_send(message).await {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                if i > 0 {
                    self.fallback_deliveries.fetch_add(1, Ordering::Relaxed);
                }
                trace!(
                    "Message {} to {} delivered by postman[{}] '{}'",
                    message.id(),
                    message.destination(),
                    i,
                    postman.name()
                );
                return Ok(());
            }
            trace!("Postman[{}] '{}' refused {}", i, postman.name(), message.id());
        }

        self.messages_failed.fetch_add(1, Ordering::Relaxed);
        warn!(
            "All {} postmen failed to deliver {} to {}",
            postmen.len(),
            message.id(),
            message.destination()
        );
        Err(RoutingError::delivery_failed(
            message.id(),
            message.destination().clone(),
            postmen.len(),
        ))
    }

    pub fn stats(&self) -> PostOfficeStats {
        PostOfficeStats {
            postmen: self.postman_count(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            fallback_deliveries: self.fallback_deliveries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use crate::test_utils::{CallLog, ScriptedPostman};

    fn ping() -> Message {
        Message::request("a", "b", Payload::empty("ping"))
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let log = CallLog::new();
        let office = PostOffice::new();
        office.add_postman(Arc::new(ScriptedPostman::new("p1", false, &log)));
        office.add_postman(Arc::new(ScriptedPostman::new("p2", true, &log)));
        office.add_postman(Arc::new(ScriptedPostman::new("p3", true, &log)));

        office.send(&ping()).await.unwrap();

        assert_eq!(log.calls(), vec!["p1", "p2"]);
        let stats = office.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.fallback_deliveries, 1);
    }

    #[tokio::test]
    async fn test_fails_after_trying_every_postman() {
        let log = CallLog::new();
        let office = PostOffice::new();
        for name in ["p1", "p2", "p3"] {
            office.add_postman(Arc::new(ScriptedPostman::new(name, false, &log)));
        }

        let msg = ping();
        let err = office.send(&msg).await.unwrap_err();

        assert_eq!(log.calls(), vec!["p1", "p2", "p3"]);
        assert_eq!(
            err,
            RoutingError::delivery_failed(msg.id(), msg.destination().clone(), 3)
        );
        assert_eq!(office.stats().messages_failed, 1);
    }

    #[tokio::test]
    async fn test_empty_chain_fails() {
        let office = PostOffice::new();
        let err = office.send(&ping()).await.unwrap_err();
        assert!(matches!(err, RoutingError::DeliveryFailed { attempts: 0, .. }));
    }
}
