use crate::connection::ConnectionCache;
use crate::message::Message;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, trace};

/// A strategy for physically transmitting a message
#[async_trait]
pub trait Postman: Send + Sync + Debug {
    /// Attempt delivery; `false` lets the post office try the next postman
    async fn try_send(&self, message: &Message) -> bool;

    /// Name used in logs
    fn name(&self) -> &str {
        "postman"
    }
}

/// Postman that delivers over connections found in a cache
#[derive(Debug)]
pub struct CachePostman {
    cache: Arc<dyn ConnectionCache>,
}

impl CachePostman {
    pub fn new(cache: Arc<dyn ConnectionCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Postman for CachePostman {
    async fn try_send(&self, message: &Message) -> bool {
        let destination = message.destination();
        let Some(connection) = self.cache.get(destination).await else {
            debug!("No cached connection for {}", destination);
            return false;
        };

        let sent = connection.try_send(message).await;
        trace!(
            "Connection to {} {} message {}",
            destination,
            if sent { "accepted" } else { "refused" },
            message.id()
        );
        sent
    }

    fn name(&self) -> &str {
        "cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeAddress;
    use crate::connection::MemoryConnectionCache;
    use crate::message::Payload;
    use crate::test_utils::RecordingConnection;

    #[tokio::test]
    async fn test_missing_connection_returns_false() {
        let cache = Arc::new(MemoryConnectionCache::new());
        let postman = CachePostman::new(cache);
        let msg = Message::request("a", "b", Payload::empty("ping"));

        assert!(!postman.try_send(&msg).await);
    }

    #[tokio::test]
    async fn test_connection_result_is_returned_verbatim() {
        let cache = Arc::new(MemoryConnectionCache::new());
        let accepting = Arc::new(RecordingConnection::new("b"));
        let refusing = Arc::new(RecordingConnection::refusing("c"));
        cache.add(NodeAddress::from("b"), accepting.clone());
        cache.add(NodeAddress::from("c"), refusing.clone());
        let postman = CachePostman::new(cache);

        let to_b = Message::request("a", "b", Payload::empty("ping"));
        let to_c = Message::request("a", "c", Payload::empty("ping"));
        assert!(postman.try_send(&to_b).await);
        assert!(!postman.try_send(&to_c).await);

        assert_eq!(accepting.sent_messages(), vec![to_b]);
        assert_eq!(refusing.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_routes_responses_to_requester() {
        let cache = Arc::new(MemoryConnectionCache::new());
        let requester = Arc::new(RecordingConnection::new("a"));
        cache.add(NodeAddress::from("a"), requester.clone());
        let postman = CachePostman::new(cache);

        let request = Message::request("a", "b", Payload::empty("ping"));
        let reply = request.reply(Payload::empty("pong"));
        assert!(postman.try_send(&reply).await);
        assert_eq!(requester.sent_count(), 1);
    }
}
