use super::Middleware;
use crate::address::NodeAddress;
use crate::error::{Result, RoutingError};
use crate::message::Message;
use crate::post_office::PostOffice;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, trace};

/// Business logic answering requests addressed to this node
#[async_trait]
pub trait RequestHandler: Send + Sync + Debug {
    fn can_handle(&self, message: &Message) -> bool;

    /// Produce the reply, normally built with [`Message::reply`]
    async fn on_message(&self, message: &Message) -> anyhow::Result<Message>;

    fn name(&self) -> &str {
        "handler"
    }
}

/// Dispatches requests for this node to the first matching handler
///
/// Handlers are consulted in registration order and the first whose
/// `can_handle` returns true is the only one invoked. Its reply goes out
/// through the post office. Handler and delivery errors propagate to the
/// caller of the chain; nothing is retried.
#[derive(Debug)]
pub struct RequestHandlerMiddleware {
    local: NodeAddress,
    post_office: Arc<PostOffice>,
    handlers: RwLock<Vec<Arc<dyn RequestHandler>>>,
}

impl RequestHandlerMiddleware {
    pub fn new(local: NodeAddress, post_office: Arc<PostOffice>) -> Self {
        Self {
            local,
            post_office,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Append a handler; earlier handlers win ties
    pub fn add_handler(&self, handler: Arc<dyn RequestHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    fn find_handler(&self, message: &Message) -> Option<Arc<dyn RequestHandler>> {
        self.handlers
            .read()
            .iter()
            .find(|handler| handler.can_handle(message))
            .cloned()
    }
}

#[async_trait]
impl Middleware for RequestHandlerMiddleware {
    async fn on_message(&self, message: &Message) -> Result<bool> {
        if *message.respondent() != self.local {
            return Ok(false);
        }

        let Some(handler) = self.find_handler(message) else {
            debug!("No request handler accepts {}", message.id());
            return Ok(false);
        };

        trace!("Handler '{}' answering {}", handler.name(), message.id());
        let reply = handler.on_message(message).await.map_err(|e| {
            RoutingError::handler_failed(message.id(), handler.name(), format!("{:#}", e))
        })?;

        self.post_office.send(&reply).await?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "request_handler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use crate::test_utils::{CallLog, FailingHandler, KindHandler, ScriptedPostman};

    fn middleware(log: &CallLog, deliver: bool) -> RequestHandlerMiddleware {
        let office = Arc::new(PostOffice::new());
        office.add_postman(Arc::new(ScriptedPostman::new("out", deliver, log)));
        RequestHandlerMiddleware::new(NodeAddress::from("b"), office)
    }

    #[tokio::test]
    async fn test_first_matching_handler_wins() {
        let log = CallLog::new();
        let mw = middleware(&log, true);
        mw.add_handler(Arc::new(KindHandler::new("other", "other", &log)));
        mw.add_handler(Arc::new(KindHandler::new("first", "ping", &log)));
        mw.add_handler(Arc::new(KindHandler::new("second", "ping", &log)));

        for _ in 0..10 {
            let msg = Message::request("a", "b", Payload::empty("ping"));
            assert!(mw.on_message(&msg).await.unwrap());
        }

        let calls = log.calls();
        assert_eq!(calls.len(), 20);
        assert!(calls.chunks(2).all(|pair| pair == ["first", "out"]));
    }

    #[tokio::test]
    async fn test_reply_is_sent_through_post_office() {
        let log = CallLog::new();
        let office = Arc::new(PostOffice::new());
        let outbound = Arc::new(ScriptedPostman::new("out", true, &log));
        office.add_postman(outbound.clone());
        let mw = RequestHandlerMiddleware::new(NodeAddress::from("b"), office);
        mw.add_handler(Arc::new(KindHandler::new("echo", "ping", &log)));

        let request = Message::request("a", "b", Payload::new("ping", b"hi".to_vec()));
        assert!(mw.on_message(&request).await.unwrap());

        let sent = outbound.seen();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), request.id());
        assert!(sent[0].is_response());
        assert_eq!(sent[0].destination().as_str(), "a");
    }

    #[tokio::test]
    async fn test_not_respondent_passes() {
        let log = CallLog::new();
        let mw = middleware(&log, true);
        mw.add_handler(Arc::new(KindHandler::new("echo", "ping", &log)));

        let msg = Message::request("a", "c", Payload::empty("ping"));
        assert!(!mw.on_message(&msg).await.unwrap());
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_matching_handler_passes() {
        let log = CallLog::new();
        let mw = middleware(&log, true);
        mw.add_handler(Arc::new(KindHandler::new("echo", "ping", &log)));

        let msg = Message::request("a", "b", Payload::empty("unknown"));
        assert!(!mw.on_message(&msg).await.unwrap());
    }

    #[tokio::test]
    async fn test_handler_failure_propagates_without_reply() {
        let log = CallLog::new();
        let mw = middleware(&log, true);
        mw.add_handler(Arc::new(FailingHandler::new("broken", "database unavailable")));

        let msg = Message::request("a", "b", Payload::empty("ping"));
        let err = mw.on_message(&msg).await.unwrap_err();

        assert_eq!(
            err,
            RoutingError::handler_failed(msg.id(), "broken", "database unavailable")
        );
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reply_delivery_failure_propagates() {
        let log = CallLog::new();
        let mw = middleware(&log, false);
        mw.add_handler(Arc::new(KindHandler::new("echo", "ping", &log)));

        let msg = Message::request("a", "b", Payload::empty("ping"));
        let err = mw.on_message(&msg).await.unwrap_err();
        assert!(err.is_delivery_error());
    }
}
