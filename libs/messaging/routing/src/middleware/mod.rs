//! Inbound middleware pipeline
//!
//! Every inbound message is offered to the middlewares in registration order.
//! The first one that reports the message as handled stops the chain. A
//! message nobody claims is dropped without error; `dispatch` still reports
//! it as [`Dispatch::Unroutable`] and publishes an event.
//!
//! - **ProxyMiddleware**: forwards messages whose destination is another node
//! - **RequestHandlerMiddleware**: answers requests addressed to this node
//! - **ResponseCorrelator** (in `correlation`): resolves pending waits

pub mod proxy;
pub mod request_handler;

pub use proxy::{ProxyMiddleware, ProxyStats};
pub use request_handler::{RequestHandler, RequestHandlerMiddleware};

use crate::error::Result;
use crate::events::{EventBus, RoutingEvent};
use crate::message::Message;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, trace};

/// A stage of the inbound pipeline
#[async_trait]
pub trait Middleware: Send + Sync + Debug {
    /// Returns `Ok(true)` when this middleware claims the message
    async fn on_message(&self, message: &Message) -> Result<bool>;

    /// Name used in logs and in [`Dispatch::Handled`]
    fn name(&self) -> &'static str;
}

/// Outcome of running a message through the chain
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled { by: &'static str },
    Unroutable,
}

impl Dispatch {
    pub fn is_handled(&self) -> bool {
        matches!(self, Dispatch::Handled { .. })
    }
}

#[derive(Debug, Default)]
pub struct MiddlewareChain {
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    events: EventBus,
}

impl MiddlewareChain {
    pub fn new(events: EventBus) -> Self {
        Self {
            middlewares: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Append a middleware to the end of the chain
    pub fn push(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares.write().push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.read().is_empty()
    }

    /// Names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.read().iter().map(|m| m.name()).collect()
    }

    /// Offer `message` to each middleware until one claims it
    ///
    /// An error from a middleware stops the chain and is returned as is.
    pub async fn dispatch(&self, message: &Message) -> Result<Dispatch> {
        let middlewares: Vec<Arc<dyn Middleware>> = self.middlewares.read().clone();

        for middleware in &middlewares {
            if middleware.on_message(message).await? {
                trace!("Message {} handled by {}", message.id(), middleware.name());
                return Ok(Dispatch::Handled {
                    by: middleware.name(),
                });
            }
        }

        debug!(
            "Message {} to {} not claimed by any of {} middlewares",
            message.id(),
            message.destination(),
            middlewares.len()
        );
        self.events.publish(RoutingEvent::Unroutable {
            id: message.id(),
            destination: message.destination().clone(),
        });
        Ok(Dispatch::Unroutable)
    }
}
