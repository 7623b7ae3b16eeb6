//! Explicitly constructed routing services for one node
//!
//! A `Node` owns one post office, one correlator, one connection cache and the
//! inbound chain, and hands `Arc`s of them to the components that need them.
//! The standard chain is:
//!
//! ```text
//! inbound ─► proxy ─► request_handler ─► correlator ─► (unroutable)
//!              │            │
//!              ▼            ▼
//!          PostOffice ◄─────┘ ─► CachePostman ─► MemoryConnectionCache ─► Connection
//! ```

use crate::address::NodeAddress;
use crate::config::NodeConfig;
use crate::connection::{ChannelConnection, Connection, MemoryConnectionCache};
use crate::correlation::{PendingResponse, ResponseCorrelator};
use crate::error::Result;
use crate::events::{EventBus, RoutingEvent};
use crate::message::{Message, Payload};
use crate::middleware::{
    Dispatch, Middleware, MiddlewareChain, ProxyMiddleware, RequestHandler,
    RequestHandlerMiddleware,
};
use crate::post_office::PostOffice;
use crate::postman::{CachePostman, Postman};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Node {
    address: NodeAddress,
    config: NodeConfig,
    post_office: Arc<PostOffice>,
    correlator: Arc<ResponseCorrelator>,
    connections: Arc<MemoryConnectionCache>,
    proxy: Arc<ProxyMiddleware>,
    request_handlers: Arc<RequestHandlerMiddleware>,
    chain: MiddlewareChain,
    events: EventBus,
}

impl Node {
    /// Node with default configuration
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Self::from_config(NodeConfig::new(address))
    }

    pub fn from_config(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let address = config.node_address();
        let events = EventBus::new(config.events.capacity);

        let connections = Arc::new(MemoryConnectionCache::new());
        let post_office = Arc::new(PostOffice::new());
        post_office.add_postman(Arc::new(CachePostman::new(connections.clone())));

        let correlator = Arc::new(ResponseCorrelator::with_default_timeout(
            events.clone(),
            config.correlation.default_timeout(),
        ));
        let proxy = Arc::new(ProxyMiddleware::new(
            address.clone(),
            post_office.clone(),
            events.clone(),
        ));
        let request_handlers = Arc::new(RequestHandlerMiddleware::new(
            address.clone(),
            post_office.clone(),
        ));

        let chain = MiddlewareChain::new(events.clone());
        chain.push(proxy.clone());
        chain.push(request_handlers.clone());
        chain.push(correlator.clone());

        info!("Node {} ready with chain {:?}", address, chain.names());

        Ok(Self {
            address,
            config,
            post_office,
            correlator,
            connections,
            proxy,
            request_handlers,
            chain,
            events,
        })
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn post_office(&self) -> &Arc<PostOffice> {
        &self.post_office
    }

    pub fn correlator(&self) -> &Arc<ResponseCorrelator> {
        &self.correlator
    }

    pub fn connections(&self) -> &Arc<MemoryConnectionCache> {
        &self.connections
    }

    pub fn proxy(&self) -> &Arc<ProxyMiddleware> {
        &self.proxy
    }

    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// Register an established connection to `connection.address()`
    pub fn add_connection(&self, connection: Arc<dyn Connection>) {
        self.connections.add(connection.address().clone(), connection);
    }

    /// Append a postman after the cache postman
    pub fn add_postman(&self, postman: Arc<dyn Postman>) {
        self.post_office.add_postman(postman);
    }

    pub fn add_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        self.request_handlers.add_handler(handler);
    }

    /// Append a middleware after the correlator
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.chain.push(middleware);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.events.subscribe()
    }

    /// Open an in-process connection whose traffic lands in the returned inbox
    pub fn channel(&self) -> (ChannelConnection, mpsc::Receiver<Message>) {
        ChannelConnection::pair(self.address.clone(), self.config.inbox.capacity)
    }

    /// Send a request to `respondent` and register a wait for its reply
    ///
    /// The wait is registered before the request leaves, so a fast reply
    /// cannot be missed. If sending fails the wait is discarded.
    ///
    /// A request to this node's own address that no handler claims reaches
    /// the correlator under the same id and resolves the wait with the
    /// request itself, still in the asking state.
    pub async fn request(
        &self,
        respondent: impl Into<NodeAddress>,
        payload: Payload,
    ) -> Result<PendingResponse> {
        let message = Message::request(self.address.clone(), respondent, payload);
        let pending = self.correlator.register_wait(message.id());
        self.post_office.send(&message).await?;
        Ok(pending)
    }

    /// Send any message through the post office
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.post_office.send(message).await
    }

    /// Run an inbound message through the middleware chain
    pub async fn receive(&self, message: Message) -> Result<Dispatch> {
        self.chain.dispatch(&message).await
    }

    /// Dispatch everything arriving on `inbox`, one task per message
    ///
    /// Messages are processed concurrently with no ordering between them.
    /// Failures are logged; the loop ends when every sender is dropped.
    pub fn serve(self: &Arc<Self>, mut inbox: mpsc::Receiver<Message>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    let id = message.id();
                    if let Err(e) = node.receive(message).await {
                        warn!("Node {} failed to process {}: {}", node.address, id, e);
                    }
                });
            }
            debug!("Inbox of node {} closed", node.address);
        })
    }
}
