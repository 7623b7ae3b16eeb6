//! Connections and the address → connection cache
//!
//! The routing core never opens connections. A registrar outside the core
//! populates the cache; the cache-backed postman only looks entries up.

use crate::address::NodeAddress;
use crate::config::MAX_INBOX_CAPACITY;
use crate::message::Message;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// An established link able to carry messages to one address
#[async_trait]
pub trait Connection: Send + Sync + Debug {
    /// Address on the other end of this connection
    fn address(&self) -> &NodeAddress;

    /// Attempt to transmit; `false` means the message was not sent
    async fn try_send(&self, message: &Message) -> bool;
}

/// Lookup of established connections by address
#[async_trait]
pub trait ConnectionCache: Send + Sync + Debug {
    async fn get(&self, address: &NodeAddress) -> Option<Arc<dyn Connection>>;
}

/// In-memory cache; lookups never suspend
#[derive(Debug, Default)]
pub struct MemoryConnectionCache {
    connections: DashMap<NodeAddress, Arc<dyn Connection>>,
}

impl MemoryConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the connection for `address`
    pub fn add(&self, address: NodeAddress, connection: Arc<dyn Connection>) {
        if self.connections.insert(address.clone(), connection).is_some() {
            debug!("Replaced cached connection for {}", address);
        } else {
            debug!("Cached connection for {}", address);
        }
    }

    pub fn remove(&self, address: &NodeAddress) -> Option<Arc<dyn Connection>> {
        self.connections.remove(address).map(|(_, connection)| connection)
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.connections.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Synchronous lookup
    pub fn lookup(&self, address: &NodeAddress) -> Option<Arc<dyn Connection>> {
        self.connections
            .get(address)
            .map(|entry| Arc::clone(entry.value()))
    }
}

#[async_trait]
impl ConnectionCache for MemoryConnectionCache {
    async fn get(&self, address: &NodeAddress) -> Option<Arc<dyn Connection>> {
        self.lookup(address)
    }
}

/// In-process connection backed by a bounded tokio channel
///
/// The receiving side is usually handed to `Node::serve`. Sends use
/// `try_send`, so a full or closed channel reports failure immediately
/// instead of applying backpressure to the sender.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    address: NodeAddress,
    sender: mpsc::Sender<Message>,
}

impl ChannelConnection {
    pub fn new(address: NodeAddress, sender: mpsc::Sender<Message>) -> Self {
        Self { address, sender }
    }

    /// Create a connection to `address` and the inbox that receives its traffic
    ///
    /// `capacity` is clamped to `1..=MAX_INBOX_CAPACITY`.
    pub fn pair(address: NodeAddress, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(capacity.clamp(1, MAX_INBOX_CAPACITY));
        (Self::new(address, sender), receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn try_send(&self, message: &Message) -> bool {
        match self.sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Channel to {} is full, dropping {}", self.address, message.id());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Channel to {} is closed", self.address);
                false
            }
        }
    }
}
