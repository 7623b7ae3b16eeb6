//! Node-addressed message routing
//!
//! Every participant is a [`Node`] with an address. Inbound messages run
//! through an ordered [`MiddlewareChain`] (proxy, request handlers, response
//! correlator); outbound messages leave through a [`PostOffice`] that tries
//! its postmen in order until one delivers. Callers awaiting a reply hold a
//! [`PendingResponse`] keyed by the request's [`MessageId`].

pub mod address;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod events;
pub mod message;
pub mod middleware;
pub mod node;
pub mod post_office;
pub mod postman;
pub mod test_utils;

pub use address::{MessageId, NodeAddress};
pub use config::{CorrelationConfig, EventsConfig, InboxConfig, NodeConfig};
pub use connection::{ChannelConnection, Connection, ConnectionCache, MemoryConnectionCache};
pub use correlation::{CorrelatorStats, PendingResponse, ResponseCorrelator};
pub use error::{Result, RoutingError};
pub use events::{EventBus, RoutingEvent};
pub use message::{Body, Message, MessageState, Payload};
pub use middleware::{
    Dispatch, Middleware, MiddlewareChain, ProxyMiddleware, ProxyStats, RequestHandler,
    RequestHandlerMiddleware,
};
pub use node::Node;
pub use post_office::{PostOffice, PostOfficeStats};
pub use postman::{CachePostman, Postman};
