//! TOML configuration for a routing node
//!
//! ```toml
//! address = "node-a"
//!
//! [correlation]
//! default_timeout_ms = 5000   # omit to wait forever
//!
//! [events]
//! capacity = 256
//!
//! [inbox]
//! capacity = 1024
//! ```

use crate::address::NodeAddress;
use crate::error::{Result, RoutingError};
use crate::events::{DEFAULT_EVENT_CAPACITY, MAX_EVENT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_INBOX_CAPACITY: usize = 1024;
pub const MAX_INBOX_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Address this node answers to
    pub address: String,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub inbox: InboxConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct CorrelationConfig {
    /// Deadline applied by `PendingResponse::wait`; absent means no deadline
    pub default_timeout_ms: Option<u64>,
}

impl CorrelationConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Routing events buffered per subscriber before lagging
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InboxConfig {
    /// Bound of in-process channel connections opened to this node
    pub capacity: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Defaults for everything but the address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            correlation: CorrelationConfig::default(),
            events: EventsConfig::default(),
            inbox: InboxConfig::default(),
        }
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RoutingError::Io(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            RoutingError::invalid_config(format!("Failed to serialize to TOML: {}", e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(RoutingError::invalid_config("Node address cannot be empty"));
        }
        if self.correlation.default_timeout_ms == Some(0) {
            return Err(RoutingError::invalid_config(
                "correlation.default_timeout_ms must be greater than 0 (omit it to wait forever)",
            ));
        }
        if !(1..=MAX_EVENT_CAPACITY).contains(&self.events.capacity) {
            return Err(RoutingError::invalid_config(format!(
                "events.capacity must be between 1 and {}, got {}",
                MAX_EVENT_CAPACITY, self.events.capacity
            )));
        }
        if !(1..=MAX_INBOX_CAPACITY).contains(&self.inbox.capacity) {
            return Err(RoutingError::invalid_config(format!(
                "inbox.capacity must be between 1 and {}, got {}",
                MAX_INBOX_CAPACITY, self.inbox.capacity
            )));
        }
        Ok(())
    }

    pub fn node_address(&self) -> NodeAddress {
        NodeAddress::from(self.address.as_str())
    }
}
