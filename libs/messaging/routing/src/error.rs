use crate::address::{MessageId, NodeAddress};

/// Result alias for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("Delivery failed: every postman refused message {id} to {destination} ({attempts} attempted)")]
    DeliveryFailed {
        id: MessageId,
        destination: NodeAddress,
        attempts: usize,
    },

    #[error("Request handler '{handler}' failed on message {id}: {reason}")]
    HandlerFailed {
        id: MessageId,
        handler: String,
        reason: String,
    },

    #[error("No response to message {id} within {timeout_ms}ms")]
    Timeout { id: MessageId, timeout_ms: u64 },

    #[error("Wait for message {id} was cancelled before a response arrived")]
    WaitCancelled { id: MessageId },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl RoutingError {
    /// Create a delivery failed error
    pub fn delivery_failed(id: MessageId, destination: NodeAddress, attempts: usize) -> Self {
        RoutingError::DeliveryFailed {
            id,
            destination,
            attempts,
        }
    }

    /// Create a handler failed error
    pub fn handler_failed(
        id: MessageId,
        handler: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        RoutingError::HandlerFailed {
            id,
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(id: MessageId, timeout_ms: u64) -> Self {
        RoutingError::Timeout { id, timeout_ms }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        RoutingError::InvalidConfig(msg.into())
    }

    /// Create a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        RoutingError::Codec(msg.into())
    }

    /// Correlation id the error refers to, if any
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            RoutingError::DeliveryFailed { id, .. }
            | RoutingError::HandlerFailed { id, .. }
            | RoutingError::Timeout { id, .. }
            | RoutingError::WaitCancelled { id } => Some(*id),
            _ => None,
        }
    }

    /// Check if retrying the same operation could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RoutingError::DeliveryFailed { .. } | RoutingError::Timeout { .. }
        )
    }

    /// Check if this is an outbound delivery error
    pub fn is_delivery_error(&self) -> bool {
        matches!(self, RoutingError::DeliveryFailed { .. })
    }
}

impl From<std::io::Error> for RoutingError {
    fn from(err: std::io::Error) -> Self {
        RoutingError::Io(err.to_string())
    }
}

impl From<bincode::Error> for RoutingError {
    fn from(err: bincode::Error) -> Self {
        RoutingError::Codec(err.to_string())
    }
}

impl From<toml::de::Error> for RoutingError {
    fn from(err: toml::de::Error) -> Self {
        RoutingError::InvalidConfig(err.to_string())
    }
}
