use crate::address::{MessageId, NodeAddress};
use crate::error::{Result, RoutingError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Which side of the exchange is currently speaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Asking,
    Answering,
}

/// Tagged opaque payload
///
/// `kind` lets request handlers dispatch without decoding `data`. The routing
/// core never looks inside `data`; `encode`/`decode` are the serialization
/// contract for callers that want typed bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    kind: String,
    data: Bytes,
}

impl Payload {
    pub fn new(kind: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }

    /// Payload with a kind and no data
    pub fn empty(kind: impl Into<String>) -> Self {
        Self::new(kind, Bytes::new())
    }

    /// Serialize a typed value with bincode
    pub fn encode<T: Serialize>(kind: impl Into<String>, value: &T) -> Result<Self> {
        let data = bincode::serialize(value)?;
        Ok(Self::new(kind, data))
    }

    /// Deserialize the data back into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        bincode::deserialize(&self.data).map_err(|e| {
            RoutingError::codec(format!("cannot decode '{}' payload: {}", self.kind, e))
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Message body; the variant determines the message state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Request(Payload),
    Response(Payload),
}

/// The correlatable unit of communication
///
/// Requester and respondent are fixed for the whole exchange. `source` and
/// `destination` are derived from the state: the requester speaks while
/// asking, the respondent speaks while answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    requester: NodeAddress,
    respondent: NodeAddress,
    body: Body,
}

impl Message {
    /// Create a request with a fresh correlation id
    pub fn request(
        requester: impl Into<NodeAddress>,
        respondent: impl Into<NodeAddress>,
        payload: Payload,
    ) -> Self {
        Self::request_with_id(MessageId::new(), requester, respondent, payload)
    }

    /// Create a request with a caller-chosen correlation id
    pub fn request_with_id(
        id: MessageId,
        requester: impl Into<NodeAddress>,
        respondent: impl Into<NodeAddress>,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            requester: requester.into(),
            respondent: respondent.into(),
            body: Body::Request(payload),
        }
    }

    /// Build the answer to this message: same id, same address pair
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            id: self.id,
            requester: self.requester.clone(),
            respondent: self.respondent.clone(),
            body: Body::Response(payload),
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn state(&self) -> MessageState {
        match self.body {
            Body::Request(_) => MessageState::Asking,
            Body::Response(_) => MessageState::Answering,
        }
    }

    pub fn requester(&self) -> &NodeAddress {
        &self.requester
    }

    pub fn respondent(&self) -> &NodeAddress {
        &self.respondent
    }

    /// Address of whoever is currently speaking
    pub fn source(&self) -> &NodeAddress {
        match self.state() {
            MessageState::Asking => &self.requester,
            MessageState::Answering => &self.respondent,
        }
    }

    /// Address the message is travelling to
    pub fn destination(&self) -> &NodeAddress {
        match self.state() {
            MessageState::Asking => &self.respondent,
            MessageState::Answering => &self.requester,
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn request_body(&self) -> Option<&Payload> {
        match &self.body {
            Body::Request(payload) => Some(payload),
            Body::Response(_) => None,
        }
    }

    pub fn response_body(&self) -> Option<&Payload> {
        match &self.body {
            Body::Response(payload) => Some(payload),
            Body::Request(_) => None,
        }
    }

    /// Payload of whichever body is present
    pub fn payload(&self) -> &Payload {
        match &self.body {
            Body::Request(payload) | Body::Response(payload) => payload,
        }
    }

    pub fn is_request(&self) -> bool {
        self.state() == MessageState::Asking
    }

    pub fn is_response(&self) -> bool {
        self.state() == MessageState::Answering
    }

    /// Encode the whole message for byte-oriented connections
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
