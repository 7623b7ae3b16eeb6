use crate::address::NodeAddress;
use crate::connection::Connection;
use crate::error::{Result, RoutingError};
use crate::message::Message;
use crate::middleware::{Middleware, RequestHandler};
use crate::postman::Postman;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared, ordered record of which test component ran
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str) {
        self.calls.lock().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Postman with a fixed outcome that records every attempt
#[derive(Debug)]
pub struct ScriptedPostman {
    name: String,
    outcome: bool,
    log: CallLog,
    seen: Mutex<Vec<Message>>,
}

impl ScriptedPostman {
    pub fn new(name: impl Into<String>, outcome: bool, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            outcome,
            log: log.clone(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Messages this postman was asked to deliver
    pub fn seen(&self) -> Vec<Message> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Postman for ScriptedPostman {
    async fn try_send(&self, message: &Message) -> bool {
        self.log.record(&self.name);
        self.seen.lock().push(message.clone());
        self.outcome
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy)]
enum Script {
    Pass,
    Claim,
    Fail,
}

/// Middleware with a fixed decision that records every invocation
#[derive(Debug)]
pub struct ScriptedMiddleware {
    name: &'static str,
    script: Script,
    log: CallLog,
}

impl ScriptedMiddleware {
    pub fn passing(name: &'static str, log: &CallLog) -> Self {
        Self::new(name, Script::Pass, log)
    }

    pub fn claiming(name: &'static str, log: &CallLog) -> Self {
        Self::new(name, Script::Claim, log)
    }

    pub fn failing(name: &'static str, log: &CallLog) -> Self {
        Self::new(name, Script::Fail, log)
    }

    fn new(name: &'static str, script: Script, log: &CallLog) -> Self {
        Self {
            name,
            script,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Middleware for ScriptedMiddleware {
    async fn on_message(&self, message: &Message) -> Result<bool> {
        self.log.record(self.name);
        match self.script {
            Script::Pass => Ok(false),
            Script::Claim => Ok(true),
            Script::Fail => Err(RoutingError::handler_failed(
                message.id(),
                self.name,
                "scripted failure",
            )),
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Connection that keeps what it was given
#[derive(Debug)]
pub struct RecordingConnection {
    address: NodeAddress,
    accept: bool,
    attempts: AtomicU64,
    sent: Mutex<Vec<Message>>,
}

impl RecordingConnection {
    pub fn new(address: impl Into<NodeAddress>) -> Self {
        Self::with_outcome(address, true)
    }

    /// Connection whose every send is refused
    pub fn refusing(address: impl Into<NodeAddress>) -> Self {
        Self::with_outcome(address, false)
    }

    fn with_outcome(address: impl Into<NodeAddress>, accept: bool) -> Self {
        Self {
            address: address.into(),
            accept,
            attempts: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn try_send(&self, message: &Message) -> bool {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.accept {
            self.sent.lock().push(message.clone());
        }
        self.accept
    }
}

/// Handler for requests of one payload kind; replies with the same payload
#[derive(Debug)]
pub struct KindHandler {
    name: String,
    kind: String,
    log: CallLog,
}

impl KindHandler {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl RequestHandler for KindHandler {
    fn can_handle(&self, message: &Message) -> bool {
        message
            .request_body()
            .is_some_and(|payload| payload.kind() == self.kind)
    }

    async fn on_message(&self, message: &Message) -> anyhow::Result<Message> {
        self.log.record(&self.name);
        Ok(message.reply(message.payload().clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handler that accepts everything and always errors
#[derive(Debug)]
pub struct FailingHandler {
    name: String,
    reason: String,
}

impl FailingHandler {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RequestHandler for FailingHandler {
    fn can_handle(&self, _message: &Message) -> bool {
        true
    }

    async fn on_message(&self, _message: &Message) -> anyhow::Result<Message> {
        Err(anyhow::anyhow!("{}", self.reason))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
