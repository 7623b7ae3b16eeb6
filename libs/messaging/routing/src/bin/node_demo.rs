//! Two in-process nodes exchanging requests over channel connections
//!
//! Usage:
//!   node_demo --requests 10
//!   node_demo --config libs/messaging/routing/config/node_a.toml --log-level debug

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use futures::future::join_all;
use message_routing::{Message, Node, NodeConfig, Payload, RequestHandler, RoutingEvent};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "node_demo")]
#[command(about = "Request/response exchange between two routing nodes")]
#[command(version)]
struct Args {
    /// Configuration file for the requesting node (defaults to address "a")
    #[arg(short, long)]
    config: Option<String>,

    /// Address of the answering node
    #[arg(long, default_value = "b")]
    peer: String,

    /// Number of concurrent requests to send
    #[arg(short, long, default_value_t = 5)]
    requests: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Answers `square` requests carrying a bincode `u64`
#[derive(Debug)]
struct SquareHandler;

#[async_trait]
impl RequestHandler for SquareHandler {
    fn can_handle(&self, message: &Message) -> bool {
        message
            .request_body()
            .is_some_and(|payload| payload.kind() == "square")
    }

    async fn on_message(&self, message: &Message) -> anyhow::Result<Message> {
        let value: u64 = message.payload().decode()?;
        let squared = value
            .checked_mul(value)
            .with_context(|| format!("{} squared overflows u64", value))?;
        Ok(message.reply(Payload::encode("square", &squared)?))
    }

    fn name(&self) -> &str {
        "square"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = match &args.config {
        Some(path) => NodeConfig::from_file(path).map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })?,
        None => NodeConfig::new("a"),
    };

    let requester = Arc::new(Node::from_config(config)?);
    let responder = Arc::new(Node::new(args.peer.as_str())?);
    responder.add_request_handler(Arc::new(SquareHandler));

    // Each node caches a connection into the other's inbox
    let (to_requester, requester_inbox) = requester.channel();
    let (to_responder, responder_inbox) = responder.channel();
    responder.add_connection(Arc::new(to_requester));
    requester.add_connection(Arc::new(to_responder));

    let requester_task = requester.serve(requester_inbox);
    let responder_task = responder.serve(responder_inbox);

    let mut events = requester.subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let RoutingEvent::WaitExpired { id, timeout_ms } = event {
                warn!("Request {} gave up after {}ms", id, timeout_ms);
            }
        }
    });

    info!(
        "Sending {} requests from {} to {}",
        args.requests,
        requester.address(),
        responder.address()
    );

    let exchanges = (1..=args.requests).map(|value| {
        let requester = Arc::clone(&requester);
        let peer = responder.address().clone();
        async move {
            let pending = requester
                .request(peer, Payload::encode("square", &value)?)
                .await?;
            let reply = pending.wait().await?;
            let squared: u64 = reply.payload().decode()?;
            Ok::<_, anyhow::Error>((value, reply.id(), squared))
        }
    });

    let mut failures = 0;
    for outcome in join_all(exchanges).await {
        match outcome {
            Ok((value, id, squared)) => info!("{} -> {} (message {})", value, squared, id),
            Err(e) => {
                failures += 1;
                error!("Exchange failed: {:#}", e);
            }
        }
    }

    let office = requester.post_office().stats();
    let correlation = requester.correlator().stats();
    info!(
        "Done: {} sent, {} failed deliveries, {} replies correlated, {} still pending",
        office.messages_sent, office.messages_failed, correlation.fulfilled, correlation.pending
    );

    requester_task.abort();
    responder_task.abort();
    event_task.abort();

    if failures > 0 {
        anyhow::bail!("{} of {} exchanges failed", failures, args.requests);
    }
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
