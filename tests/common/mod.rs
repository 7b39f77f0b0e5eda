// Shared test utilities: logging setup, a scriptable fake transport with
// recording connections, and a recording chat-state sink.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use xmpp_parsers::Element;

use colloquy::conversation::ChatStateSink;
use colloquy::error::Error;
use colloquy::models::{Account, ChatState};
use colloquy::xmpp::connection::{
    Connection, ConnectionConfig, ConnectionEvent, EventSubscription, Transport,
};
use colloquy::xmpp::ConnectionProvider;

pub fn setup_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_account() -> Account {
    Account::new("alice", "example.com", "hunter2")
}

/// Body text of a message stanza, matched by element name.
pub fn body_text(stanza: &Element) -> Option<String> {
    stanza
        .children()
        .find(|child| child.name() == "body")
        .map(|child| child.text())
}

/// Poll until `cond` holds; panics if it never does.
pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// In-process stand-in for a live connection: records every stanza sent
/// through it and lets tests inject inbound events.
pub struct FakeConnection {
    authenticated: bool,
    sent: Mutex<Vec<Element>>,
    events: broadcast::Sender<ConnectionEvent>,
    fail_bodies: Vec<String>,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Self::failing_bodies(Vec::new())
    }

    /// A connection that rejects sends whose body matches one of `bodies`.
    pub fn failing_bodies(bodies: Vec<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(FakeConnection {
            authenticated: true,
            sent: Mutex::new(Vec::new()),
            events,
            fail_bodies: bodies,
            closed: AtomicBool::new(false),
        })
    }

    /// Inject an inbound event, waiting for at least one subscriber first
    /// so nothing is dropped on the floor.
    pub async fn emit(&self, event: ConnectionEvent) {
        for _ in 0..1000 {
            if self.events.receiver_count() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let _ = self.events.send(event);
    }

    /// Inject an event without waiting for subscribers; dropped on the
    /// floor if nobody is listening yet, exactly like the real channel.
    pub fn emit_now(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub async fn sent(&self) -> Vec<Element> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_bodies(&self) -> Vec<String> {
        self.sent.lock().await.iter().filter_map(body_text).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send_stanza(&self, stanza: Element) -> Result<()> {
        if let Some(body) = body_text(&stanza) {
            if self.fail_bodies.contains(&body) {
                return Err(anyhow!("simulated send failure for body '{}'", body));
            }
        }
        self.sent.lock().await.push(stanza);
        Ok(())
    }

    fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.events.subscribe())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum DialOutcome {
    Success,
    Unreachable,
    Rejected,
}

/// Transport whose dial outcomes are scripted per attempt; once the script
/// runs out every further dial succeeds.
pub struct FakeTransport {
    script: Mutex<VecDeque<DialOutcome>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    dials: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(outcomes: Vec<DialOutcome>) -> Arc<Self> {
        Arc::new(FakeTransport {
            script: Mutex::new(outcomes.into()),
            connections: Mutex::new(Vec::new()),
            dials: AtomicUsize::new(0),
        })
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub async fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock().await[index].clone()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn Connection>, Error> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(DialOutcome::Success);
        match outcome {
            DialOutcome::Success => {
                let connection = FakeConnection::new();
                self.connections.lock().await.push(connection.clone());
                Ok(connection)
            }
            DialOutcome::Unreachable => {
                Err(Error::EndpointUnreachable("no route to host".to_string()))
            }
            DialOutcome::Rejected => {
                Err(Error::AuthenticationRejected("not-authorized".to_string()))
            }
        }
    }
}

/// Provider pinned to one fake connection, for exchange tests that need no
/// session manager in the loop.
pub struct FixedProvider {
    connection: Arc<FakeConnection>,
}

impl FixedProvider {
    pub fn new(connection: Arc<FakeConnection>) -> Arc<Self> {
        Arc::new(FixedProvider { connection })
    }
}

#[async_trait]
impl ConnectionProvider for FixedProvider {
    async fn connection(&self) -> Result<Arc<dyn Connection>, Error> {
        Ok(self.connection.clone())
    }
}

/// Chat-state sink that records transmissions instead of hitting the wire.
pub struct RecordingSink {
    sent: Mutex<Vec<(String, ChatState)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingSink {
            sent: Mutex::new(Vec::new()),
        })
    }

    pub async fn states(&self) -> Vec<ChatState> {
        self.sent.lock().await.iter().map(|(_, s)| *s).collect()
    }

    pub async fn transmissions(&self) -> Vec<(String, ChatState)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChatStateSink for RecordingSink {
    async fn send_chat_state(&self, peer_jid: &str, state: ChatState) -> Result<()> {
        self.sent.lock().await.push((peer_jid.to_string(), state));
        Ok(())
    }
}
