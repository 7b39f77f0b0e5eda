// Transport boundary: connect/authenticate, stanza send, and typed
// connection events, with a production implementation over tokio-xmpp.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_xmpp::{AsyncClient as XmppAsyncClient, BareJid, Event as XmppEvent};
use xmpp_parsers::Element;

use super::{chat_states, delivery_receipts, NS_JABBER_CLIENT};
use crate::error::Error;
use crate::models::{Account, ChatState, DeliveryReceipt};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_POLL_TIMEOUT: Duration = Duration::from_secs(2);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection parameters derived from an account: identity and credential.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub local_part: String,
    pub domain_part: String,
    pub password: String,
}

impl ConnectionConfig {
    pub fn jid(&self) -> String {
        format!("{}@{}", self.local_part, self.domain_part)
    }
}

impl From<&Account> for ConnectionConfig {
    fn from(account: &Account) -> Self {
        ConnectionConfig {
            local_part: account.local_part.clone(),
            domain_part: account.domain_part.clone(),
            password: account.password.clone(),
        }
    }
}

/// Typed events fanned out to connection subscribers. Listener callbacks in
/// the core consume these instead of raw stanzas.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Online,
    Disconnected {
        reason: String,
    },
    MessageReceived {
        from: String,
        id: String,
        body: String,
        receipt_requested: bool,
    },
    /// Echo of an outgoing chat message that left through this connection.
    MessageSent {
        to: String,
        id: String,
    },
    ChatStateChanged {
        from: String,
        state: ChatState,
    },
    ReceiptReceived(DeliveryReceipt),
}

/// Subscription handle for connection events. Dropping it deregisters the
/// listener; there are no nullable listener fields to unset.
pub struct EventSubscription {
    rx: broadcast::Receiver<ConnectionEvent>,
}

impl EventSubscription {
    pub fn new(rx: broadcast::Receiver<ConnectionEvent>) -> Self {
        EventSubscription { rx }
    }

    /// Next event, or `None` once the connection is gone. A lagged
    /// subscriber skips missed events rather than failing.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Connection event subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// One authenticated transport connection. Exclusively owned by the session
/// manager; other components borrow the handle per operation.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send_stanza(&self, stanza: Element) -> Result<()>;

    fn subscribe(&self) -> EventSubscription;

    fn is_authenticated(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Stanza-based transport. Connect and authenticate are one atomic attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>, Error>;
}

/// Production transport over tokio-xmpp.
pub struct XmppTransport;

#[async_trait]
impl Transport for XmppTransport {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>, Error> {
        let jid = BareJid::from_str(&config.jid()).map_err(|e| {
            Error::AuthenticationRejected(format!("invalid JID '{}': {}", config.jid(), e))
        })?;

        info!("Connecting to XMPP server as {}", jid);
        let client = XmppAsyncClient::new(jid, config.password.clone());
        let client = Arc::new(TokioMutex::new(client));

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let authenticated = Arc::new(AtomicBool::new(false));
        let (status_tx, mut status_rx) = mpsc::channel(1);

        let pump = tokio::spawn(event_pump(
            client.clone(),
            events_tx.clone(),
            authenticated.clone(),
            status_tx,
        ));

        let outcome = tokio::time::timeout(CONNECT_TIMEOUT, status_rx.recv()).await;
        match outcome {
            Ok(Some(Ok(()))) => {
                info!("Connected and authenticated successfully");
                Ok(Arc::new(XmppConnection {
                    client,
                    events: events_tx,
                    authenticated,
                    pump,
                }))
            }
            Ok(Some(Err(error))) => {
                pump.abort();
                Err(error)
            }
            Ok(None) => {
                pump.abort();
                Err(Error::AuthenticationRejected(
                    "stream ended during connection attempt".to_string(),
                ))
            }
            Err(_) => {
                pump.abort();
                Err(Error::EndpointUnreachable(format!(
                    "connection attempt timed out after {:?}",
                    CONNECT_TIMEOUT
                )))
            }
        }
    }
}

pub struct XmppConnection {
    client: Arc<TokioMutex<XmppAsyncClient>>,
    events: broadcast::Sender<ConnectionEvent>,
    authenticated: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

#[async_trait]
impl Connection for XmppConnection {
    async fn send_stanza(&self, stanza: Element) -> Result<()> {
        let echo = outgoing_echo(&stanza);
        {
            let mut client = self.client.lock().await;
            client
                .send_stanza(stanza)
                .await
                .map_err(|e| anyhow!("failed to send stanza: {}", e))?;
        }
        if let Some((to, id)) = echo {
            let _ = self.events.send(ConnectionEvent::MessageSent { to, id });
        }
        Ok(())
    }

    fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.events.subscribe())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.pump.abort();
        self.authenticated.store(false, Ordering::SeqCst);

        let mut client = tokio::time::timeout(Duration::from_secs(5), self.client.lock())
            .await
            .map_err(|_| anyhow!("timed out acquiring client lock for close"))?;

        let unavailable = Element::builder("presence", NS_JABBER_CLIENT)
            .attr("type", "unavailable")
            .build();
        match client.send_stanza(unavailable).await {
            Ok(_) => debug!("Sent unavailable presence"),
            Err(e) => warn!("Failed to send unavailable presence: {}", e),
        }

        client
            .close()
            .await
            .map_err(|e| anyhow!("error closing XMPP stream: {}", e))
    }
}

impl Drop for XmppConnection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Reads transport events and fans them out as typed connection events.
/// The first connect outcome also resolves the pending `connect` call
/// through `status`.
async fn event_pump(
    client: Arc<TokioMutex<XmppAsyncClient>>,
    events: broadcast::Sender<ConnectionEvent>,
    authenticated: Arc<AtomicBool>,
    status: mpsc::Sender<Result<(), Error>>,
) {
    loop {
        // Bounded lock hold so concurrent sends can interleave with the
        // event stream.
        let polled = tokio::time::timeout(EVENT_POLL_TIMEOUT, async {
            let mut client = client.lock().await;
            client.next().await
        })
        .await;

        let event = match polled {
            Ok(event) => event,
            Err(_) => continue,
        };

        match event {
            Some(XmppEvent::Online { bound_jid, .. }) => {
                info!("Online as {}", bound_jid);
                authenticated.store(true, Ordering::SeqCst);
                let _ = status.try_send(Ok(()));
                let _ = events.send(ConnectionEvent::Online);
            }
            Some(XmppEvent::Stanza(stanza)) => {
                if let Err(e) = dispatch_stanza(&stanza, &events) {
                    error!("Error processing inbound stanza: {}", e);
                }
            }
            Some(XmppEvent::Disconnected(reason)) => {
                error!("Transport disconnected: {:?}", reason);
                authenticated.store(false, Ordering::SeqCst);
                let _ = status.try_send(Err(classify_disconnect(&reason)));
                let _ = events.send(ConnectionEvent::Disconnected {
                    reason: format!("{:?}", reason),
                });
                break;
            }
            None => {
                error!("XMPP event stream ended");
                authenticated.store(false, Ordering::SeqCst);
                let _ = status.try_send(Err(Error::EndpointUnreachable(
                    "event stream ended".to_string(),
                )));
                let _ = events.send(ConnectionEvent::Disconnected {
                    reason: "event stream ended".to_string(),
                });
                break;
            }
        }
    }
}

/// Map a transport disconnect reason onto the error taxonomy. I/O failures
/// are an unreachable endpoint; everything else counts as an
/// authentication rejection.
fn classify_disconnect(reason: &tokio_xmpp::Error) -> Error {
    match reason {
        tokio_xmpp::Error::Io(e) => Error::EndpointUnreachable(e.to_string()),
        tokio_xmpp::Error::Auth(e) => Error::AuthenticationRejected(format!("{:?}", e)),
        other => Error::AuthenticationRejected(format!("{:?}", other)),
    }
}

/// Turn an inbound message stanza into the matching typed events.
/// Anything malformed is logged by the caller and dropped.
fn dispatch_stanza(stanza: &Element, events: &broadcast::Sender<ConnectionEvent>) -> Result<()> {
    if stanza.name() != "message" {
        return Ok(());
    }

    // A stanza may carry several payloads at once, so every branch falls
    // through instead of claiming the stanza for itself.
    if let Some(receipt) = delivery_receipts::receipt_of(stanza) {
        debug!(
            "Received delivery receipt from {} for message {}",
            receipt.from_jid, receipt.receipt_id
        );
        let _ = events.send(ConnectionEvent::ReceiptReceived(receipt));
    }

    let from = stanza.attr("from").map(str::to_string);

    if let Some(state) = chat_states::chat_state_of(stanza) {
        let from = from
            .clone()
            .ok_or_else(|| anyhow!("chat state notification without 'from'"))?;
        debug!("Received {:?} chat state from {}", state, from);
        let _ = events.send(ConnectionEvent::ChatStateChanged { from, state });
    }

    // Namespace handling varies between servers, so match the body child
    // by name alone.
    let body = stanza
        .children()
        .find(|child| child.name() == "body")
        .map(|child| child.text());
    if let Some(body) = body {
        if !body.is_empty() {
            let from = from.ok_or_else(|| anyhow!("message without 'from'"))?;
            let id = stanza
                .attr("id")
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let receipt_requested = delivery_receipts::receipt_requested(stanza);
            debug!("Received message {} from {}", id, from);
            let _ = events.send(ConnectionEvent::MessageReceived {
                from,
                id,
                body,
                receipt_requested,
            });
        }
    }

    Ok(())
}

/// If the stanza is an outgoing chat message with a body, the (to, id) pair
/// for the outgoing-echo event.
fn outgoing_echo(stanza: &Element) -> Option<(String, String)> {
    if stanza.name() != "message" {
        return None;
    }
    stanza.children().find(|child| child.name() == "body")?;
    let to = stanza.attr("to")?.to_string();
    let id = stanza.attr("id")?.to_string();
    Some((to, id))
}
