// Message exchange: drains the pending-outbound stream onto the wire and
// observes inbound messages, echoes, chat states, and delivery receipts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use xmpp_parsers::Jid;

use super::connection::{Connection, ConnectionEvent};
use super::session::ConnectionProvider;
use super::{chat_states, delivery_receipts};
use crate::conversation::ChatStateSink;
use crate::models::{ChatState, Message};
use crate::store::{ConversationStore, MessageStore, OutboundMessageStore};

/// How long the inbound listener waits before asking for the connection
/// again while a reconnect is in flight.
const SESSION_POLL: Duration = Duration::from_millis(250);

struct Bound {
    provider: Arc<dyn ConnectionProvider>,
    drain: JoinHandle<()>,
    listener: JoinHandle<()>,
}

/// Moves messages between the conversation stores and the network. The
/// connection handle is fetched per operation from the session, never
/// cached: a reconnect replaces it at any time.
pub struct MessageExchange {
    outbound: Arc<dyn OutboundMessageStore>,
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    bound: TokioMutex<Option<Bound>>,
}

impl MessageExchange {
    pub fn new(
        outbound: Arc<dyn OutboundMessageStore>,
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        MessageExchange {
            outbound,
            messages,
            conversations,
            bound: TokioMutex::new(None),
        }
    }

    /// Bind to the session: start draining the outbound queue and observing
    /// inbound traffic. Rebinding replaces the previous tasks.
    pub async fn initialize(&self, provider: Arc<dyn ConnectionProvider>) {
        self.teardown().await;

        let drain = tokio::spawn(drain_outbound(self.outbound.clone(), provider.clone()));
        let listener = tokio::spawn(observe_inbound(
            provider.clone(),
            self.messages.clone(),
            self.conversations.clone(),
        ));

        *self.bound.lock().await = Some(Bound {
            provider,
            drain,
            listener,
        });
        info!("Message exchange initialized");
    }

    /// Cancel the outbound drain and the inbound listener. Safe to call
    /// even if `initialize` never ran.
    pub async fn teardown(&self) {
        if let Some(bound) = self.bound.lock().await.take() {
            bound.drain.abort();
            bound.listener.abort();
            debug!("Message exchange torn down");
        }
    }

    async fn bound_connection(&self) -> Result<Arc<dyn Connection>> {
        let provider = self
            .bound
            .lock()
            .await
            .as_ref()
            .map(|bound| bound.provider.clone())
            .ok_or_else(|| anyhow!("message exchange is not bound to a session"))?;
        Ok(provider.connection().await?)
    }
}

#[async_trait]
impl ChatStateSink for MessageExchange {
    /// Send the local user's chat state for `peer_jid` over the bound
    /// connection.
    async fn send_chat_state(&self, peer_jid: &str, state: ChatState) -> Result<()> {
        let connection = self.bound_connection().await?;
        let to: Jid = peer_jid
            .parse()
            .map_err(|e| anyhow!("invalid peer JID '{}': {}", peer_jid, e))?;
        connection
            .send_stanza(chat_states::chat_state_stanza(to, state))
            .await
    }
}

/// Long-lived drain of the pending-outbound stream. One batch at a time,
/// batch order preserved; runs until teardown or the store closes. The
/// connection is fetched per batch so a reconnect swaps it in transparently.
async fn drain_outbound(
    outbound: Arc<dyn OutboundMessageStore>,
    provider: Arc<dyn ConnectionProvider>,
) {
    while let Some(batch) = outbound.next_batch().await {
        match provider.connection().await {
            Ok(connection) => send_messages(connection.as_ref(), batch).await,
            Err(e) => error!("Dropping batch of {} messages: {}", batch.len(), e),
        }
    }
    debug!("Outbound message stream ended");
}

/// Best-effort batch send: a failed message is logged and skipped, the rest
/// of the batch still goes out. There is no per-message retry.
async fn send_messages(connection: &dyn Connection, messages: Vec<Message>) {
    for message in messages {
        let to: Jid = match message.peer_jid.parse() {
            Ok(jid) => jid,
            Err(e) => {
                error!("Invalid peer JID '{}': {}", message.peer_jid, e);
                continue;
            }
        };
        let stanza = delivery_receipts::chat_message(to, message.id.clone(), &message.body);
        if let Err(e) = connection.send_stanza(stanza).await {
            error!(
                "Failed to send message {} to {}: {}",
                message.id, message.peer_jid, e
            );
        }
    }
}

/// Observation point for inbound traffic: record, forward to the stores,
/// and acknowledge receivable messages. Errors here are logged and dropped
/// so one bad stanza never stalls the stream. When the connection goes away
/// the listener polls the session until a fresh one replaces it, then
/// subscribes again.
async fn observe_inbound(
    provider: Arc<dyn ConnectionProvider>,
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
) {
    let mut observed: Option<Arc<dyn Connection>> = None;
    loop {
        let connection = match provider.connection().await {
            Ok(connection) => connection,
            Err(_) => {
                tokio::time::sleep(SESSION_POLL).await;
                continue;
            }
        };
        if observed
            .as_ref()
            .map_or(false, |seen| Arc::ptr_eq(seen, &connection))
        {
            tokio::time::sleep(SESSION_POLL).await;
            continue;
        }
        observed = Some(connection.clone());

        let mut events = connection.subscribe();
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::MessageReceived {
                    from,
                    id,
                    body,
                    receipt_requested,
                } => {
                    debug!("Incoming message {} from {}", id, from);
                    if receipt_requested {
                        acknowledge(connection.as_ref(), &from, &id).await;
                    }
                    messages.record_message(Message::received(id, from, body)).await;
                }
                ConnectionEvent::MessageSent { to, id } => {
                    debug!("Outgoing message {} to {}", id, to);
                }
                ConnectionEvent::ChatStateChanged { from, state } => {
                    debug!("Chat state {:?} from {}", state, from);
                    conversations.record_peer_chat_state(&from, state).await;
                }
                ConnectionEvent::ReceiptReceived(receipt) => {
                    debug!(
                        "Delivery receipt from {} for message {}",
                        receipt.from_jid, receipt.receipt_id
                    );
                    messages.record_receipt(receipt).await;
                }
                ConnectionEvent::Online => {}
                ConnectionEvent::Disconnected { .. } => break,
            }
        }
        debug!("Inbound event stream ended, waiting for a fresh connection");
    }
}

/// Automatic receipt acknowledgment for an inbound receivable message.
async fn acknowledge(connection: &dyn Connection, from: &str, id: &str) {
    let to: Jid = match from.parse() {
        Ok(jid) => jid,
        Err(e) => {
            error!("Cannot acknowledge message {}: invalid JID '{}': {}", id, from, e);
            return;
        }
    };
    if let Err(e) = connection
        .send_stanza(delivery_receipts::receipt_ack(to, id))
        .await
    {
        error!("Failed to send receipt for message {}: {}", id, e);
    }
}
