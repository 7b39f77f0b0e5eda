// Reactive store interfaces consumed by the session core, plus in-memory
// implementations for tests and embedders without durable persistence.
// Each store exposes the current value and a stream of changes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use crate::models::{Account, ChatState, ConnectionStatus, DeliveryReceipt, Message};

/// Persists the one active account record as an observable value.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Current account, if one has been stored.
    async fn account(&self) -> Option<Account>;

    /// Stream of account changes, starting at the current value.
    fn account_stream(&self) -> watch::Receiver<Option<Account>>;

    /// Replace the stored account wholesale.
    async fn update_account(&self, account: Account);
}

#[async_trait]
pub trait ConnectionStatusStore: Send + Sync {
    fn status_stream(&self) -> watch::Receiver<ConnectionStatus>;

    async fn update_status(&self, status: ConnectionStatus);
}

/// Queue of outbound messages awaiting send, delivered to the exchange in
/// batches. Order within a batch is preserved by the consumer.
#[async_trait]
pub trait OutboundMessageStore: Send + Sync {
    async fn enqueue(&self, message: Message);

    /// Next pending batch, or `None` once the store is closed.
    async fn next_batch(&self) -> Option<Vec<Message>>;
}

/// Write side of the persisted message history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn record_message(&self, message: Message);

    async fn record_receipt(&self, receipt: DeliveryReceipt);
}

/// Per-conversation bookkeeping: draft text and the peer's typing state.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn update_draft(&self, peer_jid: &str, draft: Option<String>);

    async fn record_peer_chat_state(&self, peer_jid: &str, state: ChatState);
}

pub struct MemoryAccountStore {
    tx: watch::Sender<Option<Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        MemoryAccountStore { tx }
    }

    pub fn with_account(account: Account) -> Self {
        let (tx, _rx) = watch::channel(Some(account));
        MemoryAccountStore { tx }
    }
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn account(&self) -> Option<Account> {
        self.tx.borrow().clone()
    }

    fn account_stream(&self) -> watch::Receiver<Option<Account>> {
        self.tx.subscribe()
    }

    async fn update_account(&self, account: Account) {
        self.tx.send_replace(Some(account));
    }
}

pub struct MemoryConnectionStatusStore {
    tx: watch::Sender<ConnectionStatus>,
}

impl MemoryConnectionStatusStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus::default());
        MemoryConnectionStatusStore { tx }
    }

    pub fn current(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }
}

impl Default for MemoryConnectionStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionStatusStore for MemoryConnectionStatusStore {
    fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    async fn update_status(&self, status: ConnectionStatus) {
        self.tx.send_replace(status);
    }
}

/// Unbounded in-memory outbound queue. Every enqueued message becomes a
/// single-element batch; tests enqueue whole batches directly.
pub struct MemoryOutbox {
    tx: mpsc::UnboundedSender<Vec<Message>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<Message>>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        MemoryOutbox {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn enqueue_batch(&self, batch: Vec<Message>) {
        let _ = self.tx.send(batch);
    }
}

impl Default for MemoryOutbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundMessageStore for MemoryOutbox {
    async fn enqueue(&self, message: Message) {
        let _ = self.tx.send(vec![message]);
    }

    async fn next_batch(&self) -> Option<Vec<Message>> {
        self.rx.lock().await.recv().await
    }
}

pub struct MemoryMessageStore {
    messages: Mutex<Vec<Message>>,
    receipts: Mutex<Vec<DeliveryReceipt>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        MemoryMessageStore {
            messages: Mutex::new(Vec::new()),
            receipts: Mutex::new(Vec::new()),
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    pub async fn receipts(&self) -> Vec<DeliveryReceipt> {
        self.receipts.lock().await.clone()
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn record_message(&self, message: Message) {
        self.messages.lock().await.push(message);
    }

    async fn record_receipt(&self, receipt: DeliveryReceipt) {
        self.receipts.lock().await.push(receipt);
    }
}

pub struct MemoryConversationStore {
    drafts: Mutex<HashMap<String, Option<String>>>,
    peer_states: Mutex<Vec<(String, ChatState)>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        MemoryConversationStore {
            drafts: Mutex::new(HashMap::new()),
            peer_states: Mutex::new(Vec::new()),
        }
    }

    pub async fn draft(&self, peer_jid: &str) -> Option<String> {
        self.drafts.lock().await.get(peer_jid).cloned().flatten()
    }

    pub async fn peer_states(&self) -> Vec<(String, ChatState)> {
        self.peer_states.lock().await.clone()
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn update_draft(&self, peer_jid: &str, draft: Option<String>) {
        self.drafts.lock().await.insert(peer_jid.to_string(), draft);
    }

    async fn record_peer_chat_state(&self, peer_jid: &str, state: ChatState) {
        self.peer_states
            .lock()
            .await
            .push((peer_jid.to_string(), state));
    }
}
