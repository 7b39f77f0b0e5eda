// Per-conversation typing state: `Active` on entry, a single `Composing`
// per typing burst, `Paused` after the debounce window, never two pending
// timers for one conversation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::models::{ChatState, Message};
use crate::store::{ConversationStore, OutboundMessageStore};

/// Debounce window after the last keystroke before `Paused` goes out.
pub const PAUSED_DEBOUNCE: Duration = Duration::from_secs(3);

/// Send path for the local user's chat states, implemented by
/// `MessageExchange`.
#[async_trait]
pub trait ChatStateSink: Send + Sync {
    async fn send_chat_state(&self, peer_jid: &str, state: ChatState) -> Result<()>;
}

/// The one current chat state of a conversation, with the cancellable
/// timer that will flip it to `Paused`.
struct CurrentChatState {
    chat_state: ChatState,
    paused_timer: Option<JoinHandle<()>>,
}

impl CurrentChatState {
    fn cancel_pending_paused(&mut self) {
        if let Some(timer) = self.paused_timer.take() {
            timer.abort();
        }
    }

    fn should_send_composing(&self) -> bool {
        self.chat_state != ChatState::Composing
    }
}

/// Drives XEP-0085 notifications for one conversation. A conversation
/// screen feeds it keystrokes and sends; it owns the state cell and the
/// debounce timer exclusively.
pub struct ChatStateCoordinator {
    peer_jid: String,
    sink: Arc<dyn ChatStateSink>,
    conversations: Arc<dyn ConversationStore>,
    outbound: Arc<dyn OutboundMessageStore>,
    debounce: Duration,
    current: Arc<TokioMutex<CurrentChatState>>,
}

impl ChatStateCoordinator {
    pub fn new(
        peer_jid: impl Into<String>,
        sink: Arc<dyn ChatStateSink>,
        conversations: Arc<dyn ConversationStore>,
        outbound: Arc<dyn OutboundMessageStore>,
    ) -> Self {
        ChatStateCoordinator {
            peer_jid: peer_jid.into(),
            sink,
            conversations,
            outbound,
            debounce: PAUSED_DEBOUNCE,
            current: Arc::new(TokioMutex::new(CurrentChatState {
                chat_state: ChatState::Active,
                paused_timer: None,
            })),
        }
    }

    /// Override the debounce window; tests shorten it.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn peer_jid(&self) -> &str {
        &self.peer_jid
    }

    /// Entering the conversation announces `Active` once.
    pub async fn enter_conversation(&self) {
        let mut current = self.current.lock().await;
        current.chat_state = ChatState::Active;
        self.send_state(ChatState::Active).await;
    }

    /// The draft text changed. `Composing` goes out on the first keystroke
    /// of a burst; every keystroke re-arms the `Paused` timer, cancelling
    /// the previous one. The state lock is held across the send so a stale
    /// `Paused` can never land on the wire after a fresh `Composing`.
    pub async fn user_typing(&self, draft: &str) {
        self.conversations
            .update_draft(&self.peer_jid, Some(draft.to_string()))
            .await;

        let mut current = self.current.lock().await;
        current.cancel_pending_paused();
        current.paused_timer = Some(self.spawn_paused_timer());

        if current.should_send_composing() {
            current.chat_state = ChatState::Composing;
            self.send_state(ChatState::Composing).await;
        }
    }

    /// Send the drafted message: drop any pending `Paused` so it cannot
    /// fire after the conversation moved on, enqueue the message for the
    /// exchange, and clear the draft.
    pub async fn send_message(&self, text: &str) {
        self.current.lock().await.cancel_pending_paused();
        self.outbound
            .enqueue(Message::create(text, &self.peer_jid))
            .await;
        self.conversations.update_draft(&self.peer_jid, None).await;
    }

    async fn send_state(&self, state: ChatState) {
        if let Err(e) = self.sink.send_chat_state(&self.peer_jid, state).await {
            warn!(
                "Failed to send {:?} chat state to {}: {}",
                state, self.peer_jid, e
            );
        }
    }

    fn spawn_paused_timer(&self) -> JoinHandle<()> {
        let peer_jid = self.peer_jid.clone();
        let sink = self.sink.clone();
        let current = self.current.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // Aborting the task while it waits for the lock is what keeps a
            // cancelled timer from ever transmitting.
            let mut current = current.lock().await;
            current.chat_state = ChatState::Paused;
            current.paused_timer = None;
            if let Err(e) = sink.send_chat_state(&peer_jid, ChatState::Paused).await {
                warn!("Failed to send Paused chat state to {}: {}", peer_jid, e);
            }
        })
    }
}
