// Core data model shared by the session, exchange, and conversation layers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The one active account of the client. `status` is the only field that
/// changes after creation, and only the session manager writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub local_part: String,
    pub domain_part: String,
    pub password: String,
    pub status: AccountStatus,
}

impl Account {
    pub fn new(
        local_part: impl Into<String>,
        domain_part: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Account {
            local_part: local_part.into(),
            domain_part: domain_part.into(),
            password: password.into(),
            status: AccountStatus::Unauthenticated,
        }
    }

    /// Bare JID of the account, `local@domain`.
    pub fn jid(&self) -> String {
        format!("{}@{}", self.local_part, self.domain_part)
    }

    pub fn with_status(&self, status: AccountStatus) -> Self {
        Account {
            status,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Unauthenticated,
    Online,
    Unauthorized,
    ServerNotFound,
}

/// Snapshot of the transport state, overwritten wholesale on each transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub availability: bool,
    pub authenticated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// A one-to-one chat message. Immutable once created; ownership passes from
/// the caller to the exchange to the persisted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub peer_jid: String,
    pub body: String,
    pub direction: Direction,
    pub timestamp: u64,
}

impl Message {
    /// Mint an outbound message addressed to `peer_jid`.
    pub fn create(body: impl Into<String>, peer_jid: impl Into<String>) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            peer_jid: peer_jid.into(),
            body: body.into(),
            direction: Direction::Outbound,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    /// An inbound message as delivered by the transport. The stanza id is
    /// kept so the sender's delivery receipt can correlate to it.
    pub fn received(
        id: impl Into<String>,
        peer_jid: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Message {
            id: id.into(),
            peer_jid: peer_jid.into(),
            body: body.into(),
            direction: Direction::Inbound,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}

/// XEP-0085 chat state transmitted to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatState {
    Active,
    Composing,
    Paused,
    Inactive,
    Gone,
}

/// Acknowledgment that a peer received a previously sent message.
/// Transient; forwarded to the message store, never persisted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub from_jid: String,
    pub to_jid: String,
    pub receipt_id: String,
}
