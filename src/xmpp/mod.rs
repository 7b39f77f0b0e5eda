// XMPP layer of colloquy: transport boundary, session lifecycle, and
// message exchange, with stanza codecs organized by XEP.

pub mod chat_states;
pub mod connection;
pub mod delivery_receipts;
pub mod exchange;
pub mod session;

pub use connection::{
    Connection, ConnectionConfig, ConnectionEvent, EventSubscription, Transport, XmppTransport,
};
pub use exchange::MessageExchange;
pub use session::{ConnectionProvider, SessionManager};

/// Wire namespaces for the protocol extensions this core speaks.
pub mod ns {
    pub const CHATSTATES: &str = "http://jabber.org/protocol/chatstates";
    pub const RECEIPTS: &str = "urn:xmpp:receipts";
}

pub(crate) const NS_JABBER_CLIENT: &str = "jabber:client";
