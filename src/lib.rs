// colloquy: session lifecycle and message-exchange core for a federated
// XMPP chat client. Persistence, presentation, and key management stay
// behind the trait seams in `store`.

pub mod conversation;
pub mod error;
pub mod models;
pub mod store;
pub mod xmpp;

// Re-export the main types for convenience
pub use conversation::{ChatStateCoordinator, ChatStateSink, PAUSED_DEBOUNCE};
pub use error::Error;
pub use models::*;
pub use xmpp::{ConnectionProvider, MessageExchange, SessionManager, XmppTransport};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp::{chat_states, delivery_receipts, ns};

    #[test]
    fn test_account_jid_and_status_transitions() {
        let account = Account::new("alice", "example.com", "hunter2");
        assert_eq!(account.jid(), "alice@example.com");
        assert_eq!(account.status, AccountStatus::Unauthenticated);

        let online = account.with_status(AccountStatus::Online);
        assert_eq!(online.status, AccountStatus::Online);
        // Only the status changes
        assert_eq!(online.local_part, account.local_part);
        assert_eq!(online.password, account.password);
    }

    #[test]
    fn test_connection_status_neutral_default() {
        let status = ConnectionStatus::default();
        assert!(!status.availability);
        assert!(!status.authenticated);
    }

    #[test]
    fn test_message_creation() {
        let outbound = Message::create("hello", "bob@example.com");
        assert_eq!(outbound.peer_jid, "bob@example.com");
        assert_eq!(outbound.body, "hello");
        assert_eq!(outbound.direction, Direction::Outbound);
        assert!(!outbound.id.is_empty());

        let other = Message::create("hello", "bob@example.com");
        assert_ne!(outbound.id, other.id, "each message gets a fresh id");

        let inbound = Message::received("m1", "bob@example.com", "hi back");
        assert_eq!(inbound.id, "m1");
        assert_eq!(inbound.direction, Direction::Inbound);
    }

    #[test]
    fn test_chat_state_wire_names_round() {
        for state in [
            ChatState::Active,
            ChatState::Composing,
            ChatState::Paused,
            ChatState::Inactive,
            ChatState::Gone,
        ] {
            let wire = chat_states::wire_name(state);
            assert_eq!(chat_states::from_wire(wire), Some(state));
        }
        assert_eq!(chat_states::from_wire("typing"), None);
    }

    #[test]
    fn test_chat_state_stanza_shape() {
        let stanza =
            chat_states::chat_state_stanza("alice@example.com".parse().unwrap(), ChatState::Composing);
        assert_eq!(stanza.name(), "message");
        assert_eq!(stanza.attr("to"), Some("alice@example.com"));
        assert!(stanza.has_child("composing", ns::CHATSTATES));
        assert!(
            !stanza.children().any(|c| c.name() == "body"),
            "chat state notifications carry no body"
        );
    }

    #[test]
    fn test_chat_message_requests_receipt() {
        let stanza = delivery_receipts::chat_message(
            "bob@example.com".parse().unwrap(),
            "m42".to_string(),
            "ping",
        );
        assert_eq!(stanza.attr("id"), Some("m42"));
        assert!(stanza.has_child("request", ns::RECEIPTS));
        let body = stanza
            .children()
            .find(|c| c.name() == "body")
            .expect("message should carry a body");
        assert_eq!(body.text(), "ping");
    }

    #[test]
    fn test_receipt_ack_correlates_by_id() {
        let ack = delivery_receipts::receipt_ack("bob@example.com".parse().unwrap(), "m42");
        let received = ack
            .get_child("received", ns::RECEIPTS)
            .expect("ack should carry a received element");
        assert_eq!(received.attr("id"), Some("m42"));

        let receipt = delivery_receipts::receipt_of(&ack).expect("ack parses back as a receipt");
        assert_eq!(receipt.receipt_id, "m42");
        assert_eq!(receipt.to_jid, "bob@example.com");
    }

    #[test]
    fn test_error_classification_to_account_status() {
        assert_eq!(
            Error::EndpointUnreachable("dns".into()).account_status(),
            AccountStatus::ServerNotFound
        );
        // Everything that is not an endpoint failure counts as unauthorized
        assert_eq!(
            Error::AuthenticationRejected("bad password".into()).account_status(),
            AccountStatus::Unauthorized
        );
    }
}
