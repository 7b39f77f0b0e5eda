// XEP-0085: Chat State Notifications
// https://xmpp.org/extensions/xep-0085.html

use uuid::Uuid;
use xmpp_parsers::message::{Message as XmppMessage, MessageType};
use xmpp_parsers::{Element, Jid};

use super::ns;
use crate::models::ChatState;

const WIRE_NAMES: [(&str, ChatState); 5] = [
    ("active", ChatState::Active),
    ("composing", ChatState::Composing),
    ("paused", ChatState::Paused),
    ("inactive", ChatState::Inactive),
    ("gone", ChatState::Gone),
];

pub fn wire_name(state: ChatState) -> &'static str {
    match state {
        ChatState::Active => "active",
        ChatState::Composing => "composing",
        ChatState::Paused => "paused",
        ChatState::Inactive => "inactive",
        ChatState::Gone => "gone",
    }
}

pub fn from_wire(name: &str) -> Option<ChatState> {
    WIRE_NAMES
        .iter()
        .find(|(wire, _)| *wire == name)
        .map(|(_, state)| *state)
}

/// Extract the chat state notification carried by a message stanza, if any.
pub fn chat_state_of(stanza: &Element) -> Option<ChatState> {
    for (wire, state) in WIRE_NAMES {
        if stanza.has_child(wire, ns::CHATSTATES) {
            return Some(state);
        }
    }
    None
}

/// Build a standalone chat-state notification addressed to `to`.
pub fn chat_state_stanza(to: Jid, state: ChatState) -> Element {
    let mut message = XmppMessage::new(None);
    message.id = Some(Uuid::new_v4().to_string());
    message.to = Some(to);
    message.type_ = MessageType::Chat;
    message
        .payloads
        .push(Element::builder(wire_name(state), ns::CHATSTATES).build());
    message.into()
}
