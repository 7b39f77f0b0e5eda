// XEP-0184: Message Delivery Receipts
// https://xmpp.org/extensions/xep-0184.html

use uuid::Uuid;
use xmpp_parsers::message::{Body, Message as XmppMessage, MessageType};
use xmpp_parsers::{Element, Jid};

use super::ns;
use crate::models::DeliveryReceipt;

/// Build a body-only chat message with a receipt request attached.
pub fn chat_message(to: Jid, id: String, body: &str) -> Element {
    let mut message = XmppMessage::new(None);
    message.id = Some(id);
    message.to = Some(to);
    message.type_ = MessageType::Chat;
    message
        .bodies
        .insert(String::new(), Body(body.to_string()));
    message
        .payloads
        .push(Element::builder("request", ns::RECEIPTS).build());
    message.into()
}

/// Build the `received` acknowledgment for an inbound message id.
pub fn receipt_ack(to: Jid, receipt_id: &str) -> Element {
    let mut receipt = XmppMessage::new(None);
    receipt.id = Some(Uuid::new_v4().to_string());
    receipt.to = Some(to);
    receipt.payloads.push(
        Element::builder("received", ns::RECEIPTS)
            .attr("id", receipt_id)
            .build(),
    );
    receipt.into()
}

/// Extract a delivery receipt from an inbound message stanza, if present.
pub fn receipt_of(stanza: &Element) -> Option<DeliveryReceipt> {
    let received = stanza.get_child("received", ns::RECEIPTS)?;
    let receipt_id = received.attr("id")?;
    Some(DeliveryReceipt {
        from_jid: stanza.attr("from").unwrap_or_default().to_string(),
        to_jid: stanza.attr("to").unwrap_or_default().to_string(),
        receipt_id: receipt_id.to_string(),
    })
}

/// Whether the sender asked for a delivery receipt.
pub fn receipt_requested(stanza: &Element) -> bool {
    stanza.has_child("request", ns::RECEIPTS)
}
