//! Inbound webhook envelope handling for the WhatsApp Cloud API.
//!
//! The provider wraps everything in `entry[0].changes[0].value`; inside
//! that, `messages` carries user messages and `statuses` carries
//! delivery/read receipts. Everything else is non-actionable.

use crate::types::{MessageId, PhoneId};
use crate::whatsapp::{MAX_MESSAGE_CHARS, truncate_chars};
use serde::Deserialize;

/// An actionable event extracted from the webhook envelope.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(InboundText),
    Receipt(StatusReceipt),
}

#[derive(Debug, Clone)]
pub struct InboundText {
    pub message_id: MessageId,
    pub sender: PhoneId,
    /// Provider message type: "text", "button", "interactive".
    pub message_type: String,
    pub text: String,
    /// Provider timestamp, epoch seconds.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct StatusReceipt {
    pub message_id: MessageId,
    pub status: String,
    pub recipient: Option<PhoneId>,
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    statuses: Vec<RawStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    timestamp: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<RawText>,
    #[serde(default)]
    button: Option<RawButton>,
    #[serde(default)]
    interactive: Option<RawInteractive>,
}

#[derive(Debug, Default, Deserialize)]
struct RawText {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawButton {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawInteractive {
    #[serde(default)]
    button_reply: Option<RawReply>,
    #[serde(default)]
    list_reply: Option<RawReply>,
}

#[derive(Debug, Default, Deserialize)]
struct RawReply {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatus {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    recipient_id: String,
}

/// Extract the single actionable event from a webhook payload, if any.
///
/// Returns `None` for anything that is not a non-empty text-bearing
/// message with a sender, and not a status receipt; such payloads are
/// dropped without enqueueing.
pub fn extract_event(payload: &serde_json::Value) -> Option<ChatEvent> {
    let envelope: Envelope = serde_json::from_value(payload.clone()).ok()?;
    let value = envelope
        .entry
        .into_iter()
        .next()?
        .changes
        .into_iter()
        .next()?
        .value;

    if let Some(msg) = value.messages.into_iter().next() {
        let body = message_body(&msg)?;
        if msg.from.trim().is_empty() {
            return None;
        }
        return Some(ChatEvent::Message(InboundText {
            message_id: MessageId::new(msg.id),
            sender: PhoneId::new(msg.from.trim()),
            message_type: msg.kind,
            text: truncate_chars(&body, MAX_MESSAGE_CHARS),
            timestamp: msg.timestamp.trim().parse::<i64>().ok(),
        }));
    }

    if let Some(status) = value.statuses.into_iter().next() {
        if status.id.trim().is_empty() || status.status.trim().is_empty() {
            return None;
        }
        let recipient = if status.recipient_id.trim().is_empty() {
            None
        } else {
            Some(PhoneId::new(status.recipient_id.trim()))
        };
        return Some(ChatEvent::Receipt(StatusReceipt {
            message_id: MessageId::new(status.id),
            status: status.status,
            recipient,
        }));
    }

    None
}

/// The text content of a message: plain body, button label, or the
/// title of an interactive reply. Empty bodies yield `None`.
fn message_body(msg: &RawMessage) -> Option<String> {
    let body = if let Some(text) = &msg.text {
        text.body.clone()
    } else if let Some(button) = &msg.button {
        button.text.clone()
    } else if let Some(interactive) = &msg.interactive {
        interactive
            .button_reply
            .as_ref()
            .or(interactive.list_reply.as_ref())
            .map(|r| r.title.clone())
            .unwrap_or_default()
    } else {
        String::new()
    };

    let body = body.trim().to_string();
    if body.is_empty() { None } else { Some(body) }
}
