// Message envelope and naming conventions shared by broker and clients.
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Control tag opening a pipe handshake; `reply_to` carries the connector's
/// private mailbox.
pub const PIPE_INIT_CONNECT: &str = "pipe/initconnect";
/// Control tag acknowledging a pipe handshake; `reply_to` carries the
/// listener's private mailbox.
pub const PIPE_SETUP: &str = "pipe/setup";
/// Control tag terminating a pipe byte stream.
pub const PIPE_CLOSE: &str = "pipe/close";

/// Queues whose name carries this suffix are garbage-collected by the broker
/// and must be declared through the ephemeral path. Case-sensitive.
pub const EPHEMERAL_SUFFIX: &str = "#ephemeral";

/// Well-known prefix for pipe rendezvous queues.
pub const RENDEZVOUS_PREFIX: &str = "pipe:";

/// Message envelope carried through a mailbox.
///
/// `kind` and `reply_to` use the empty string for "unset": a message with an
/// empty `kind` is a data frame, and an empty `reply_to` means the sender
/// expects no reply.
///
/// ```
/// use vega_wire::Message;
///
/// let msg = Message::data(b"payload".as_slice()).with_reply_to("inbox");
/// assert!(msg.kind.is_empty());
/// assert_eq!(msg.reply_to, "inbox");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply_to: String,
    #[serde(default, skip_serializing_if = "Bytes::is_empty")]
    pub body: Bytes,
}

impl Message {
    // Data frames carry no kind tag.
    pub fn data(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn control(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = queue.into();
        self
    }

    pub fn is_data(&self) -> bool {
        self.kind.is_empty()
    }
}

/// True when `name` must be declared through the ephemeral path.
pub fn is_ephemeral_name(name: &str) -> bool {
    name.ends_with(EPHEMERAL_SUFFIX)
}

/// Compose the rendezvous queue name for a pipe.
pub fn rendezvous_queue(name: &str) -> String {
    format!("{RENDEZVOUS_PREFIX}{name}")
}

/// Generate a fresh mailbox name for ephemeral use. Names are unique per
/// call so each endpoint gets a private inbox.
pub fn random_queue_name() -> String {
    format!("mailbox-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_message_has_no_kind() {
        let msg = Message::data(b"hello".as_slice());
        assert!(msg.is_data());
        assert_eq!(msg.body, Bytes::from_static(b"hello"));
        assert!(msg.reply_to.is_empty());
    }

    #[test]
    fn control_message_carries_tag_and_reply() {
        let msg = Message::control(PIPE_INIT_CONNECT).with_reply_to("mailbox-1");
        assert_eq!(msg.kind, "pipe/initconnect");
        assert_eq!(msg.reply_to, "mailbox-1");
        assert!(!msg.is_data());
    }

    #[test]
    fn ephemeral_suffix_is_case_sensitive() {
        assert!(is_ephemeral_name("scratch#ephemeral"));
        assert!(!is_ephemeral_name("scratch#EPHEMERAL"));
        assert!(!is_ephemeral_name("scratch"));
    }

    #[test]
    fn rendezvous_queue_uses_prefix() {
        assert_eq!(rendezvous_queue("builds"), "pipe:builds");
    }

    #[test]
    fn random_queue_names_are_unique() {
        let a = random_queue_name();
        let b = random_queue_name();
        assert_ne!(a, b);
        assert!(a.starts_with("mailbox-"));
    }

    #[test]
    fn envelope_round_trips_through_serde() {
        let msg = Message::control(PIPE_SETUP).with_reply_to("mailbox-2");
        let encoded = serde_json::to_string(&msg).expect("encode");
        let decoded: Message = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, msg);
    }
}
