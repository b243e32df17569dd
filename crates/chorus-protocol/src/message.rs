//! The broadcast message schema.

use serde::{Deserialize, Serialize};

/// A chat message as it travels over the wire.
///
/// Both fields are optional. A client may submit `{"content": "hi"}` and the
/// hub fills in the sender; an absent field is treated as empty, never as an
/// error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identity of the client that submitted the message.
    #[serde(rename = "nickname", default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Message {
    /// Create a message with the given content and no sender.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            sender: None,
            content: Some(content.into()),
        }
    }

    /// Set the sender identity, replacing whatever the peer claimed.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Sender identity, or `""` when absent.
    #[must_use]
    pub fn sender(&self) -> &str {
        self.sender.as_deref().unwrap_or_default()
    }

    /// Message text, or `""` when absent.
    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_with_sender() {
        let msg = Message::new("hi").with_sender("alice");
        assert_eq!(msg.sender(), "alice");
        assert_eq!(msg.content(), "hi");
    }

    #[test]
    fn test_sender_is_overwritten() {
        let msg = Message::new("hi").with_sender("mallory").with_sender("bob");
        assert_eq!(msg.sender.as_deref(), Some("bob"));
    }

    #[test]
    fn test_absent_fields_read_as_empty() {
        let msg = Message::default();
        assert_eq!(msg.sender(), "");
        assert_eq!(msg.content(), "");
    }
}
