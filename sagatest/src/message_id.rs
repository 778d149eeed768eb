use std::fmt;
use uuid::Uuid;

/// Unique identifier for a message.
///
/// The fixture seeds a saga's `original_message_id` with a fresh
/// `MessageId` before any test interaction, so reply-correlation
/// assertions have a sensible default without explicit setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageId(Uuid);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        MessageId::new()
    }
}
