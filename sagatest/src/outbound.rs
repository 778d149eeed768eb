use std::any::{Any, TypeId};
use std::fmt;

use crate::message::{short_type_name, Message};

/// Per-operation options attached to an outbound message.
///
/// For plain sends and publishes all fields are empty. Destination-bearing
/// operations (`send_to_destination`, replies) carry the target endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SendOptions {
    /// Explicit destination endpoint, when one was set.
    pub destination: Option<String>,
}

impl SendOptions {
    /// Options routing the message to a specific endpoint.
    pub fn to_destination(destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
        }
    }
}

/// A record of one outbound operation performed by the saga under test.
///
/// Each `OutboundMessage` holds the message payload (type-erased), its type
/// identity, and the operation's [`SendOptions`]. A saga that sends three
/// messages of the same type produces three entries; expectation matching
/// considers all of them, not just the first.
pub struct OutboundMessage {
    payload: Box<dyn Any>,
    type_id: TypeId,
    type_name: &'static str,
    options: SendOptions,
}

impl OutboundMessage {
    pub(crate) fn new<M: Message>(message: M, options: SendOptions) -> Self {
        Self {
            payload: Box::new(message),
            type_id: TypeId::of::<M>(),
            type_name: short_type_name::<M>(),
            options,
        }
    }

    /// Returns true if the recorded payload is of type `M`.
    #[inline]
    pub fn is<M: Message>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }

    /// Returns the payload as `&M`, or `None` if the type differs.
    #[inline]
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.payload.downcast_ref::<M>()
    }

    /// Short name of the payload type, as used in failure descriptions.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The operation's options.
    #[inline]
    pub fn options(&self) -> &SendOptions {
        &self.options
    }

    /// The destination endpoint, when one was set.
    #[inline]
    pub fn destination(&self) -> Option<&str> {
        self.options.destination.as_deref()
    }

    #[inline]
    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("type_name", &self.type_name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct OrderAccepted {
        amount: u32,
    }
    impl Message for OrderAccepted {}

    struct Unrelated;
    impl Message for Unrelated {}

    #[test]
    fn records_type_identity() {
        let entry = OutboundMessage::new(OrderAccepted { amount: 5 }, SendOptions::default());
        assert!(entry.is::<OrderAccepted>());
        assert!(!entry.is::<Unrelated>());
        assert_eq!(entry.type_name(), "OrderAccepted");
    }

    #[test]
    fn downcast_returns_payload() {
        let entry = OutboundMessage::new(OrderAccepted { amount: 7 }, SendOptions::default());
        assert_eq!(entry.downcast_ref::<OrderAccepted>().unwrap().amount, 7);
        assert!(entry.downcast_ref::<Unrelated>().is_none());
    }

    #[test]
    fn destination_reflects_options() {
        let entry = OutboundMessage::new(Unrelated, SendOptions::to_destination("billing"));
        assert_eq!(entry.destination(), Some("billing"));

        let entry = OutboundMessage::new(Unrelated, SendOptions::default());
        assert_eq!(entry.destination(), None);
    }
}
