use std::any::TypeId;
use std::fmt;

use crate::{
    context::TestContext,
    outbound::OutboundMessage,
    saga::Saga,
    timeout::ScheduledTimeout,
    Error, Result,
};

/// Whether a rule demands that a matching operation occurred, or that
/// none did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Polarity {
    MustOccur,
    MustNotOccur,
}

/// Outbound channel a type-tagged rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Send,
    SendLocal,
    Publish,
    Reply,
}

impl Channel {
    fn recorded<'a, S: Saga>(&self, ctx: &'a TestContext<S>) -> &'a [OutboundMessage] {
        match self {
            Channel::Send => ctx.sent(),
            Channel::SendLocal => ctx.sent_local(),
            Channel::Publish => ctx.published(),
            Channel::Reply => ctx.replied(),
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Channel::Send => "Send",
            Channel::SendLocal => "SendLocal",
            Channel::Publish => "Publish",
            Channel::Reply => "Reply",
        }
    }
}

/// Which expiry family a timeout rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpiryKind {
    Delay,
    At,
}

impl ExpiryKind {
    fn phrase(&self) -> &'static str {
        match self {
            ExpiryKind::Delay => "with a matching delay",
            ExpiryKind::At => "at a matching time",
        }
    }
}

pub(crate) type MessagePredicate = Box<dyn Fn(&OutboundMessage) -> bool>;
pub(crate) type TimeoutPredicate<S> = Box<dyn Fn(&ScheduledTimeout<S>) -> bool>;

/// A single rule about one outbound operation (or about the saga's own
/// state), registered before an invocation round and checked against the
/// round's recordings afterwards.
///
/// Matching is existential: filter the recordings to the rule's tagged
/// type, then look for at least one entry satisfying the predicate.
/// Must-not-occur rules invert the verdict — with an always-true predicate
/// they demand that no operation of the type occurred at all. Rules never
/// mutate the recordings.
pub(crate) enum Expectation<S: Saga> {
    /// Type-tagged rule over one outbound channel.
    Operation {
        channel: Channel,
        polarity: Polarity,
        type_id: TypeId,
        type_name: &'static str,
        predicate: MessagePredicate,
    },
    /// Must-occur send whose predicate also saw the destination.
    SendToDestination {
        type_id: TypeId,
        type_name: &'static str,
        predicate: MessagePredicate,
    },
    /// Must-occur reply routed to the configured originator.
    ReplyToOriginator {
        type_id: TypeId,
        type_name: &'static str,
        predicate: MessagePredicate,
    },
    /// Rule over forward destinations of the current message.
    Forward {
        polarity: Polarity,
        predicate: Box<dyn Fn(&str) -> bool>,
    },
    /// Type-tagged rule over timeouts scheduled during this round.
    /// Timeouts carried over from earlier rounds are not scheduling
    /// operations of this round and never match.
    Timeout {
        kind: ExpiryKind,
        polarity: Polarity,
        type_id: TypeId,
        type_name: &'static str,
        predicate: TimeoutPredicate<S>,
    },
    /// The saga asked to handle the current message later.
    HandleLater,
    /// Predicate over the saga's persisted data; ignores the recordings.
    SagaData {
        predicate: Box<dyn Fn(&S::Data) -> bool>,
    },
}

impl<S: Saga> Expectation<S> {
    /// Check this rule against the round's recordings (and the saga's
    /// data, for [`Expectation::SagaData`]).
    pub(crate) fn verify(&self, ctx: &TestContext<S>, saga: &S) -> Result {
        match self {
            Expectation::Operation {
                channel,
                polarity,
                type_id,
                type_name,
                predicate,
            } => {
                let hit = channel
                    .recorded(ctx)
                    .iter()
                    .filter(|op| op.type_id() == *type_id)
                    .any(|op| predicate(op));
                match polarity {
                    Polarity::MustOccur if !hit => Err(Error::expectation(format!(
                        "expected a {} of `{}`, but no matching message was recorded",
                        channel.noun(),
                        type_name
                    ))),
                    Polarity::MustNotOccur if hit => Err(Error::expectation(format!(
                        "expected no {} of `{}`, but a matching message was recorded",
                        channel.noun(),
                        type_name
                    ))),
                    _ => Ok(()),
                }
            }
            Expectation::SendToDestination {
                type_id,
                type_name,
                predicate,
            } => {
                let hit = ctx
                    .sent()
                    .iter()
                    .filter(|op| op.type_id() == *type_id && op.destination().is_some())
                    .any(|op| predicate(op));
                if hit {
                    Ok(())
                } else {
                    Err(Error::expectation(format!(
                        "expected a Send of `{}` to a matching destination, but none was recorded",
                        type_name
                    )))
                }
            }
            Expectation::ReplyToOriginator {
                type_id,
                type_name,
                predicate,
            } => {
                let originator = ctx.originator();
                let hit = ctx
                    .replied()
                    .iter()
                    .filter(|op| op.type_id() == *type_id)
                    .filter(|op| op.destination() == Some(originator))
                    .any(|op| predicate(op));
                if hit {
                    Ok(())
                } else {
                    Err(Error::expectation(format!(
                        "expected a Reply of `{}` to the originator `{}`, but none was recorded",
                        type_name, originator
                    )))
                }
            }
            Expectation::Forward {
                polarity,
                predicate,
            } => {
                let hit = ctx.forwarded().iter().any(|dest| predicate(dest));
                match polarity {
                    Polarity::MustOccur if !hit => Err(Error::expectation(
                        "expected the current message to be forwarded to a matching \
                         destination, but it was not"
                            .to_string(),
                    )),
                    Polarity::MustNotOccur if hit => Err(Error::expectation(
                        "expected the current message not to be forwarded to a matching \
                         destination, but it was"
                            .to_string(),
                    )),
                    _ => Ok(()),
                }
            }
            Expectation::Timeout {
                kind,
                polarity,
                type_id,
                type_name,
                predicate,
            } => {
                let hit = ctx
                    .scheduled_timeouts()
                    .iter()
                    .filter(|t| t.type_id() == *type_id)
                    .any(|t| predicate(t));
                match polarity {
                    Polarity::MustOccur if !hit => Err(Error::expectation(format!(
                        "expected a timeout of `{}` scheduled {}, but none was recorded",
                        type_name,
                        kind.phrase()
                    ))),
                    Polarity::MustNotOccur if hit => Err(Error::expectation(format!(
                        "expected no timeout of `{}` scheduled {}, but one was recorded",
                        type_name,
                        kind.phrase()
                    ))),
                    _ => Ok(()),
                }
            }
            Expectation::HandleLater => {
                if ctx.handled_later() {
                    Ok(())
                } else {
                    Err(Error::expectation(
                        "expected the current message to be handled later, but \
                         handle_current_message_later was not called"
                            .to_string(),
                    ))
                }
            }
            Expectation::SagaData { predicate } => {
                if predicate(saga.data()) {
                    Ok(())
                } else {
                    Err(Error::expectation(
                        "saga data did not satisfy the expected predicate".to_string(),
                    ))
                }
            }
        }
    }
}

impl<S: Saga> fmt::Debug for Expectation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Operation {
                channel,
                polarity,
                type_name,
                ..
            } => f
                .debug_struct("Operation")
                .field("channel", channel)
                .field("polarity", polarity)
                .field("type_name", type_name)
                .finish_non_exhaustive(),
            Expectation::SendToDestination { type_name, .. } => f
                .debug_struct("SendToDestination")
                .field("type_name", type_name)
                .finish_non_exhaustive(),
            Expectation::ReplyToOriginator { type_name, .. } => f
                .debug_struct("ReplyToOriginator")
                .field("type_name", type_name)
                .finish_non_exhaustive(),
            Expectation::Forward { polarity, .. } => f
                .debug_struct("Forward")
                .field("polarity", polarity)
                .finish_non_exhaustive(),
            Expectation::Timeout {
                kind,
                polarity,
                type_name,
                ..
            } => f
                .debug_struct("Timeout")
                .field("kind", kind)
                .field("polarity", polarity)
                .field("type_name", type_name)
                .finish_non_exhaustive(),
            Expectation::HandleLater => f.write_str("HandleLater"),
            Expectation::SagaData { .. } => f.debug_struct("SagaData").finish_non_exhaustive(),
        }
    }
}

/// Ordered collection of rules accumulated between invocation rounds.
///
/// Order affects only failure reporting, not semantics: rules are
/// independent, and verification stops at the first violated one.
pub(crate) struct ExpectationSet<S: Saga> {
    expectations: Vec<Expectation<S>>,
}

impl<S: Saga> ExpectationSet<S> {
    pub(crate) fn new() -> Self {
        Self {
            expectations: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, expectation: Expectation<S>) {
        self.expectations.push(expectation);
    }

    pub(crate) fn len(&self) -> usize {
        self.expectations.len()
    }

    /// Check every rule in registration order; the first failure aborts
    /// verification of the rest.
    pub(crate) fn verify(&self, ctx: &TestContext<S>, saga: &S) -> Result {
        for expectation in &self.expectations {
            expectation.verify(ctx, saga)?;
        }
        Ok(())
    }
}

impl<S: Saga> fmt::Debug for ExpectationSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectationSet")
            .field("expectations", &self.expectations)
            .finish()
    }
}
