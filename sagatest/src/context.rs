use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::{
    message::Message,
    outbound::{OutboundMessage, SendOptions},
    saga::{HandlesTimeout, Saga},
    timeout::{ScheduledTimeout, TimeoutExpiry},
    Result,
};

/// Fake execution context handed to saga handlers during a test.
///
/// Stands in for the real message-dispatch infrastructure: every outbound
/// operation the saga performs during one invocation round is recorded
/// here instead of hitting a broker. The fixture reads the recordings to
/// verify expectations, then replaces the context for the next round.
///
/// Handlers use it the way they would use the real bus:
///
/// ```ignore
/// async fn handle(&mut self, message: &PlaceOrder, ctx: &mut TestContext<Self>) -> Result {
///     ctx.publish(OrderPlaced { id: message.id }).await?;
///     ctx.schedule_timeout(PaymentOverdue { id: message.id }, Duration::from_secs(3600))
///         .await
/// }
/// ```
///
/// # Note
///
/// The context is exclusively owned by one fixture and is `!Send` by
/// design — this is a single-threaded verification harness.
pub struct TestContext<S: Saga> {
    sent: Vec<OutboundMessage>,
    sent_local: Vec<OutboundMessage>,
    published: Vec<OutboundMessage>,
    replied: Vec<OutboundMessage>,
    forwarded: Vec<String>,
    timeouts: Vec<ScheduledTimeout<S>>,
    carried_timeouts: Vec<ScheduledTimeout<S>>,
    handle_later: bool,
    headers: HashMap<String, String>,
    originator: String,
}

impl<S: Saga> TestContext<S> {
    pub(crate) fn fresh(originator: String) -> Self {
        Self {
            sent: Vec::new(),
            sent_local: Vec::new(),
            published: Vec::new(),
            replied: Vec::new(),
            forwarded: Vec::new(),
            timeouts: Vec::new(),
            carried_timeouts: Vec::new(),
            handle_later: false,
            headers: HashMap::new(),
            originator,
        }
    }

    // ==================== Saga-Facing Operations ====================

    /// Send a message on the bus.
    pub async fn send<M: Message>(&mut self, message: M) -> Result {
        self.send_with_options(message, SendOptions::default()).await
    }

    /// Send a message with explicit per-operation options.
    pub async fn send_with_options<M: Message>(
        &mut self,
        message: M,
        options: SendOptions,
    ) -> Result {
        self.sent.push(OutboundMessage::new(message, options));
        Ok(())
    }

    /// Send a message to an explicit destination endpoint.
    pub async fn send_to_destination<M: Message>(
        &mut self,
        message: M,
        destination: impl Into<String>,
    ) -> Result {
        self.send_with_options(message, SendOptions::to_destination(destination))
            .await
    }

    /// Send a message to this endpoint's local queue.
    pub async fn send_local<M: Message>(&mut self, message: M) -> Result {
        self.sent_local
            .push(OutboundMessage::new(message, SendOptions::default()));
        Ok(())
    }

    /// Publish an event to all subscribers.
    pub async fn publish<M: Message>(&mut self, message: M) -> Result {
        self.published
            .push(OutboundMessage::new(message, SendOptions::default()));
        Ok(())
    }

    /// Reply to the originator of the current message.
    ///
    /// The recorded entry carries the configured originator as its
    /// destination, so reply-to-originator expectations check a concrete
    /// endpoint rather than a convention.
    pub async fn reply<M: Message>(&mut self, message: M) -> Result {
        let options = SendOptions::to_destination(self.originator.clone());
        self.replied.push(OutboundMessage::new(message, options));
        Ok(())
    }

    /// Forward the message currently being handled to another endpoint.
    pub async fn forward_current_message_to(
        &mut self,
        destination: impl Into<String>,
    ) -> Result {
        self.forwarded.push(destination.into());
        Ok(())
    }

    /// Request a timeout delivered back to this saga after `within`.
    ///
    /// Requires the saga to formally handle the timeout type; the dispatch
    /// into [`HandlesTimeout::handle_timeout`] is captured here, while `M`
    /// is statically known.
    pub async fn schedule_timeout<M>(&mut self, message: M, within: Duration) -> Result
    where
        S: HandlesTimeout<M>,
        M: Message,
    {
        self.timeouts
            .push(ScheduledTimeout::new(message, TimeoutExpiry::Within(within)));
        Ok(())
    }

    /// Request a timeout delivered back to this saga at an absolute time.
    pub async fn schedule_timeout_at<M>(&mut self, message: M, at: SystemTime) -> Result
    where
        S: HandlesTimeout<M>,
        M: Message,
    {
        self.timeouts
            .push(ScheduledTimeout::new(message, TimeoutExpiry::At(at)));
        Ok(())
    }

    /// Defer the current message: put it back at the end of the queue.
    pub async fn handle_current_message_later(&mut self) -> Result {
        self.handle_later = true;
        Ok(())
    }

    // ==================== Inbound Headers ====================

    /// Value of an incoming header, if present.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// All incoming headers of the current message.
    pub fn incoming_headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    // ==================== Recording Access ====================

    /// Messages sent during this round.
    pub fn sent(&self) -> &[OutboundMessage] {
        &self.sent
    }

    /// Messages sent to the local queue during this round.
    pub fn sent_local(&self) -> &[OutboundMessage] {
        &self.sent_local
    }

    /// Events published during this round.
    pub fn published(&self) -> &[OutboundMessage] {
        &self.published
    }

    /// Replies recorded during this round.
    pub fn replied(&self) -> &[OutboundMessage] {
        &self.replied
    }

    /// Destinations the current message was forwarded to.
    pub fn forwarded(&self) -> &[String] {
        &self.forwarded
    }

    /// Timeouts the saga scheduled during this round.
    ///
    /// Timeouts carried over from earlier rounds live in
    /// [`carried_timeouts`](Self::carried_timeouts); scheduling
    /// expectations only ever look at this round's entries.
    pub fn scheduled_timeouts(&self) -> &[ScheduledTimeout<S>] {
        &self.timeouts
    }

    /// Timeouts carried over from earlier rounds, still pending.
    pub fn carried_timeouts(&self) -> &[ScheduledTimeout<S>] {
        &self.carried_timeouts
    }

    /// Whether the saga asked to handle the current message later.
    pub fn handled_later(&self) -> bool {
        self.handle_later
    }

    /// The originator endpoint replies are routed to.
    pub fn originator(&self) -> &str {
        &self.originator
    }

    // ==================== Fixture Plumbing ====================

    pub(crate) fn set_header(&mut self, key: String, value: String) {
        self.headers.insert(key, value);
    }

    pub(crate) fn set_originator(&mut self, originator: String) {
        self.originator = originator;
    }

    pub(crate) fn take_headers(&mut self) -> HashMap<String, String> {
        std::mem::take(&mut self.headers)
    }

    pub(crate) fn restore_headers(&mut self, headers: HashMap<String, String>) {
        self.headers = headers;
    }

    /// Remove every pending timeout, carried and this-round, in
    /// scheduling order.
    pub(crate) fn take_timeouts(&mut self) -> Vec<ScheduledTimeout<S>> {
        let mut all = std::mem::take(&mut self.carried_timeouts);
        all.append(&mut self.timeouts);
        all
    }

    /// Seed the carryover set for a new round. These entries stay
    /// invisible to scheduling expectations.
    pub(crate) fn restore_timeouts(&mut self, timeouts: Vec<ScheduledTimeout<S>>) {
        self.carried_timeouts = timeouts;
    }

    /// Remove and return every pending timeout due within `elapsed`
    /// (inclusive), carried entries included; `None` selects all.
    /// Scheduling order is preserved, carried entries first.
    pub(crate) fn take_due_timeouts(
        &mut self,
        elapsed: Option<Duration>,
    ) -> Vec<ScheduledTimeout<S>> {
        let mut due = Vec::new();
        let mut carried = Vec::new();
        for timeout in self.carried_timeouts.drain(..) {
            match elapsed {
                Some(bound) if timeout.within() > bound => carried.push(timeout),
                _ => due.push(timeout),
            }
        }
        let mut remaining = Vec::new();
        for timeout in self.timeouts.drain(..) {
            match elapsed {
                Some(bound) if timeout.within() > bound => remaining.push(timeout),
                _ => due.push(timeout),
            }
        }
        self.carried_timeouts = carried;
        self.timeouts = remaining;
        due
    }
}

impl<S: Saga> fmt::Debug for TestContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("sent", &self.sent.len())
            .field("sent_local", &self.sent_local.len())
            .field("published", &self.published.len())
            .field("replied", &self.replied.len())
            .field("forwarded", &self.forwarded.len())
            .field("timeouts", &self.timeouts.len())
            .field("carried_timeouts", &self.carried_timeouts.len())
            .field("handle_later", &self.handle_later)
            .field("originator", &self.originator)
            .finish_non_exhaustive()
    }
}
