use std::future::Future;

use crate::{context::TestContext, message::Message, message_id::MessageId, Result};

/// Persisted state container of a saga.
///
/// Every saga owns one data instance, default-constructed by the saga type
/// itself. The originator fields exist for reply routing: the fixture
/// pre-populates them (a synthetic originator and a fresh [`MessageId`])
/// before any test interaction, and
/// [`when_receives_message_from`](crate::SagaFixture::when_receives_message_from)
/// overrides the originator explicitly.
pub trait SagaData: Default + 'static {
    /// Endpoint of the party whose message started this saga.
    fn originator(&self) -> &str;

    fn set_originator(&mut self, originator: String);

    /// Id of the message that started this saga.
    fn original_message_id(&self) -> MessageId;

    fn set_original_message_id(&mut self, id: MessageId);
}

/// A long-running, message-driven workflow under test.
///
/// Sagas are ordinary structs: they own their [`SagaData`] and a completion
/// flag, and implement [`Handles<M>`] for every inbound message type and
/// [`HandlesTimeout<M>`] for every timeout type they process. The test
/// author constructs the saga (injecting whatever collaborators it needs)
/// and hands it to [`SagaFixture::new`](crate::SagaFixture::new).
///
/// # Example
///
/// ```ignore
/// struct ShippingSaga {
///     data: ShippingData,
///     completed: bool,
/// }
///
/// impl Saga for ShippingSaga {
///     type Data = ShippingData;
///
///     fn data(&self) -> &ShippingData { &self.data }
///     fn data_mut(&mut self) -> &mut ShippingData { &mut self.data }
///     fn is_completed(&self) -> bool { self.completed }
///     fn mark_as_complete(&mut self) { self.completed = true; }
/// }
/// ```
pub trait Saga: Sized + 'static {
    type Data: SagaData;

    fn data(&self) -> &Self::Data;

    fn data_mut(&mut self) -> &mut Self::Data;

    /// Whether the saga has declared itself finished.
    fn is_completed(&self) -> bool;

    /// Declare the workflow finished. Handlers call this themselves.
    fn mark_as_complete(&mut self);
}

/// Capability contract: this saga processes inbound messages of type `M`.
///
/// Resolved at compile time via generic dispatch — the fixture's
/// [`when`](crate::SagaFixture::when) only accepts message types the saga
/// formally handles. Implement with a plain `async fn`:
///
/// ```ignore
/// impl Handles<PlaceOrder> for ShippingSaga {
///     async fn handle(&mut self, message: &PlaceOrder, ctx: &mut TestContext<Self>) -> Result {
///         ctx.send(ShipOrder { order_id: message.order_id }).await
///     }
/// }
/// ```
pub trait Handles<M: Message>: Saga {
    fn handle(
        &mut self,
        message: &M,
        ctx: &mut TestContext<Self>,
    ) -> impl Future<Output = Result>;
}

/// Capability contract: this saga processes timeouts of type `M`.
///
/// Required both to schedule a timeout
/// ([`TestContext::schedule_timeout`](crate::TestContext::schedule_timeout))
/// and to fire it later
/// ([`when_saga_times_out`](crate::SagaFixture::when_saga_times_out)); the
/// dispatch thunk is captured at schedule time, where `M` is statically
/// known, so no runtime reflection is involved.
pub trait HandlesTimeout<M: Message>: Saga {
    fn handle_timeout(
        &mut self,
        message: &M,
        ctx: &mut TestContext<Self>,
    ) -> impl Future<Output = Result>;
}
