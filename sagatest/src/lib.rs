//! # Sagatest
//!
//! A unit-testing harness for message-driven sagas.
//!
//! Sagatest lets you drive a long-running, message-driven workflow in
//! complete isolation: feed it inbound messages and timeouts, and assert
//! on the outbound operations it performs — sends, publishes, replies,
//! forwards, and scheduled timeouts — without a broker, network, or
//! persistence layer. Everything runs synchronously from the test's point
//! of view: the fixture drives each handler to completion before checking
//! a single expectation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sagatest::*;
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct PlaceOrder { order_id: u32 }
//! impl Message for PlaceOrder {}
//!
//! struct ShipOrder { order_id: u32 }
//! impl Message for ShipOrder {}
//!
//! #[derive(Default)]
//! struct OrderData {
//!     originator: String,
//!     original_message_id: MessageId,
//! }
//!
//! impl SagaData for OrderData {
//!     fn originator(&self) -> &str { &self.originator }
//!     fn set_originator(&mut self, o: String) { self.originator = o; }
//!     fn original_message_id(&self) -> MessageId { self.original_message_id }
//!     fn set_original_message_id(&mut self, id: MessageId) { self.original_message_id = id; }
//! }
//!
//! #[derive(Default)]
//! struct OrderSaga { data: OrderData, completed: bool }
//!
//! impl Saga for OrderSaga {
//!     type Data = OrderData;
//!     fn data(&self) -> &OrderData { &self.data }
//!     fn data_mut(&mut self) -> &mut OrderData { &mut self.data }
//!     fn is_completed(&self) -> bool { self.completed }
//!     fn mark_as_complete(&mut self) { self.completed = true; }
//! }
//!
//! impl Handles<PlaceOrder> for OrderSaga {
//!     async fn handle(&mut self, m: &PlaceOrder, ctx: &mut TestContext<Self>) -> Result {
//!         ctx.send(ShipOrder { order_id: m.order_id }).await
//!     }
//! }
//!
//! # async fn run() -> Result {
//! let mut test = SagaFixture::new(OrderSaga::default());
//! test.expect_send(|m: &ShipOrder, _| m.order_id == 7)
//!     .when(|m: &mut PlaceOrder| m.order_id = 7)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Marker trait for message types |
//! | [`Saga`] | Trait for the workflow under test (data + completion flag) |
//! | [`SagaData`] | The saga's persisted state container |
//! | [`Handles<M>`] / [`HandlesTimeout<M>`] | Capability contracts for message and timeout handlers |
//! | [`TestContext`] | Fake execution context recording outbound operations |
//! | [`SagaFixture`] | Fluent builder driving invocation rounds and verifying expectations |
//! | [`SendOptions`] / [`OutboundMessage`] | Per-operation options and recorded entries |
//! | [`TimeoutExpiry`] / [`ScheduledTimeout`] | Pending timeouts carried across rounds |
//!
//! ## Rounds
//!
//! A test is a sequence of rounds. In each round you register expectations
//! and then invoke the saga once (`when`, `when_handling`,
//! `when_handling_timeout`) or fire its due timeouts
//! (`when_saga_times_out`). Verification is fail-fast: the first violated
//! expectation raises [`Error::Expectation`] out of the driving call.
//! Expectations and recordings reset after every round; pending scheduled
//! timeouts carry forward until a timeout-firing round consumes them.
//!
//! ## Features
//!
//! - **`serde`** - serialization derives on [`MessageId`] and [`SendOptions`]
//!
//! # Note
//!
//! Predicates and dispatch thunks are `!Send` by design — this is a
//! single-threaded verification harness, not a runtime.

mod context;
mod error;
mod expectation;
mod fixture;
mod message;
mod message_id;
mod outbound;
mod saga;
mod timeout;

pub use context::TestContext;
pub use error::Error;
pub use fixture::{SagaFixture, DEFAULT_ORIGINATOR};
pub use message::Message;
pub use message_id::MessageId;
pub use outbound::{OutboundMessage, SendOptions};
pub use saga::{Handles, HandlesTimeout, Saga, SagaData};
pub use timeout::{ScheduledTimeout, TimeoutExpiry};

/// Convenience alias for `Result<T, sagatest::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
