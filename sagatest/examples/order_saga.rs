//! Order Saga Example
//!
//! A walkthrough of the fixture driving a small order-fulfilment saga:
//!
//! 1. `PlaceOrder` opens the workflow: the saga sends a `ShipOrder`
//!    command, replies to the originator, and schedules a payment
//!    reminder.
//! 2. Firing the saga's timeouts escalates the overdue payment.
//! 3. `PaymentReceived` closes the workflow and completes the saga.
//!
//! Each `when*` call is one invocation round: expectations registered
//! before it are verified against everything the saga did during the
//! round, and the fixture then resets for the next one.
//!
//! Run with: `cargo run --example order_saga`

use std::time::Duration;

use sagatest::*;

// ==================== Messages ====================

#[derive(Default)]
struct PlaceOrder {
    order_id: u32,
    amount: u32,
}
impl Message for PlaceOrder {}

#[derive(Default)]
struct PaymentReceived {
    order_id: u32,
}
impl Message for PaymentReceived {}

struct ShipOrder {
    order_id: u32,
}
impl Message for ShipOrder {}

struct OrderAck {
    order_id: u32,
}
impl Message for OrderAck {}

struct PaymentEscalated {
    order_id: u32,
}
impl Message for PaymentEscalated {}

/// Timeout the saga schedules for itself when an order is placed.
#[derive(Default)]
struct PaymentReminder {
    order_id: u32,
}
impl Message for PaymentReminder {}

// ==================== Saga ====================

#[derive(Default)]
struct OrderData {
    originator: String,
    original_message_id: MessageId,
    order_id: u32,
    amount: u32,
    status: String,
}

impl SagaData for OrderData {
    fn originator(&self) -> &str {
        &self.originator
    }
    fn set_originator(&mut self, originator: String) {
        self.originator = originator;
    }
    fn original_message_id(&self) -> MessageId {
        self.original_message_id
    }
    fn set_original_message_id(&mut self, id: MessageId) {
        self.original_message_id = id;
    }
}

#[derive(Default)]
struct OrderSaga {
    data: OrderData,
    completed: bool,
}

impl Saga for OrderSaga {
    type Data = OrderData;

    fn data(&self) -> &OrderData {
        &self.data
    }
    fn data_mut(&mut self) -> &mut OrderData {
        &mut self.data
    }
    fn is_completed(&self) -> bool {
        self.completed
    }
    fn mark_as_complete(&mut self) {
        self.completed = true;
    }
}

impl Handles<PlaceOrder> for OrderSaga {
    async fn handle(&mut self, message: &PlaceOrder, ctx: &mut TestContext<Self>) -> Result {
        self.data.order_id = message.order_id;
        self.data.amount = message.amount;
        self.data.status = "AwaitingPayment".to_string();

        ctx.send(ShipOrder {
            order_id: message.order_id,
        })
        .await?;
        ctx.reply(OrderAck {
            order_id: message.order_id,
        })
        .await?;
        ctx.schedule_timeout(
            PaymentReminder {
                order_id: message.order_id,
            },
            Duration::from_secs(24 * 3600),
        )
        .await
    }
}

impl Handles<PaymentReceived> for OrderSaga {
    async fn handle(&mut self, _message: &PaymentReceived, _ctx: &mut TestContext<Self>) -> Result {
        self.data.status = "Paid".to_string();
        self.mark_as_complete();
        Ok(())
    }
}

impl HandlesTimeout<PaymentReminder> for OrderSaga {
    async fn handle_timeout(
        &mut self,
        message: &PaymentReminder,
        ctx: &mut TestContext<Self>,
    ) -> Result {
        ctx.publish(PaymentEscalated {
            order_id: message.order_id,
        })
        .await
    }
}

// ==================== Test Run ====================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    let mut test = SagaFixture::new(OrderSaga::default());

    // Round 1: placing an order ships it, acknowledges the originator,
    // and schedules a 24h payment reminder.
    test.when_receives_message_from("storefront")
        .expect_send(|m: &ShipOrder, _| m.order_id == 42)
        .expect_reply_to_originator(|m: &OrderAck| m.order_id == 42)
        .expect_schedule_timeout_within(|m: &PaymentReminder, delay| {
            m.order_id == 42 && delay == Duration::from_secs(24 * 3600)
        })
        .when(|m: &mut PlaceOrder| {
            m.order_id = 42;
            m.amount = 1250;
        })
        .await?;
    println!("round 1: order placed, reminder scheduled");

    // Round 2: two days later the reminder fires and escalates.
    test.expect_publish(|m: &PaymentEscalated, _| m.order_id == 42)
        .when_saga_times_out_after(Duration::from_secs(48 * 3600))
        .await?;
    println!("round 2: reminder fired, escalation published");

    // Round 3: payment arrives and the saga completes.
    test.expect_not_send(|_: &ShipOrder, _| true)
        .expect_saga_data(|data: &OrderData| data.status == "Paid" && data.amount == 1250)
        .when(|m: &mut PaymentReceived| m.order_id = 42)
        .await?;
    test.assert_saga_completion_is(true)?;
    println!("round 3: payment received, saga completed");

    Ok(())
}
