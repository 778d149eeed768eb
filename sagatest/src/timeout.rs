use std::any::{Any, TypeId};
use std::fmt;
use std::time::{Duration, SystemTime};

use futures_util::future::LocalBoxFuture;

use crate::{
    context::TestContext,
    message::{short_type_name, Message},
    saga::{HandlesTimeout, Saga},
    Result,
};

/// When a scheduled timeout is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutExpiry {
    /// Due after the given delay, relative to the scheduling call.
    Within(Duration),
    /// Due at an absolute wall-clock deadline.
    At(SystemTime),
}

impl TimeoutExpiry {
    /// The expiry as a delay relative to now.
    ///
    /// Absolute deadlines are normalized at schedule time so that fire
    /// selection and ordering work on a single scale; a deadline already
    /// in the past maps to a zero delay.
    pub(crate) fn as_within(&self) -> Duration {
        match self {
            TimeoutExpiry::Within(delay) => *delay,
            TimeoutExpiry::At(at) => at
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
        }
    }
}

type TimeoutFire<S> = Box<
    dyn for<'a> Fn(&'a mut S, &'a dyn Any, &'a mut TestContext<S>) -> LocalBoxFuture<'a, Result>,
>;

fn fire_timeout<'a, S, M>(
    saga: &'a mut S,
    payload: &'a dyn Any,
    ctx: &'a mut TestContext<S>,
) -> LocalBoxFuture<'a, Result>
where
    S: HandlesTimeout<M>,
    M: Message,
{
    Box::pin(async move {
        let message = payload
            .downcast_ref::<M>()
            .expect("scheduled timeout payload matches its recorded type");
        saga.handle_timeout(message, ctx).await
    })
}

/// A timeout the saga has requested but that has not fired yet.
///
/// Unlike ordinary recordings, pending timeouts survive round resets: they
/// are threaded into the next round's context until a
/// [`when_saga_times_out`](crate::SagaFixture::when_saga_times_out) round
/// consumes them. The dispatch thunk back into the saga's
/// [`HandlesTimeout`] implementation is captured when the timeout is
/// scheduled, so firing needs neither a registry nor reflection.
pub struct ScheduledTimeout<S: Saga> {
    payload: Box<dyn Any>,
    type_id: TypeId,
    type_name: &'static str,
    expiry: TimeoutExpiry,
    within: Duration,
    fire: TimeoutFire<S>,
}

impl<S: Saga> ScheduledTimeout<S> {
    pub(crate) fn new<M>(message: M, expiry: TimeoutExpiry) -> Self
    where
        S: HandlesTimeout<M>,
        M: Message,
    {
        Self {
            payload: Box::new(message),
            type_id: TypeId::of::<M>(),
            type_name: short_type_name::<M>(),
            expiry,
            within: expiry.as_within(),
            fire: Box::new(fire_timeout::<S, M>),
        }
    }

    /// Returns true if the timeout payload is of type `M`.
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

    /// When this timeout is due.
    #[inline]
    pub fn expiry(&self) -> &TimeoutExpiry {
        &self.expiry
    }

    /// The due delay relative to the scheduling call.
    #[inline]
    pub fn within(&self) -> Duration {
        self.within
    }

    #[inline]
    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Drive the saga's timeout handler with this timeout's payload.
    pub(crate) async fn fire(self, saga: &mut S, ctx: &mut TestContext<S>) -> Result {
        (self.fire)(saga, self.payload.as_ref(), ctx).await
    }
}

impl<S: Saga> fmt::Debug for ScheduledTimeout<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTimeout")
            .field("type_name", &self.type_name)
            .field("expiry", &self.expiry)
            .field("within", &self.within)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_id::MessageId;

    #[derive(Default)]
    struct Data {
        originator: String,
        original_message_id: MessageId,
    }

    impl crate::SagaData for Data {
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
    struct Probe {
        data: Data,
        completed: bool,
        fired_with: Option<u32>,
    }

    impl Saga for Probe {
        type Data = Data;
        fn data(&self) -> &Data {
            &self.data
        }
        fn data_mut(&mut self) -> &mut Data {
            &mut self.data
        }
        fn is_completed(&self) -> bool {
            self.completed
        }
        fn mark_as_complete(&mut self) {
            self.completed = true;
        }
    }

    struct Reminder(u32);
    impl Message for Reminder {}

    impl HandlesTimeout<Reminder> for Probe {
        async fn handle_timeout(
            &mut self,
            message: &Reminder,
            _ctx: &mut TestContext<Self>,
        ) -> Result {
            self.fired_with = Some(message.0);
            Ok(())
        }
    }

    #[test]
    fn records_type_and_delay() {
        let timeout: ScheduledTimeout<Probe> =
            ScheduledTimeout::new(Reminder(1), TimeoutExpiry::Within(Duration::from_secs(60)));
        assert!(timeout.is::<Reminder>());
        assert_eq!(timeout.type_name(), "Reminder");
        assert_eq!(timeout.within(), Duration::from_secs(60));
        assert_eq!(timeout.downcast_ref::<Reminder>().unwrap().0, 1);
    }

    #[test]
    fn absolute_deadline_normalizes_to_delay() {
        let at = SystemTime::now() + Duration::from_secs(3600);
        let timeout: ScheduledTimeout<Probe> =
            ScheduledTimeout::new(Reminder(2), TimeoutExpiry::At(at));
        // Allow for the wall-clock read between construction and assertion.
        assert!(timeout.within() > Duration::from_secs(3590));
        assert!(timeout.within() <= Duration::from_secs(3600));
    }

    #[test]
    fn past_deadline_is_due_immediately() {
        let at = SystemTime::now() - Duration::from_secs(5);
        let timeout: ScheduledTimeout<Probe> =
            ScheduledTimeout::new(Reminder(3), TimeoutExpiry::At(at));
        assert_eq!(timeout.within(), Duration::ZERO);
    }

    #[tokio::test]
    async fn fire_dispatches_to_the_timeout_handler() {
        let mut saga = Probe::default();
        let mut ctx = TestContext::fresh("client".into());
        let timeout: ScheduledTimeout<Probe> =
            ScheduledTimeout::new(Reminder(42), TimeoutExpiry::Within(Duration::ZERO));

        timeout.fire(&mut saga, &mut ctx).await.unwrap();
        assert_eq!(saga.fired_with, Some(42));
    }
}
