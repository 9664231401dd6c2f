use crate::collection::ChangeEventListener;
use crate::common::QUARRY_EVENT;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Components that expose a change feed.
pub trait EventAware {
    /// Attaches a listener to the change feed.
    fn subscribe(&self, listener: ChangeEventListener) -> QuarryResult<Option<SubscriberRef>>;

    /// Detaches a previously attached listener.
    fn unsubscribe(&self, subscriber: SubscriberRef) -> QuarryResult<()>;
}

/// Publishes events to registered listeners.
///
/// Each store owns one bus for its change feed and the bridge owns another
/// onto which it re-publishes the events of every mounted store. Publishing
/// with no listeners attached is a no-op.
///
/// # Example
///
/// ```ignore
/// let event_bus: QuarryEventBus<ChangeEvent, ChangeEventListener> = QuarryEventBus::new();
/// let subscriber = event_bus.register(listener)?;
/// event_bus.publish(event)?;
/// event_bus.deregister(subscriber)?;
/// ```
pub struct QuarryEventBus<E, L> {
    inner: Arc<QuarryEventBusInner<E, L>>,
}

impl<E, L> Clone for QuarryEventBus<E, L> {
    fn clone(&self) -> Self {
        QuarryEventBus {
            inner: self.inner.clone(),
        }
    }
}

impl<E, L> Default for QuarryEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> QuarryEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    pub fn new() -> Self {
        QuarryEventBus {
            inner: Arc::new(QuarryEventBusInner::new()),
        }
    }

    /// Registers an event listener with the bus.
    pub fn register(&self, listener: L) -> QuarryResult<Option<SubscriberRef>> {
        self.inner.register(listener)
    }

    /// Deregisters a previously registered event listener.
    pub fn deregister(&self, subscriber: SubscriberRef) -> QuarryResult<()> {
        self.inner.deregister(subscriber)
    }

    /// Publishes an event to all registered listeners.
    pub fn publish(&self, event: E) -> QuarryResult<()> {
        self.inner.publish(event)
    }

    /// Clears all registered listeners.
    pub fn close(&self) -> QuarryResult<()> {
        self.inner.close()
    }

    pub fn has_listeners(&self) -> bool {
        self.inner.has_listeners()
    }
}

/// Identifies a registered listener so it can be removed again.
pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

struct QuarryEventBusInner<E, L> {
    event_bus: EventBus<E>,
    phantom_data: PhantomData<L>,
}

impl<E, L> QuarryEventBusInner<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn new() -> Self {
        QuarryEventBusInner {
            event_bus: EventBus::new(),
            phantom_data: PhantomData,
        }
    }

    fn register(&self, listener: L) -> QuarryResult<Option<SubscriberRef>> {
        match self.event_bus.subscribe(QUARRY_EVENT, Box::new(listener)) {
            Ok(subscriber) => Ok(Some(SubscriberRef::new(subscriber))),
            Err(e) => Err(Self::quarry_error(e)),
        }
    }

    fn deregister(&self, subscriber: SubscriberRef) -> QuarryResult<()> {
        self.event_bus
            .unsubscribe(QUARRY_EVENT, &subscriber.inner)
            .map_err(Self::quarry_error)
    }

    fn publish(&self, event: E) -> QuarryResult<()> {
        let handler_count = match self.event_bus.get_handler_count(QUARRY_EVENT) {
            Ok(count) => count,
            Err(BasuError::EventTypeNotFOUND) => return Ok(()),
            Err(e) => return Err(Self::quarry_error(e)),
        };

        if handler_count == 0 {
            return Ok(());
        }

        let basu_event = Event::new(event);
        self.event_bus
            .publish(QUARRY_EVENT, &basu_event)
            .map_err(Self::quarry_error)
    }

    fn close(&self) -> QuarryResult<()> {
        self.event_bus.clear().map_err(Self::quarry_error)
    }

    fn has_listeners(&self) -> bool {
        match self.event_bus.get_handler_count(QUARRY_EVENT) {
            Ok(count) => count > 0,
            Err(BasuError::EventTypeNotFOUND) => false,
            Err(e) => {
                log::warn!("Failed to check listeners: {}, defaulting to false", e);
                false
            }
        }
    }

    fn quarry_error(e: BasuError) -> QuarryError {
        let message = match e {
            BasuError::EventTypeNotFOUND => "Event bus error: no listener is registered".to_string(),
            BasuError::MutexPoisoned => "Event bus error: internal mutex poisoned".to_string(),
            BasuError::HandlerError(e) => format!("Event handler error: {}", e),
        };
        log::error!("{}", message);
        QuarryError::new(&message, ErrorKind::InternalError)
    }
}
