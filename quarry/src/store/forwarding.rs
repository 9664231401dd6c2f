use crate::collection::{ChangeEventListener, Document, Namespace};
use crate::common::{EventAware, SubscriberRef};
use crate::errors::{QuarryError, QuarryResult};
use crate::store::StoreProvider;
use std::ops::Deref;
use std::sync::Arc;

/// Carries commands to a store living elsewhere.
///
/// A transport returns the remote reply as is, including `{ok: 0}`
/// replies. Failures to reach the remote end are reported as
/// [crate::errors::ErrorKind::TransportError], never as replies.
pub trait TransportProvider: Send + Sync {
    fn send(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document>;

    /// Attaches a listener to the remote change feed.
    fn subscribe(&self, listener: ChangeEventListener) -> QuarryResult<Option<SubscriberRef>>;

    fn unsubscribe(&self, subscriber: SubscriberRef) -> QuarryResult<()>;

    fn close(&self) -> QuarryResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Transport {
    inner: Arc<dyn TransportProvider>,
}

impl Transport {
    pub fn new<T: TransportProvider + 'static>(inner: T) -> Self {
        Transport {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for Transport {
    type Target = Arc<dyn TransportProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A store that forwards every command over a [Transport].
///
/// `{ok: 0}` replies are turned back into errors, so a forwarded command
/// fails the same way it would against a local store.
#[derive(Clone)]
pub struct ForwardingStore {
    name: String,
    transport: Transport,
}

impl ForwardingStore {
    pub fn new(name: &str, transport: Transport) -> Self {
        ForwardingStore {
            name: name.to_string(),
            transport,
        }
    }
}

impl EventAware for ForwardingStore {
    fn subscribe(&self, listener: ChangeEventListener) -> QuarryResult<Option<SubscriberRef>> {
        self.transport.subscribe(listener)
    }

    fn unsubscribe(&self, subscriber: SubscriberRef) -> QuarryResult<()> {
        self.transport.unsubscribe(subscriber)
    }
}

impl StoreProvider for ForwardingStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, namespace: &Namespace, command: Document) -> QuarryResult<Document> {
        let reply = self.transport.send(namespace, &command)?;
        match QuarryError::from_reply(&reply) {
            Some(error) => {
                log::error!("Forwarded command on {} failed: {}", namespace, error);
                Err(error)
            }
            None => Ok(reply),
        }
    }

    fn close(&self) -> QuarryResult<()> {
        self.transport.close()
    }
}
