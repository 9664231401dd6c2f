use crate::collection::{ChangeEventListener, Document, Namespace};
use crate::common::{EventAware, SubscriberRef};
use crate::errors::QuarryResult;
use std::ops::Deref;
use std::sync::Arc;

/// A component that executes commands against namespaces and publishes a
/// change feed.
///
/// # Purpose
/// This is the one capability interface the bridge dispatches to. Every
/// store variant implements it: stores over a [crate::store::StoreBackend]
/// (memory, files) and stores forwarding to a remote endpoint.
///
/// # Commands
/// A command is a document whose first key names it, such as
/// `{find: "posts", filter: {...}}`. The reply is `{ok: 1, ...}` on success.
/// Failures are returned as errors, never as `{ok: 0}` replies.
///
/// # Thread Safety
/// Implementers must be `Send + Sync`. Commands on different namespaces may
/// run concurrently.
pub trait StoreProvider: EventAware + Send + Sync {
    /// A short name used in logs.
    fn name(&self) -> &str;

    /// Executes a command against a namespace.
    fn execute(&self, namespace: &Namespace, command: Document) -> QuarryResult<Document>;

    /// Releases cursors, listeners and any claimed resources.
    fn close(&self) -> QuarryResult<()>;
}

/// A cloneable handle to a [StoreProvider].
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn StoreProvider>,
}

impl Store {
    pub fn new<T: StoreProvider + 'static>(inner: T) -> Self {
        Store { inner: Arc::new(inner) }
    }

    /// Whether two handles point at the same store.
    pub fn same_as(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for Store {
    type Target = Arc<dyn StoreProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl EventAware for Store {
    fn subscribe(&self, listener: ChangeEventListener) -> QuarryResult<Option<SubscriberRef>> {
        self.inner.subscribe(listener)
    }

    fn unsubscribe(&self, subscriber: SubscriberRef) -> QuarryResult<()> {
        self.inner.unsubscribe(subscriber)
    }
}
