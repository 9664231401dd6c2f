//! A store keeping collections in memory.

mod config;
mod memory_backend;

pub use config::*;
pub use memory_backend::*;

use crate::aggregation::Aggregator;
use crate::collection::{ChangeEventListener, Document, Namespace};
use crate::common::{EventAware, SubscriberRef};
use crate::errors::QuarryResult;
use crate::store::{BackedStore, StoreBackend, StoreProvider};

/// A store whose collections live in memory and vanish when it closes.
#[derive(Clone)]
pub struct MemoryStore {
    store: BackedStore,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig, aggregator: Aggregator) -> QuarryResult<MemoryStore> {
        let store = BackedStore::new(&config.name(), StoreBackend::new(MemoryBackend::new()), aggregator);
        for listener in config.event_listeners() {
            store.subscribe(listener)?;
        }
        Ok(MemoryStore { store })
    }
}

impl EventAware for MemoryStore {
    fn subscribe(&self, listener: ChangeEventListener) -> QuarryResult<Option<SubscriberRef>> {
        self.store.subscribe(listener)
    }

    fn unsubscribe(&self, subscriber: SubscriberRef) -> QuarryResult<()> {
        self.store.unsubscribe(subscriber)
    }
}

impl StoreProvider for MemoryStore {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn execute(&self, namespace: &Namespace, command: Document) -> QuarryResult<Document> {
        self.store.execute(namespace, command)
    }

    fn close(&self) -> QuarryResult<()> {
        self.store.close()
    }
}
