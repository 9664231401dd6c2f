use crate::collection::ChangeEventListener;
use parking_lot::RwLock;
use std::sync::Arc;

/// Configuration for a memory store.
///
/// # Purpose
/// `MemoryStoreConfig` names the store and collects change listeners that
/// are attached when the store is opened, before any command runs.
///
/// # Characteristics
/// - **Thread-Safe**: Can be safely cloned and shared across threads
/// - **Lightweight Cloning**: Uses Arc internally
///
/// # Usage
/// ```text
/// let config = MemoryStoreConfig::new().with_name("cache");
/// let store = quarry.memory_store(config)?;
/// ```
#[derive(Default, Clone)]
pub struct MemoryStoreConfig {
    inner: Arc<MemoryStoreConfigInner>,
}

impl MemoryStoreConfig {
    /// Creates a configuration with the default name `memory` and no listeners.
    pub fn new() -> MemoryStoreConfig {
        MemoryStoreConfig {
            inner: Arc::new(MemoryStoreConfigInner::new("memory")),
        }
    }

    /// Returns a configuration with another store name.
    pub fn with_name(&self, name: &str) -> MemoryStoreConfig {
        let inner = MemoryStoreConfigInner::new(name);
        for listener in self.event_listeners() {
            inner.add_event_listener(listener);
        }
        MemoryStoreConfig {
            inner: Arc::new(inner),
        }
    }

    pub fn name(&self) -> String {
        self.inner.name.clone()
    }

    /// Registers a change listener attached when the store opens.
    pub fn add_event_listener(&self, listener: ChangeEventListener) {
        self.inner.add_event_listener(listener)
    }

    /// Retrieves all registered change listeners.
    pub fn event_listeners(&self) -> Vec<ChangeEventListener> {
        self.inner.event_listeners()
    }
}

#[derive(Default)]
struct MemoryStoreConfigInner {
    name: String,
    event_listeners: RwLock<Vec<ChangeEventListener>>,
}

impl MemoryStoreConfigInner {
    fn new(name: &str) -> MemoryStoreConfigInner {
        MemoryStoreConfigInner {
            name: name.to_string(),
            event_listeners: RwLock::new(Vec::new()),
        }
    }

    fn add_event_listener(&self, listener: ChangeEventListener) {
        self.event_listeners.write().push(listener)
    }

    fn event_listeners(&self) -> Vec<ChangeEventListener> {
        let listeners = self.event_listeners.read();
        let mut result = Vec::with_capacity(listeners.len());
        result.extend(listeners.iter().cloned());
        result
    }
}
