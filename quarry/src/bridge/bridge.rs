use crate::bridge::{Handler, Middleware};
use crate::collection::{ChangeEvent, ChangeEventListener, Document, Namespace};
use crate::common::{EventAware, QuarryEventBus, SubscriberRef, WILDCARD_DATABASE};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::store::{command_collection, Store};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

type DatabaseNames = SmallVec<[String; 2]>;

/// The single entry point routing commands to stores.
///
/// # Routing
/// Each store is mounted under one or more database names. A command on
/// `db.coll` goes to the store mounted as `db`, else to the one mounted as
/// `*`, else fails with [ErrorKind::NoStoreForNamespace].
///
/// # Middleware
/// Middleware wraps the routing handler. The first one registered is the
/// outermost: it sees the command first and the reply last.
///
/// # Change feed
/// The change feed of every mounted store is subscribed once when the
/// bridge is built and its events are re-published on the bridge's own
/// feed unchanged.
///
/// # Usage
/// ```text
/// let bridge = Bridge::builder()
///     .mount(["site", "drafts"], file_store)
///     .mount(["*"], memory_store)
///     .middleware(logging())
///     .build()?;
/// let reply = bridge.dispatch(&Namespace::new("site", "posts"), doc! { find: "posts" })?;
/// ```
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Executes a command against a namespace.
    pub fn dispatch(&self, namespace: &Namespace, command: Document) -> QuarryResult<Document> {
        (self.inner.handler)(namespace, command)
    }

    /// Executes a command against a database, taking the collection from
    /// the command itself.
    pub fn run_command(&self, database: &str, command: Document) -> QuarryResult<Document> {
        let collection = command_collection(&command)?;
        self.dispatch(&Namespace::new(database, &collection), command)
    }

    /// The store a database routes to.
    pub fn resolve(&self, database: &str) -> QuarryResult<Store> {
        resolve(&self.inner.stores, database)
    }

    /// Names under which stores are mounted.
    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Detaches from every store's change feed and closes the stores.
    pub fn close(&self) -> QuarryResult<()> {
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock());
        for (store, subscriber) in subscriptions {
            store.unsubscribe(subscriber)?;
        }
        for store in unique_stores(&self.inner.stores) {
            store.close()?;
        }
        self.inner.event_bus.close()
    }
}

impl EventAware for Bridge {
    fn subscribe(&self, listener: ChangeEventListener) -> QuarryResult<Option<SubscriberRef>> {
        self.inner.event_bus.register(listener)
    }

    fn unsubscribe(&self, subscriber: SubscriberRef) -> QuarryResult<()> {
        self.inner.event_bus.deregister(subscriber)
    }
}

struct BridgeInner {
    stores: Arc<HashMap<String, Store>>,
    handler: Handler,
    event_bus: QuarryEventBus<ChangeEvent, ChangeEventListener>,
    subscriptions: Mutex<Vec<(Store, SubscriberRef)>>,
}

/// Collects mounts and middleware, validating them at [BridgeBuilder::build].
pub struct BridgeBuilder {
    mounts: Vec<(DatabaseNames, Store)>,
    middleware: Vec<Middleware>,
}

impl BridgeBuilder {
    fn new() -> Self {
        BridgeBuilder {
            mounts: Vec::new(),
            middleware: Vec::new(),
        }
    }

    /// Mounts a store under database names; `*` mounts it as the fallback.
    pub fn mount<I, S>(mut self, databases: I, store: Store) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = databases.into_iter().map(|s| s.as_ref().to_string()).collect();
        self.mounts.push((names, store));
        self
    }

    /// Adds a middleware inside the ones added before it.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> QuarryResult<Bridge> {
        let mut stores: HashMap<String, Store> = HashMap::new();
        for (names, store) in self.mounts {
            if names.is_empty() {
                log::error!("Store {} mounted without a database name", store.name());
                return Err(QuarryError::new(
                    &format!("Store {} must be mounted under at least one name", store.name()),
                    ErrorKind::InvalidArgument,
                ));
            }
            for name in names {
                if name.is_empty() {
                    log::error!("Empty database name for store {}", store.name());
                    return Err(QuarryError::new(
                        "A database name cannot be empty",
                        ErrorKind::InvalidArgument,
                    ));
                }
                if stores.contains_key(&name) {
                    log::error!("Database name {} is mounted twice", name);
                    return Err(QuarryError::new(
                        &format!("A store is already mounted as '{}'", name),
                        ErrorKind::InvalidArgument,
                    ));
                }
                stores.insert(name, store.clone());
            }
        }
        let stores = Arc::new(stores);

        let event_bus: QuarryEventBus<ChangeEvent, ChangeEventListener> = QuarryEventBus::new();
        let mut subscriptions = Vec::new();
        for store in unique_stores(&stores) {
            let bus = event_bus.clone();
            let forward = ChangeEventListener::new(move |event: ChangeEvent| bus.publish(event));
            if let Some(subscriber) = store.subscribe(forward)? {
                subscriptions.push((store.clone(), subscriber));
            }
        }

        let routes = stores.clone();
        let route: Handler = Arc::new(move |namespace: &Namespace, command: Document| {
            let store = resolve(&routes, namespace.database())?;
            store.execute(namespace, command)
        });
        let handler = self
            .middleware
            .iter()
            .rev()
            .fold(route, |next, middleware| middleware(next));

        log::debug!("Bridge built with {} mount(s) and {} middleware", stores.len(), self.middleware.len());
        Ok(Bridge {
            inner: Arc::new(BridgeInner {
                stores,
                handler,
                event_bus,
                subscriptions: Mutex::new(subscriptions),
            }),
        })
    }
}

fn resolve(stores: &HashMap<String, Store>, database: &str) -> QuarryResult<Store> {
    if let Some(store) = stores.get(database).or_else(|| stores.get(WILDCARD_DATABASE)) {
        return Ok(store.clone());
    }
    log::error!("No store for database {}", database);
    Err(QuarryError::new(
        &format!("No store is mounted for database '{}'", database),
        ErrorKind::NoStoreForNamespace,
    ))
}

fn unique_stores(stores: &HashMap<String, Store>) -> Vec<Store> {
    let mut unique: Vec<Store> = Vec::new();
    for store in stores.values() {
        if !unique.iter().any(|seen| seen.same_as(store)) {
            unique.push(store.clone());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_aggregator;
    use crate::bridge::middleware;
    use crate::collection::OperationType;
    use crate::doc;
    use crate::store::memory::{MemoryStore, MemoryStoreConfig};
    use crate::store::cursor_batch;

    fn memory(name: &str) -> Store {
        Store::new(MemoryStore::new(MemoryStoreConfig::new().with_name(name), test_aggregator()).unwrap())
    }

    #[test]
    fn test_exact_then_wildcard_routing() {
        let exact = memory("exact");
        let fallback = memory("fallback");
        let bridge = Bridge::builder()
            .mount(["db1"], exact.clone())
            .mount(["*"], fallback.clone())
            .build()
            .unwrap();

        assert!(bridge.resolve("db1").unwrap().same_as(&exact));
        assert!(bridge.resolve("other").unwrap().same_as(&fallback));
        assert_eq!(bridge.databases(), vec!["*", "db1"]);
    }

    #[test]
    fn test_no_store_for_namespace() {
        let bridge = Bridge::builder().mount(["db1"], memory("m")).build().unwrap();
        let err = bridge
            .dispatch(&Namespace::new("db2", "x"), doc! { find: "x" })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NoStoreForNamespace);
    }

    #[test]
    fn test_duplicate_mount_is_rejected() {
        let result = Bridge::builder()
            .mount(["db"], memory("a"))
            .mount(["db"], memory("b"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_run_command_derives_collection() {
        let bridge = Bridge::builder().mount(["*"], memory("m")).build().unwrap();
        bridge
            .run_command("db", doc! { insert: "posts", documents: [{ _id: 1 }] })
            .unwrap();
        let reply = bridge.run_command("db", doc! { find: "posts" }).unwrap();
        assert_eq!(cursor_batch(&reply), vec![doc! { _id: 1 }]);
    }

    #[test]
    fn test_middleware_onion_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let layer = |label: &'static str, trace: Arc<Mutex<Vec<String>>>| {
            middleware::middleware(move |namespace, command, next| {
                trace.lock().push(format!("{} in", label));
                let result = next(namespace, command);
                trace.lock().push(format!("{} out", label));
                result
            })
        };
        let bridge = Bridge::builder()
            .mount(["*"], memory("m"))
            .middleware(layer("outer", trace.clone()))
            .middleware(layer("inner", trace.clone()))
            .build()
            .unwrap();

        bridge.run_command("db", doc! { count: "c" }).unwrap();
        assert_eq!(*trace.lock(), vec!["outer in", "inner in", "inner out", "outer out"]);
    }

    #[test]
    fn test_change_feed_is_forwarded_once_per_store() {
        let shared = memory("shared");
        let bridge = Bridge::builder()
            .mount(["a", "b"], shared)
            .build()
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bridge
            .subscribe(ChangeEventListener::new(move |event: ChangeEvent| {
                sink.lock().push((event.ns().to_string(), event.operation_type()));
                Ok(())
            }))
            .unwrap();

        bridge
            .run_command("b", doc! { insert: "c", documents: [{ _id: 1 }] })
            .unwrap();
        awaitility::at_most(std::time::Duration::from_secs(5)).until(|| events.lock().len() == 2);
        assert_eq!(
            *events.lock(),
            vec![
                ("b.c".to_string(), OperationType::Create),
                ("b.c".to_string(), OperationType::Insert)
            ]
        );
    }
}
