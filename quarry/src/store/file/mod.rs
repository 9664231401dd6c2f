//! A store keeping collections as files below a root directory.
//!
//! # Files
//!
//! How a collection maps onto files is described by its segment: a format
//! (`json`, `yaml`, `text` or one contributed by a plugin) and a layout.
//! With the default json format and directory layout, the document
//! `{_id: "p1", title: "t"}` of `site.posts` is the file
//! `site/posts/p1.json` holding `{"title":"t"}`.
//!
//! ```text
//! let config = FileStoreConfig::new("/srv/content");
//! let store = quarry.file_store(config)?;
//! store.execute(&Namespace::new("site", "posts"), doc! {
//!     create: "posts",
//!     format: { yaml: { frontMatter: true } },
//!     layout: { directory: { extension: ".md" } }
//! })?;
//! ```
//!
//! # Ownership
//!
//! A file store assumes it is the only writer below its root. Two stores
//! in one process cannot own overlapping roots.

mod config;
mod file_backend;
mod raw;

pub use config::*;
pub use file_backend::*;

use crate::codec::SegmentFactory;
use crate::collection::{ChangeEventListener, Document, Namespace};
use crate::common::{EventAware, SubscriberRef};
use crate::errors::QuarryResult;
use crate::store::{BackedStore, StoreBackend, StoreProvider};

/// A store whose collections are files below a root directory.
#[derive(Clone)]
pub struct FileStore {
    store: BackedStore,
    backend: FileBackend,
}

impl FileStore {
    pub fn new(config: FileStoreConfig, factory: SegmentFactory) -> QuarryResult<FileStore> {
        let aggregator = factory.aggregator().clone();
        let backend = FileBackend::open(config.clone(), factory)?;
        let store = BackedStore::new(&config.name(), StoreBackend::new(backend.clone()), aggregator);
        for listener in config.event_listeners() {
            store.subscribe(listener)?;
        }
        Ok(FileStore { store, backend })
    }

    pub fn root(&self) -> &std::path::Path {
        self.backend.root()
    }
}

impl EventAware for FileStore {
    fn subscribe(&self, listener: ChangeEventListener) -> QuarryResult<Option<SubscriberRef>> {
        self.store.subscribe(listener)
    }

    fn unsubscribe(&self, subscriber: SubscriberRef) -> QuarryResult<()> {
        self.store.unsubscribe(subscriber)
    }
}

impl StoreProvider for FileStore {
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
