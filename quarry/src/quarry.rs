use crate::aggregation::Aggregator;
use crate::codec::{SegmentFactory, SegmentResolver};
use crate::collection::Document;
use crate::common::DocumentStream;
use crate::errors::QuarryResult;
use crate::quarry_builder::QuarryBuilder;
use crate::quarry_config::QuarryConfig;
use crate::store::file::{FileStore, FileStoreConfig};
use crate::store::memory::{MemoryStore, MemoryStoreConfig};
use crate::store::{Store, StoreProvider};
use std::sync::Arc;

/// A built engine: the sealed operator registry, the configuration and
/// the codec resolvers contributed by modules.
///
/// Stores opened from the same engine share its aggregator. Cloning is
/// cheap and every clone refers to the same engine.
///
/// # Examples
///
/// ```rust,ignore
/// use quarry::{doc, Quarry};
/// use quarry::collection::Namespace;
/// use quarry::store::memory::MemoryStoreConfig;
///
/// let quarry = Quarry::builder().build()?;
/// let store = quarry.memory_store(MemoryStoreConfig::new())?;
/// let ns = Namespace::new("shop", "orders");
/// store.execute(&ns, doc! { insert: "orders", documents: [{ item: "pen" }] })?;
/// ```
#[derive(Clone)]
pub struct Quarry {
    inner: Arc<QuarryInner>,
}

struct QuarryInner {
    config: QuarryConfig,
    aggregator: Aggregator,
    resolvers: Vec<SegmentResolver>,
}

impl Quarry {
    pub fn builder() -> QuarryBuilder {
        QuarryBuilder::new()
    }

    pub(crate) fn new(config: QuarryConfig, aggregator: Aggregator, resolvers: Vec<SegmentResolver>) -> Self {
        Quarry {
            inner: Arc::new(QuarryInner {
                config,
                aggregator,
                resolvers,
            }),
        }
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.inner.config
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.inner.aggregator
    }

    /// Runs a pipeline over `input` without any store.
    pub fn aggregate(&self, stages: &[Document], input: DocumentStream) -> QuarryResult<DocumentStream> {
        self.inner.aggregator.aggregate(stages, input)
    }

    /// A factory building codec segments from every registered resolver.
    pub fn segment_factory(&self) -> SegmentFactory {
        SegmentFactory::new(self.inner.resolvers.clone(), self.inner.aggregator.clone())
    }

    pub fn memory_store(&self, config: MemoryStoreConfig) -> QuarryResult<Store> {
        let store = MemoryStore::new(config, self.inner.aggregator.clone())?;
        log::debug!("Opened memory store {}", store.name());
        Ok(Store::new(store))
    }

    /// Opens a file store on the configured root.
    ///
    /// Fails when another open file store of this process owns an
    /// overlapping root.
    pub fn file_store(&self, config: FileStoreConfig) -> QuarryResult<Store> {
        let store = FileStore::new(config, self.segment_factory())?;
        log::debug!("Opened file store {} at {}", store.name(), store.root().display());
        Ok(Store::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Namespace;
    use crate::common::{collect_documents, stream_of};
    use crate::errors::ErrorKind;
    use crate::store::{command_name, cursor_batch};
    use crate::doc;

    #[test]
    fn test_aggregate_without_store() {
        let quarry = Quarry::builder().build().unwrap();
        let input = stream_of(vec![doc! { n: 1 }, doc! { n: 2 }, doc! { n: 3 }]);
        let stages = vec![doc! { "$match": { n: { "$gte": 2 } } }, doc! { "$count": "total" }];
        let result = collect_documents(quarry.aggregate(&stages, input).unwrap()).unwrap();
        assert_eq!(result, vec![doc! { total: 2 }]);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let quarry = Quarry::builder().build().unwrap();
        let store = quarry.memory_store(MemoryStoreConfig::new().with_name("scratch")).unwrap();
        assert_eq!(store.name(), "scratch");

        let ns = Namespace::new("db", "items");
        store
            .execute(&ns, doc! { insert: "items", documents: [{ _id: 1, n: 5 }] })
            .unwrap();
        let reply = store.execute(&ns, doc! { find: "items" }).unwrap();
        assert_eq!(cursor_batch(&reply), vec![doc! { _id: 1, n: 5 }]);
        assert_eq!(command_name(&doc! { find: "items" }).unwrap(), "find");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let quarry = Quarry::builder().build().unwrap();
        let store = quarry.file_store(FileStoreConfig::new(dir.path())).unwrap();

        let ns = Namespace::new("site", "posts");
        store
            .execute(&ns, doc! { insert: "posts", documents: [{ _id: "p1", title: "t" }] })
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("site/posts/p1.json")).unwrap();
        assert_eq!(written, r#"{"title":"t"}"#);

        let err = quarry.file_store(FileStoreConfig::new(dir.path())).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);

        store.close().unwrap();
        assert!(quarry.file_store(FileStoreConfig::new(dir.path())).is_ok());
    }
}
