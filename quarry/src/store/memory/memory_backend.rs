use crate::collection::{Document, Namespace};
use crate::common::{stream_of, DocumentStream, Value};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::store::backend::id_key;
use crate::store::{BackendProvider, WriteBatch};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

type CollectionMap = Arc<RwLock<IndexMap<String, Document>>>;

/// Keeps every collection in an insertion-ordered map keyed by `_id`.
///
/// Reads take a snapshot of the collection, so a cursor never observes
/// writes made after it was opened.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    collections: Arc<DashMap<Namespace, CollectionMap>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            collections: Arc::new(DashMap::new()),
        }
    }

    fn collection(&self, namespace: &Namespace) -> Option<CollectionMap> {
        self.collections.get(namespace).map(|c| c.value().clone())
    }
}

impl BackendProvider for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&self, namespace: &Namespace, _options: &Document) -> QuarryResult<()> {
        self.collections
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(RwLock::new(IndexMap::new())));
        Ok(())
    }

    fn exists(&self, namespace: &Namespace) -> QuarryResult<bool> {
        Ok(self.collections.contains_key(namespace))
    }

    fn list_collections(&self, database: &str) -> QuarryResult<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .iter()
            .filter(|entry| entry.key().database() == database)
            .map(|entry| entry.key().collection().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn drop_collection(&self, namespace: &Namespace) -> QuarryResult<()> {
        self.collections.remove(namespace);
        Ok(())
    }

    fn read(&self, namespace: &Namespace, id: Option<&Value>) -> QuarryResult<DocumentStream> {
        let collection = match self.collection(namespace) {
            Some(collection) => collection,
            None => return Ok(stream_of(Vec::new())),
        };

        let documents = collection.read();
        let snapshot = match id {
            Some(id) => documents.get(&id_key(id)).cloned().into_iter().collect(),
            None => documents.values().cloned().collect(),
        };
        Ok(stream_of(snapshot))
    }

    fn write(&self, namespace: &Namespace, batch: WriteBatch) -> QuarryResult<()> {
        let collection = match self.collection(namespace) {
            Some(collection) => collection,
            None => {
                log::error!("Collection {} has no storage", namespace);
                return Err(QuarryError::new(
                    &format!("Collection {} has no storage", namespace),
                    ErrorKind::NamespaceNotFound,
                ));
            }
        };

        let mut documents = collection.write();
        for id in &batch.deletes {
            documents.shift_remove(&id_key(id));
        }
        for document in batch.upserts {
            let key = match document.id() {
                Some(id) => id_key(id),
                None => {
                    log::error!("Document {} has no _id", document);
                    return Err(QuarryError::new(
                        "Cannot store a document without _id",
                        ErrorKind::InvalidArgument,
                    ));
                }
            };
            documents.insert(key, document);
        }
        Ok(())
    }

    fn close(&self) -> QuarryResult<()> {
        self.collections.clear();
        Ok(())
    }
}
