use crate::collection::{Document, Namespace};
use crate::common::{DocumentStream, Value};
use crate::errors::QuarryResult;
use std::ops::Deref;
use std::sync::Arc;

/// The documents one write command persists, applied as a unit.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Documents to insert or overwrite, keyed by their `_id`.
    pub upserts: Vec<Document>,
    /// `_id`s of documents to remove.
    pub deletes: Vec<Value>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn upsert(&mut self, document: Document) {
        self.upserts.push(document);
    }

    pub fn delete(&mut self, id: Value) {
        self.deletes.push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// A backing medium for a [crate::store::BackedStore].
///
/// Backends know nothing about commands, validation or events. They hold
/// documents per namespace and answer reads with lazy streams. Command
/// semantics live in the store, so a new medium only has to implement
/// this trait.
pub trait BackendProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Materializes storage for a collection.
    ///
    /// `options` are the `create` options the backend understands, such as
    /// a file store's `format` and `layout`.
    fn create(&self, namespace: &Namespace, options: &Document) -> QuarryResult<()>;

    /// Returns whether storage for the collection exists.
    fn exists(&self, namespace: &Namespace) -> QuarryResult<bool>;

    /// Names of the collections with storage in a database.
    fn list_collections(&self, database: &str) -> QuarryResult<Vec<String>>;

    /// Removes all storage of a collection.
    fn drop_collection(&self, namespace: &Namespace) -> QuarryResult<()>;

    /// Reads a collection lazily.
    ///
    /// With an `id` hint the backend may return only the document with that
    /// `_id`. A backend that cannot narrow its read returns everything and
    /// the caller filters.
    fn read(&self, namespace: &Namespace, id: Option<&Value>) -> QuarryResult<DocumentStream>;

    /// Persists a batch. Upserts replace documents with the same `_id`.
    fn write(&self, namespace: &Namespace, batch: WriteBatch) -> QuarryResult<()>;

    fn close(&self) -> QuarryResult<()>;
}

/// A cloneable handle to a [BackendProvider].
#[derive(Clone)]
pub struct StoreBackend {
    inner: Arc<dyn BackendProvider>,
}

impl StoreBackend {
    pub fn new<T: BackendProvider + 'static>(inner: T) -> Self {
        StoreBackend {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for StoreBackend {
    type Target = Arc<dyn BackendProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The normalized key of an `_id`, used to match ids across value types.
///
/// Integral floats key the same as the equal integer, so `1` and `1.0`
/// address the same document.
pub(crate) fn id_key(id: &Value) -> String {
    match id {
        Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::Int(*f as i64).to_json(),
        other => other.to_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_id_key_normalizes_numbers() {
        assert_eq!(id_key(&Value::Int(1)), id_key(&Value::Float(1.0)));
        assert_ne!(id_key(&Value::Int(1)), id_key(&Value::from("1")));
        assert_ne!(id_key(&Value::Float(1.5)), id_key(&Value::Int(1)));
    }

    #[test]
    fn test_write_batch() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());
        batch.upsert(doc! { _id: 1 });
        batch.delete(Value::from(2));
        assert_eq!(batch.upserts.len(), 1);
        assert_eq!(batch.deletes.len(), 1);
        assert!(!batch.is_empty());
    }
}
