use crate::collection::{Document, Namespace};
use crate::common::DocumentStream;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::iter::Peekable;
use std::sync::Arc;

struct Cursor {
    namespace: Namespace,
    stream: Peekable<DocumentStream>,
}

/// Open cursors of one store.
///
/// A cursor keeps the lazily advanced remainder of a `find` or `aggregate`.
/// Killing or exhausting a cursor drops its stream, which releases whatever
/// the upstream stages hold.
#[derive(Clone, Default)]
pub(crate) struct CursorRegistry {
    cursors: Arc<DashMap<i64, Arc<Mutex<Cursor>>>>,
}

impl CursorRegistry {
    pub(crate) fn new() -> Self {
        CursorRegistry {
            cursors: Arc::new(DashMap::new()),
        }
    }

    /// Pulls the first batch and registers the rest.
    ///
    /// Returns the batch and the cursor id, which is `0` when nothing is left.
    pub(crate) fn open(
        &self,
        namespace: &Namespace,
        stream: DocumentStream,
        batch_size: usize,
        single_batch: bool,
    ) -> QuarryResult<(Vec<Document>, i64)> {
        let mut stream = stream.peekable();
        let batch = next_batch(&mut stream, batch_size)?;
        if single_batch || stream.peek().is_none() {
            return Ok((batch, 0));
        }

        let id = self.new_id();
        self.cursors.insert(
            id,
            Arc::new(Mutex::new(Cursor {
                namespace: namespace.clone(),
                stream,
            })),
        );
        log::debug!("Opened cursor {} on {}", id, namespace);
        Ok((batch, id))
    }

    /// Pulls the next batch of an open cursor.
    pub(crate) fn get_more(
        &self,
        namespace: &Namespace,
        id: i64,
        batch_size: usize,
    ) -> QuarryResult<(Vec<Document>, i64)> {
        let cursor = match self.cursors.get(&id) {
            Some(entry) => entry.value().clone(),
            None => return Err(cursor_not_found(id)),
        };

        let mut cursor = cursor.lock();
        if &cursor.namespace != namespace {
            log::error!("Cursor {} belongs to {}, not {}", id, cursor.namespace, namespace);
            return Err(QuarryError::new(
                &format!("Cursor {} does not belong to namespace {}", id, namespace),
                ErrorKind::InvalidOperation,
            ));
        }

        let batch = match next_batch(&mut cursor.stream, batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                self.cursors.remove(&id);
                return Err(e);
            }
        };
        if cursor.stream.peek().is_none() {
            self.cursors.remove(&id);
            log::debug!("Cursor {} exhausted", id);
            return Ok((batch, 0));
        }
        Ok((batch, id))
    }

    /// Kills cursors, returning the ids killed and the ids not found.
    pub(crate) fn kill(&self, ids: &[i64]) -> (Vec<i64>, Vec<i64>) {
        let mut killed = Vec::new();
        let mut not_found = Vec::new();
        for id in ids {
            match self.cursors.remove(id) {
                Some(_) => killed.push(*id),
                None => not_found.push(*id),
            }
        }
        (killed, not_found)
    }

    pub(crate) fn close(&self) {
        self.cursors.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.cursors.len()
    }

    fn new_id(&self) -> i64 {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(1..i64::MAX);
            if !self.cursors.contains_key(&id) {
                return id;
            }
        }
    }
}

fn next_batch(stream: &mut Peekable<DocumentStream>, batch_size: usize) -> QuarryResult<Vec<Document>> {
    let mut batch = Vec::with_capacity(batch_size.min(1024));
    while batch.len() < batch_size {
        match stream.next() {
            Some(doc) => batch.push(doc?),
            None => break,
        }
    }
    Ok(batch)
}

fn cursor_not_found(id: i64) -> QuarryError {
    log::error!("Cursor {} not found", id);
    QuarryError::new(&format!("cursor id {} not found", id), ErrorKind::CursorNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream_of;
    use crate::doc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn docs(n: i64) -> Vec<Document> {
        (0..n).map(|i| doc! { i: i }).collect()
    }

    #[test]
    fn test_batches_until_exhausted() {
        let registry = CursorRegistry::new();
        let ns = Namespace::new("db", "c");
        let (first, id) = registry.open(&ns, stream_of(docs(5)), 2, false).unwrap();
        assert_eq!(first.len(), 2);
        assert_ne!(id, 0);

        let (second, same) = registry.get_more(&ns, id, 2).unwrap();
        assert_eq!(second, vec![doc! { i: 2 }, doc! { i: 3 }]);
        assert_eq!(same, id);

        let (last, done) = registry.get_more(&ns, id, 2).unwrap();
        assert_eq!(last, vec![doc! { i: 4 }]);
        assert_eq!(done, 0);
        assert_eq!(registry.len(), 0);

        let err = registry.get_more(&ns, id, 2).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
    }

    #[test]
    fn test_exact_fit_closes_immediately() {
        let registry = CursorRegistry::new();
        let ns = Namespace::new("db", "c");
        let (first, id) = registry.open(&ns, stream_of(docs(2)), 2, false).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(id, 0);
    }

    #[test]
    fn test_single_batch() {
        let registry = CursorRegistry::new();
        let (first, id) = registry
            .open(&Namespace::new("db", "c"), stream_of(docs(5)), 2, true)
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(id, 0);
        assert_eq!(registry.len(), 0);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_kill_releases_stream() {
        let registry = CursorRegistry::new();
        let ns = Namespace::new("db", "c");
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(released.clone());
        let stream: DocumentStream = Box::new((0..).map(move |i: i64| {
            let _ = &flag;
            Ok(doc! { i: i })
        }));

        let (_, id) = registry.open(&ns, stream, 1, false).unwrap();
        assert!(!released.load(Ordering::SeqCst));
        assert_eq!(registry.kill(&[id, 99]), (vec![id], vec![99]));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wrong_namespace() {
        let registry = CursorRegistry::new();
        let (_, id) = registry
            .open(&Namespace::new("db", "a"), stream_of(docs(3)), 1, false)
            .unwrap();
        assert!(registry.get_more(&Namespace::new("db", "b"), id, 1).is_err());
    }
}
