use crate::collection::Document;
use crate::common::DocumentStream;
use crate::errors::{QuarryError, QuarryResult};

type Producer = Box<dyn FnOnce() -> QuarryResult<Vec<Document>> + Send>;

/// Runs a blocking computation on first pull and yields its output.
///
/// Grouping and counting stages must see their whole input before they
/// can emit anything. Wrapping them here keeps the pipeline lazy up to the
/// point where the first result is requested.
pub(crate) struct DeferredStream {
    producer: Option<Producer>,
    output: std::vec::IntoIter<Document>,
    error: Option<QuarryError>,
}

impl DeferredStream {
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce() -> QuarryResult<Vec<Document>> + Send + 'static,
    {
        DeferredStream {
            producer: Some(Box::new(producer)),
            output: Vec::new().into_iter(),
            error: None,
        }
    }
}

impl Iterator for DeferredStream {
    type Item = QuarryResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(producer) = self.producer.take() {
            match producer() {
                Ok(documents) => self.output = documents.into_iter(),
                Err(e) => self.error = Some(e),
            }
        }

        if let Some(error) = self.error.take() {
            return Some(Err(error));
        }
        self.output.next().map(Ok)
    }
}

/// Wraps a blocking computation as a stream.
pub(crate) fn deferred_stream<F>(producer: F) -> DocumentStream
where
    F: FnOnce() -> QuarryResult<Vec<Document>> + Send + 'static,
{
    Box::new(DeferredStream::new(producer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_runs_only_when_pulled() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut stream = deferred_stream(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(vec![doc! { a: 1 }, doc! { a: 2 }])
        });
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(stream.next().unwrap().unwrap(), doc! { a: 1 });
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(stream.next().unwrap().unwrap(), doc! { a: 2 });
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_error_is_yielded_once() {
        let mut stream = deferred_stream(|| {
            Err(QuarryError::new("boom", ErrorKind::InternalError))
        });
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }
}
