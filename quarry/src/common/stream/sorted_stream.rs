use crate::collection::Document;
use crate::common::{DocumentStream, SortSpec};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};

/// Sorts the whole upstream on first pull.
///
/// This is a blocking stage: nothing is yielded until every upstream
/// document has been read. The sort is stable, so documents with equal
/// keys keep their input order.
pub(crate) struct SortedStream {
    raw_stream: Option<DocumentStream>,
    sort_spec: SortSpec,
    max_documents: usize,
    sorted: std::vec::IntoIter<Document>,
    error: Option<QuarryError>,
}

impl SortedStream {
    pub fn new(raw_stream: DocumentStream, sort_spec: SortSpec, max_documents: usize) -> Self {
        SortedStream {
            raw_stream: Some(raw_stream),
            sort_spec,
            max_documents,
            sorted: Vec::new().into_iter(),
            error: None,
        }
    }

    fn load(&mut self, raw_stream: DocumentStream) {
        let mut cleaned = Vec::new();
        for doc in raw_stream {
            match doc {
                Ok(doc) => {
                    if cleaned.len() >= self.max_documents {
                        log::error!("Sort exceeded the limit of {} documents", self.max_documents);
                        self.error = Some(QuarryError::new(
                            &format!(
                                "Sort exceeded the limit of {} documents",
                                self.max_documents
                            ),
                            ErrorKind::InvalidOperation,
                        ));
                        return;
                    }
                    cleaned.push(doc);
                }
                Err(e) => {
                    self.error = Some(e);
                    return;
                }
            }
        }

        cleaned.sort_by(|a, b| self.sort_spec.compare(a, b));
        self.sorted = cleaned.into_iter();
    }
}

impl Iterator for SortedStream {
    type Item = QuarryResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(raw_stream) = self.raw_stream.take() {
            self.load(raw_stream);
        }

        // fail fast if any error occurs
        if let Some(error) = self.error.take() {
            self.sorted = Vec::new().into_iter();
            return Some(Err(error));
        }
        self.sorted.next().map(Ok)
    }
}
