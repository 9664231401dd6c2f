mod deferred_stream;
mod filtered_stream;
mod sorted_stream;

pub(crate) use deferred_stream::*;
pub(crate) use filtered_stream::*;
pub(crate) use sorted_stream::*;

use crate::collection::Document;
use crate::errors::{QuarryError, QuarryResult};

/// A lazily advanced sequence of documents.
///
/// Every pipeline stage consumes one of these and produces another. Dropping
/// a stream releases whatever its upstream stages hold, such as open files.
pub type DocumentStream = Box<dyn Iterator<Item = QuarryResult<Document>> + Send>;

/// A stream over already materialized documents.
pub fn stream_of(documents: Vec<Document>) -> DocumentStream {
    Box::new(documents.into_iter().map(Ok))
}

/// A stream with no documents.
pub fn empty_stream() -> DocumentStream {
    Box::new(std::iter::empty())
}

/// A stream that yields one error and ends.
pub fn error_stream(error: QuarryError) -> DocumentStream {
    Box::new(std::iter::once(Err(error)))
}

/// Drains a stream, failing on the first error.
pub fn collect_documents(stream: DocumentStream) -> QuarryResult<Vec<Document>> {
    stream.collect()
}
