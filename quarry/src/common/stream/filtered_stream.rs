use crate::collection::Document;
use crate::common::DocumentStream;
use crate::errors::QuarryResult;
use crate::filter::Filter;

/// Yields only the upstream documents the filter accepts.
pub(crate) struct FilteredStream {
    raw_stream: DocumentStream,
    filter: Filter,
}

impl FilteredStream {
    pub fn new(raw_stream: DocumentStream, filter: Filter) -> Self {
        FilteredStream { raw_stream, filter }
    }
}

impl Iterator for FilteredStream {
    type Item = QuarryResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.raw_stream.next() {
                Some(Ok(doc)) => match self.filter.apply(&doc) {
                    Ok(true) => return Some(Ok(doc)),
                    Ok(false) => continue,
                    Err(e) => return Some(Err(e)),
                },
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            }
        }
    }
}
