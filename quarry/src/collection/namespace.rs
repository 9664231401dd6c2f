use crate::common::WILDCARD_DATABASE;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use std::fmt::{Display, Formatter};

/// A `(database, collection)` pair identifying a logical document set.
///
/// The database name `*` is reserved for the bridge's fallback store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    pub fn new(database: &str, collection: &str) -> Self {
        Namespace {
            database: database.to_string(),
            collection: collection.to_string(),
        }
    }

    /// Parses a `database.collection` string. The collection part may
    /// itself contain dots.
    pub fn parse(full_name: &str) -> QuarryResult<Namespace> {
        match full_name.split_once('.') {
            Some((database, collection)) if !database.is_empty() && !collection.is_empty() => {
                Ok(Namespace::new(database, collection))
            }
            _ => {
                log::error!("Invalid namespace {}", full_name);
                Err(QuarryError::new(
                    &format!("Invalid namespace '{}', expected 'database.collection'", full_name),
                    ErrorKind::InvalidArgument,
                ))
            }
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns a namespace in the same database for another collection.
    pub fn sibling(&self, collection: &str) -> Namespace {
        Namespace::new(&self.database, collection)
    }

    pub fn is_wildcard(&self) -> bool {
        self.database == WILDCARD_DATABASE
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}
