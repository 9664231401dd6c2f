use crate::collection::Document;
use crate::common::Value;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use std::cmp::Ordering;

/// Specifies the direction of a sort key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortOrder {
    /// Smallest value first.
    Ascending,
    /// Largest value first.
    Descending,
}

/// An ordered list of `(field path, direction)` pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortSpec {
    keys: Vec<(String, SortOrder)>,
}

impl SortSpec {
    pub fn new(keys: Vec<(String, SortOrder)>) -> Self {
        SortSpec { keys }
    }

    /// Parses a sort document such as `{age: -1, name: 1}`.
    pub fn parse(spec: &Document) -> QuarryResult<SortSpec> {
        if spec.is_empty() {
            log::error!("Sort specification is empty");
            return Err(QuarryError::new(
                "Sort specification must have at least one key",
                ErrorKind::InvalidArgument,
            ));
        }

        let mut keys = Vec::with_capacity(spec.len());
        for (field, direction) in spec.iter() {
            let order = match direction.as_i64() {
                Some(1) => SortOrder::Ascending,
                Some(-1) => SortOrder::Descending,
                _ => {
                    log::error!("Invalid sort direction {} for {}", direction, field);
                    return Err(QuarryError::new(
                        &format!("Sort direction for '{}' must be 1 or -1", field),
                        ErrorKind::InvalidArgument,
                    ));
                }
            };
            keys.push((field.clone(), order));
        }
        Ok(SortSpec { keys })
    }

    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.keys
    }

    /// Compares two documents by the sort keys. Missing fields sort as null.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, order) in &self.keys {
            let a_value = a.resolve_path(field).unwrap_or(Value::Null);
            let b_value = b.resolve_path(field).unwrap_or(Value::Null);
            let cmp = a_value.cmp(&b_value);
            if cmp != Ordering::Equal {
                return match order {
                    SortOrder::Ascending => cmp,
                    SortOrder::Descending => cmp.reverse(),
                };
            }
        }
        Ordering::Equal
    }
}
