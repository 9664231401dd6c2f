//! Query filters.
//!
//! A query document such as `{status: "A", qty: {$lt: 30}}` compiles into a
//! tree of [FilterProvider]s through [Filter::parse]. Field conditions follow
//! array-element semantics: a condition on `tags` matches when the field
//! itself or any of its elements satisfies it, and `{field: null}` matches
//! documents where the field is missing.

mod comparison;
mod filter;
mod logical;

pub(crate) use comparison::*;
pub use filter::{Filter, FilterProvider};
pub(crate) use filter::is_operator_document;
pub(crate) use logical::*;
