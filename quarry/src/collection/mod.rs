//! Documents, namespaces and the per-collection machinery shared by stores.
//!
//! # Documents
//!
//! A [Document] is an ordered map from field names to [crate::common::Value]s.
//! Nested fields are addressed with dotted paths, and array elements with
//! numeric segments.
//!
//! ```rust,ignore
//! use quarry::doc;
//!
//! let mut post = doc! { title: "Hello", tags: ["intro"] };
//! post.put_path("author.name", "Ada")?;
//! assert_eq!(post.get_path("tags.0"), Some(&"intro".into()));
//! ```
//!
//! # Document IDs
//!
//! Every stored document has an `_id`. When an inserted document has none,
//! the store generates one with a snowflake generator and renders it as a
//! decimal string, so it doubles as a file name.
//!
//! # Writes
//!
//! [Update] compiles the `u` of an update statement and [Validator] compiles
//! a collection's validation rule. Both are compiled once and reused for
//! every document.

mod document;
mod event;
mod namespace;
pub(crate) mod snowflake;
mod update;
mod validator;

pub use document::*;
pub use event::*;
pub use namespace::*;
pub use update::*;
pub use validator::*;
