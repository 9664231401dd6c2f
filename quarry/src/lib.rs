//! # Quarry - Document Runtime
//!
//! Quarry runs document database commands over pluggable stores. Queries
//! and transformations are aggregation pipelines, collections can live in
//! memory or as files in a directory tree, and a bridge routes commands of
//! many databases to the stores that own them.
//!
//! ## Key Features
//!
//! - **Aggregation**: A lazy, pull-based pipeline engine with an extensible operator registry
//! - **Filters**: Query documents compiled once and matched against many documents
//! - **File Collections**: Collections stored as json, yaml, text or front-matter files
//! - **Commands**: `find`, `aggregate`, `insert`, `update`, `delete`, cursors and collection management
//! - **Bridge**: Namespace routing with composable middleware
//! - **Events**: Change feeds per store and per bridge
//! - **Modules**: Plugins contribute operators and codecs at build time
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quarry::{doc, Quarry};
//! use quarry::bridge::{logging, Bridge};
//! use quarry::store::file::FileStoreConfig;
//!
//! let quarry = Quarry::builder().build()?;
//! let files = quarry.file_store(FileStoreConfig::new("./content"))?;
//! let bridge = Bridge::builder()
//!     .mount(["site"], files)
//!     .middleware(logging())
//!     .build()?;
//!
//! let reply = bridge.run_command("site", doc! {
//!     find: "posts",
//!     filter: { draft: false },
//!     sort: { date: (-1) }
//! })?;
//! ```
//!
//! ## Module Organization
//!
//! - [`aggregation`] - Operator registry, expressions and pipelines
//! - [`bridge`] - Command routing and middleware
//! - [`codec`] - Formats, layouts and codec segments for file collections
//! - [`collection`] - Documents, namespaces, updates, validation and change events
//! - [`common`] - Values, streams, locks, event bus and modules
//! - [`errors`] - Error types and result definitions
//! - [`filter`] - Query filters
//! - [`store`] - Command execution over memory, file and forwarding stores

pub mod aggregation;
pub mod bridge;
pub mod codec;
pub mod collection;
pub mod common;
pub mod errors;
pub mod filter;
pub mod quarry;
pub mod quarry_builder;
pub mod quarry_config;
pub mod store;

pub use crate::quarry::Quarry;
pub use crate::quarry_builder::QuarryBuilder;
pub use crate::quarry_config::QuarryConfig;
