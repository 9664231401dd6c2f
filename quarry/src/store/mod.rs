//! Stores: the components that execute commands against collections.
//!
//! Every store implements [StoreProvider] and is handled through the
//! cloneable [Store]. [BackedStore] implements the whole command surface
//! once over a [StoreBackend]; the memory and file stores are backed stores
//! over their own backends, and [ForwardingStore] sends commands elsewhere
//! over a [Transport].
//!
//! # Commands
//!
//! | command | reply |
//! |---|---|
//! | `create`, `drop`, `dropDatabase` | `{ok: 1}` plus `ns` or `dropped` |
//! | `find`, `aggregate`, `getMore`, `listCollections` | `{cursor: {firstBatch \| nextBatch, id, ns}, ok: 1}` |
//! | `count`, `insert`, `delete` | `{n, ok: 1}` |
//! | `update` | `{n, nModified, upserted?, ok: 1}` |
//! | `killCursors` | `{cursorsKilled, cursorsNotFound, ok: 1}` |

mod backed_store;
mod backend;
mod command;
mod cursor;
pub mod file;
mod forwarding;
pub mod memory;
mod store;

pub use backed_store::*;
pub use backend::*;
pub use command::{command_collection, command_name, cursor_batch, cursor_id};
pub use forwarding::*;
pub use store::*;
