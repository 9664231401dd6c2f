//! Storage codecs: formats, layouts and the segments built from them.

mod format;
mod front_matter;
mod layout;
mod module;
mod operators;
mod segment;

pub use format::*;
pub use front_matter::*;
pub use layout::*;
pub use module::*;
pub use segment::*;
