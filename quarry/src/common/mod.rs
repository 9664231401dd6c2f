//! Shared building blocks: values, streams, locks, events and modules.

mod constants;
mod event_bus;
mod lock;
mod module;
mod sort_order;
mod stream;
mod value;

pub use constants::*;
pub use event_bus::*;
pub use lock::*;
pub use module::*;
pub use sort_order::*;
pub use stream::*;
pub use value::*;
