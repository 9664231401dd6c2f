//! The dispatcher in front of the stores.

mod bridge;
pub mod middleware;

pub use bridge::*;
pub use middleware::{error_reply, logging, Handler, Middleware};
