//! The aggregation engine: operator registry, expressions and pipelines.

mod accumulators;
mod aggregator;
mod expression;
mod module;
mod operators;
mod registry;
mod stages;

pub use accumulators::Accumulator;
pub(crate) use operators::{add_numbers, multiply_numbers};
pub use aggregator::*;
pub use expression::*;
pub use module::CoreOperators;
pub use registry::*;
