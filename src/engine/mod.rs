//! Execution machinery behind [`Flow`](crate::flow::Flow).
//!
//! - `producer`: the demand-aware delivery base every producer builds on
//! - [`generator`]: sequential async bodies that emit on demand
//! - [`pull`]: the batched iterator a stage uses to consume its upstream

pub(crate) mod producer;

pub mod generator;
pub mod pull;

pub use generator::{Co, Emit, EmitAll};
pub use pull::Pull;
