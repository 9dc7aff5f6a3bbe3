//! # Demand-driven streaming for Rust
//!
//! This crate provides back-pressured push/pull streams: producers are
//! written as plain sequential `async` code, and run only as fast as their
//! consumers request items.
//!
//! ## Core Concepts
//!
//! - **Flow**: a cold, single-use stream of values
//! - **Generator**: sequential producer code that emits on demand
//! - **Stage**: a generator that pulls from an upstream flow in batches
//! - **Terminal**: a future that consumes a flow into a single result
//!
//! ## Example
//!
//! ```rust
//! use demandweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let total = Flow::range(1..101)
//!         .map(|x| x * 2)
//!         .batch_size(10)
//!         .filter(|x| x % 3 == 0)
//!         .fold(0, |acc, x| acc + x)
//!         .await?;
//!     assert_eq!(total, 3366);
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod engine;
pub mod flow;
pub mod sinks;
pub mod sources;
pub mod util;

mod metrics;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub mod prelude {
    pub use crate::core::{
        Error, Processor, Publisher, Result, Sink, Source, Subscriber, Subscription, UNBOUNDED,
    };
    pub use crate::engine::{Co, Pull};
    pub use crate::flow::{Flow, FlowConfig, FlowStream, Terminal};
    pub use crate::sinks::{CollectSink, CountSink};
    pub use crate::sources::{
        from_fn, FibonacciSource, IntervalSource, RangeSource, RepeatSource, VecSource,
    };
    pub use crate::util::with_timeout;
}

// Re-export main error type
pub use crate::core::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
