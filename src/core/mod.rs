//! Core traits and types for the demandweld library.
//!
//! This module contains the protocol traits, the demand counter and the error
//! type that every other layer is built on.

pub mod demand;
pub mod error;
pub mod traits;

// Re-export core items
pub use demand::{Demand, UNBOUNDED};
pub use error::{Error, IntoError, Result};
pub use traits::{Processor, Publisher, Sink, Source, Subscriber, Subscription};
