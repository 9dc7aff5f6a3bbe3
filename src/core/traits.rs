//! Core traits for the demand-driven streaming engine.
//!
//! The push side is the standard demand protocol: a [`Publisher`] hands each
//! [`Subscriber`] exactly one [`Subscription`], through which the subscriber
//! authorizes deliveries with `request(n)` and stops them with `cancel()`.
//!
//! The pull side ([`Source`], [`Processor`], [`Sink`]) keeps the
//! GenStage-style extension points: plain async objects that the engine adapts
//! into back-pressured stages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::{Error, Result};

/// Control surface attached to every producer.
///
/// Both methods may be called from any thread, including re-entrantly from
/// inside [`Subscriber::on_next`].
pub trait Subscription: Send + Sync {
    /// Authorize `n` more deliveries. A negative `n` is a contract violation
    /// and terminates the subscription with [`Error::IllegalDemand`].
    fn request(&self, n: i64);

    /// Stop deliveries and release resources. Idempotent.
    fn cancel(&self);
}

/// Receiver of a push stream.
///
/// Events arrive as `on_subscribe`, then any number of `on_next` bounded by
/// the requested amount, then at most one of `on_error` / `on_complete`.
/// Calls are serialized: no two events for one subscriber overlap.
pub trait Subscriber<T>: Send {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    fn on_next(&mut self, item: T);

    fn on_error(&mut self, error: Error);

    fn on_complete(&mut self);
}

/// A cold, single-use producer of a push stream.
///
/// Subscribing consumes the publisher, so a producer instance can never be
/// shared between two subscriptions.
pub trait Publisher<T>: Send {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>);
}

impl<T, F> Publisher<T> for F
where
    F: FnOnce(Box<dyn Subscriber<T>>) + Send,
{
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        (*self)(subscriber)
    }
}

/// A source generates items one at a time.
///
/// Sources are pull-based: `next` is only awaited when downstream demand is
/// outstanding, so a slow consumer naturally pauses the source.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use demandweld::core::{Result, Source};
///
/// struct CounterSource {
///     current: u64,
///     max: u64,
/// }
///
/// #[async_trait]
/// impl Source for CounterSource {
///     type Item = u64;
///
///     async fn next(&mut self) -> Result<Option<Self::Item>> {
///         if self.current <= self.max {
///             self.current += 1;
///             Ok(Some(self.current - 1))
///         } else {
///             Ok(None)
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send {
    /// The type of items this source generates
    type Item: Send + 'static;

    /// Produce the next item, or None once the source is exhausted.
    async fn next(&mut self) -> Result<Option<Self::Item>>;
}

/// A processor transforms items (sink + source combined).
///
/// Run as a stage by [`Flow::process`](crate::flow::Flow::process): every
/// upstream item goes through `process`, and `finish` may flush trailing
/// output once upstream completes.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use demandweld::core::{Result, Processor};
///
/// struct DoubleProcessor;
///
/// #[async_trait]
/// impl Processor for DoubleProcessor {
///     type Input = i32;
///     type Output = i32;
///
///     async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
///         Ok(vec![item * 2])
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send {
    /// The type of items this processor accepts
    type Input: Send + 'static;
    /// The type of items this processor produces
    type Output: Send + 'static;

    /// Process an input item and produce zero or more output items.
    ///
    /// Returning an empty Vec means the item was consumed but produced no output.
    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>>;

    /// Called when upstream is exhausted, allowing final output generation.
    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(vec![])
    }
}

/// A sink consumes items at the end of a flow.
#[async_trait]
pub trait Sink: Send {
    /// The type of items this sink accepts
    type Item: Send + 'static;

    /// Handle a single item.
    async fn write(&mut self, item: Self::Item) -> Result<()>;

    /// Called when the upstream flow completes.
    ///
    /// This allows sinks to perform cleanup or flush any buffered state.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
