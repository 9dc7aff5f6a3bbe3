//! The [`Flow`] facade: cold, single-use publishers with the operator
//! algebra as methods.
//!
//! ```rust
//! use demandweld::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let evens = Flow::range(1..7)
//!     .filter(|x| x % 2 == 0)
//!     .to_vec()
//!     .await
//!     .unwrap();
//! assert_eq!(evens, vec![2, 4, 6]);
//! # });
//! ```

mod merge;
mod operators;
mod stream;
mod terminal;

use std::future::Future;
use std::ops::Range;
use std::sync::Arc;

use crate::core::{Error, Publisher, Result, Source, Subscriber};
use crate::engine::generator::{self, Co};
use crate::engine::producer::Emitter;
use crate::engine::pull::Pull;
use crate::sources::{RangeSource, RepeatSource};

pub use stream::FlowStream;
pub use terminal::Terminal;

/// Tuning carried from stage to stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowConfig {
    /// Number of items a stage requests from its upstream at a time
    pub batch_size: usize,
    /// Maximum number of inner flows run at once by the merging operators
    pub max_concurrency: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_concurrency: 8,
        }
    }
}

/// A cold stream of `T` values that starts producing once subscribed and
/// only as fast as its subscriber requests.
#[must_use = "flows do nothing unless subscribed or consumed"]
pub struct Flow<T> {
    publisher: Box<dyn Publisher<T>>,
    config: FlowConfig,
}

impl<T: Send + 'static> Flow<T> {
    /// Wrap any [`Publisher`].
    pub fn from_publisher<P>(publisher: P) -> Self
    where
        P: Publisher<T> + 'static,
    {
        Self {
            publisher: Box::new(publisher),
            config: FlowConfig::default(),
        }
    }

    /// A flow driven by a sequential async body.
    ///
    /// The body does not start until the first positive request, and each
    /// `co.emit(..)` suspends until downstream demand allows delivery.
    pub fn generate<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Co<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_publisher(move |subscriber: Box<dyn Subscriber<T>>| {
            generator::run(body, subscriber)
        })
    }

    /// Emit the items of `iter` in order.
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let items = iter.into_iter();
        Self::generate(move |co| async move {
            for item in items {
                co.emit(item).await?;
            }
            Ok(())
        })
    }

    pub fn just(item: T) -> Self {
        Self::from_iter(std::iter::once(item))
    }

    /// Complete immediately, without waiting for demand.
    pub fn empty() -> Self {
        Self::from_publisher(|subscriber: Box<dyn Subscriber<T>>| {
            let emitter = Arc::new(Emitter::new(None));
            emitter.start(subscriber, emitter.clone());
            emitter.complete();
        })
    }

    /// Fail immediately with `error`, without waiting for demand.
    pub fn failed(error: Error) -> Self {
        Self::from_publisher(move |subscriber: Box<dyn Subscriber<T>>| {
            let emitter = Arc::new(Emitter::new(None));
            emitter.start(subscriber, emitter.clone());
            emitter.error(error);
        })
    }

    /// Drive an async [`Source`], awaiting `next` only while demand is
    /// outstanding.
    pub fn from_source<S>(source: S) -> Self
    where
        S: Source<Item = T> + 'static,
    {
        Self::generate(move |co| async move {
            let mut source = source;
            while let Some(item) = source.next().await? {
                co.emit(item).await?;
            }
            Ok(())
        })
    }

    /// Adapt a `Stream`, polling it only while demand is outstanding.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures_core::Stream<Item = T> + Send + 'static,
    {
        use tokio_stream::StreamExt;

        Self::generate(move |co| async move {
            let mut stream = Box::pin(stream);
            while let Some(item) = stream.next().await {
                co.emit(item).await?;
            }
            Ok(())
        })
    }

    /// A single value computed by `future`; an `Err` fails the flow.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self::generate(move |co| async move {
            let item = future.await?;
            co.emit(item).await
        })
    }

    /// Subscribe `subscriber`. A flow can be subscribed only once.
    pub fn subscribe<S>(self, subscriber: S)
    where
        S: Subscriber<T> + 'static,
    {
        self.subscribe_boxed(Box::new(subscriber));
    }

    pub fn subscribe_boxed(self, subscriber: Box<dyn Subscriber<T>>) {
        self.publisher.subscribe(subscriber);
    }

    /// Build a stage: a generator whose body consumes this flow through a
    /// [`Pull`] and emits into the returned flow.
    ///
    /// The pull requests `batch_size` items at a time, growing to the
    /// largest single request the stage itself receives.
    pub fn stage<U, F, Fut>(self, body: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnOnce(Pull<T>, Co<U>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let config = self.config;
        Flow::generate(move |co: Co<U>| {
            let upstream = co.pull(self);
            body(upstream, co)
        })
        .with_config(config)
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Set how many items downstream stages request at a time.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    /// Set the concurrency bound of the merging operators.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max.max(1);
        self
    }

    /// Consume the flow as a `Stream` of results.
    pub fn into_stream(self) -> FlowStream<T> {
        let batch_size = self.config.batch_size;
        FlowStream::new(Pull::new(self, batch_size, None))
    }
}

impl Flow<i64> {
    pub fn range(range: Range<i64>) -> Self {
        Flow::from_source(RangeSource::new(range))
    }
}

impl<T: Clone + Send + 'static> Flow<T> {
    /// Emit `value` `times` times.
    pub fn repeat(value: T, times: usize) -> Self {
        Flow::from_source(RepeatSource::times(value, times))
    }
}

impl<T: Send + 'static> FromIterator<T> for Flow<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Flow::from_iter(iter.into_iter().collect::<Vec<_>>())
    }
}
