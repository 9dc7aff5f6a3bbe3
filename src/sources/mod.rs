//! Ready-made [`Source`] implementations.
//!
//! Any of these becomes a flow through [`Flow::from_source`](crate::flow::Flow::from_source).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::Range;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

use crate::core::{Result, Source};

/// A source that yields the numbers of a range
pub struct RangeSource {
    range: Range<i64>,
}

impl RangeSource {
    pub fn new(range: Range<i64>) -> Self {
        Self { range }
    }
}

#[async_trait]
impl Source for RangeSource {
    type Item = i64;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        Ok(self.range.next())
    }
}

/// A source that yields the items of a vector
pub struct VecSource<T> {
    items: VecDeque<T>,
}

impl<T> VecSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Add more items to the source
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the number of remaining items
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl<T: Send + 'static> Source for VecSource<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        Ok(self.items.pop_front())
    }
}

/// A source that repeats a single value
pub struct RepeatSource<T> {
    value: T,
    remaining: Option<usize>,
}

impl<T: Clone> RepeatSource<T> {
    /// Repeat `value` forever
    pub fn new(value: T) -> Self {
        Self {
            value,
            remaining: None,
        }
    }

    /// Repeat `value` `count` times
    pub fn times(value: T, count: usize) -> Self {
        Self {
            value,
            remaining: Some(count),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Source for RepeatSource<T> {
    type Item = T;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }
        Ok(Some(self.value.clone()))
    }
}

/// Paces another source: consecutive items are at least `interval` apart.
pub struct IntervalSource<S> {
    inner: S,
    interval: Duration,
    last_produced: Option<Instant>,
}

impl<S> IntervalSource<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_produced: None,
        }
    }
}

#[async_trait]
impl<S: Source> Source for IntervalSource<S> {
    type Item = S::Item;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        if let Some(last) = self.last_produced {
            sleep_until(last + self.interval).await;
        }
        let result = self.inner.next().await;
        self.last_produced = Some(Instant::now());
        result
    }
}

/// A source that yields fibonacci numbers
pub struct FibonacciSource {
    a: Option<u64>,
    b: Option<u64>,
    count: Option<usize>,
}

impl FibonacciSource {
    /// Every fibonacci number that fits in a `u64`
    pub fn new() -> Self {
        Self {
            a: Some(0),
            b: Some(1),
            count: None,
        }
    }

    /// The first `limit` fibonacci numbers
    pub fn with_limit(limit: usize) -> Self {
        Self {
            count: Some(limit),
            ..Self::new()
        }
    }
}

#[async_trait]
impl Source for FibonacciSource {
    type Item = u64;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        if let Some(count) = self.count.as_mut() {
            if *count == 0 {
                return Ok(None);
            }
            *count -= 1;
        }

        let Some(result) = self.a else {
            return Ok(None);
        };
        let next = self.b.and_then(|b| result.checked_add(b));
        self.a = self.b;
        self.b = next;

        Ok(Some(result))
    }
}

impl Default for FibonacciSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a source from an async function returning the next item.
///
/// ```rust
/// use demandweld::prelude::*;
///
/// # tokio_test::block_on(async {
/// let mut n = 0;
/// let source = from_fn(move || {
///     n += 1;
///     let current = n;
///     async move { Ok((current <= 3).then_some(current)) }
/// });
/// let items = Flow::from_source(source).to_vec().await.unwrap();
/// assert_eq!(items, vec![1, 2, 3]);
/// # });
/// ```
pub fn from_fn<F, Fut, T>(f: F) -> FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    FnSource {
        f,
        _phantom: PhantomData,
    }
}

/// A source created from a function
pub struct FnSource<F, Fut, T> {
    f: F,
    _phantom: PhantomData<fn() -> (Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> Source for FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn next(&mut self) -> Result<Option<Self::Item>> {
        (self.f)().await
    }
}
