//! Intermediate operators. Each one is a stage: a generator consuming its
//! upstream through a pull iterator.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;

use tokio_util::sync::CancellationToken;

use crate::core::{Processor, Result};
use crate::engine::pull::Pull;
use crate::flow::Flow;

impl<T: Send + 'static> Flow<T> {
    /// Transform every item with `f`.
    pub fn map<U, F>(self, mut f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            while let Some(item) = upstream.try_next().await? {
                co.emit(f(item)).await?;
            }
            Ok(())
        })
    }

    /// Transform every item with a fallible `f`; the first `Err` fails the
    /// flow and cancels upstream.
    pub fn try_map<U, F>(self, mut f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            while let Some(item) = upstream.try_next().await? {
                co.emit(f(item)?).await?;
            }
            Ok(())
        })
    }

    pub fn filter<F>(self, mut predicate: F) -> Flow<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            while let Some(item) = upstream.try_next().await? {
                if predicate(&item) {
                    co.emit(item).await?;
                }
            }
            Ok(())
        })
    }

    /// Call `f` on every item as it passes through.
    pub fn inspect<F>(self, mut f: F) -> Flow<T>
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            while let Some(item) = upstream.try_next().await? {
                f(&item);
                co.emit(item).await?;
            }
            Ok(())
        })
    }

    /// Replace every item by the flow `f` returns, one inner flow at a time.
    pub fn flat_map<U, F>(self, mut f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Flow<U> + Send + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            while let Some(item) = upstream.try_next().await? {
                co.emit_all(f(item)).await?;
            }
            Ok(())
        })
    }

    /// Emit at most `n` items, then cancel upstream and complete.
    ///
    /// Upstream is asked for no more than `n` items at a time.
    pub fn limit(self, n: usize) -> Flow<T> {
        let config = *self.config();
        let batch = config.batch_size.min(n).max(1);
        Flow::generate(move |co| async move {
            if n == 0 {
                return Ok(());
            }
            let mut upstream = Pull::new(self, batch, None);
            let mut remaining = n;
            while remaining > 0 {
                match upstream.try_next().await? {
                    Some(item) => {
                        remaining -= 1;
                        co.emit(item).await?;
                    }
                    None => break,
                }
            }
            Ok(())
        })
        .with_config(config)
    }

    pub fn skip(self, n: usize) -> Flow<T> {
        self.stage(move |mut upstream, co| async move {
            let mut skipped = 0;
            while let Some(item) = upstream.try_next().await? {
                if skipped < n {
                    skipped += 1;
                    continue;
                }
                co.emit(item).await?;
            }
            Ok(())
        })
    }

    /// Emit items while `predicate` holds; the first failing item ends the
    /// flow and cancels upstream.
    pub fn take_while<F>(self, mut predicate: F) -> Flow<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            while let Some(item) = upstream.try_next().await? {
                if !predicate(&item) {
                    break;
                }
                co.emit(item).await?;
            }
            Ok(())
        })
    }

    pub fn drop_while<F>(self, mut predicate: F) -> Flow<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            let mut dropping = true;
            while let Some(item) = upstream.try_next().await? {
                if dropping && predicate(&item) {
                    continue;
                }
                dropping = false;
                co.emit(item).await?;
            }
            Ok(())
        })
    }

    /// Group consecutive items into vectors of `size` (the last may be
    /// shorter).
    pub fn batch(self, size: usize) -> Flow<Vec<T>> {
        let size = size.max(1);
        self.stage(move |mut upstream, co| async move {
            let mut chunk = Vec::with_capacity(size);
            while let Some(item) = upstream.try_next().await? {
                chunk.push(item);
                if chunk.len() == size {
                    co.emit(std::mem::replace(&mut chunk, Vec::with_capacity(size)))
                        .await?;
                }
            }
            if !chunk.is_empty() {
                co.emit(chunk).await?;
            }
            Ok(())
        })
    }

    /// Drop items equal to one already emitted.
    pub fn distinct(self) -> Flow<T>
    where
        T: Eq + Hash + Clone,
    {
        self.stage(|mut upstream, co| async move {
            let mut seen = HashSet::new();
            while let Some(item) = upstream.try_next().await? {
                if seen.insert(item.clone()) {
                    co.emit(item).await?;
                }
            }
            Ok(())
        })
    }

    /// Materialize the whole upstream, then emit it in ascending order.
    pub fn sorted(self) -> Flow<T>
    where
        T: Ord,
    {
        self.sorted_by(T::cmp)
    }

    pub fn sorted_by<F>(self, mut compare: F) -> Flow<T>
    where
        F: FnMut(&T, &T) -> Ordering + Send + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            let mut items = Vec::new();
            while let Some(item) = upstream.try_next().await? {
                items.push(item);
            }
            items.sort_by(&mut compare);
            for item in items {
                co.emit(item).await?;
            }
            Ok(())
        })
    }

    /// Run every item through a [`Processor`], then flush its `finish`
    /// output once upstream completes.
    pub fn process<P>(self, processor: P) -> Flow<P::Output>
    where
        P: Processor<Input = T> + 'static,
    {
        self.stage(move |mut upstream, co| async move {
            let mut processor = processor;
            while let Some(item) = upstream.try_next().await? {
                for output in processor.process(item).await? {
                    co.emit(output).await?;
                }
            }
            for output in processor.finish().await? {
                co.emit(output).await?;
            }
            Ok(())
        })
    }

    /// Like [`map`](Self::map) with an async `f`, running up to
    /// `max_concurrency` calls at once. Results are emitted as they finish,
    /// so order is not preserved.
    pub fn map_concurrent<U, F, Fut>(self, mut f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let limit = self.config().max_concurrency;
        self.stage(move |mut upstream, co| async move {
            while let Some(item) = upstream.try_next().await? {
                co.wait_for_slot(limit).await;
                let pending = f(item);
                let child = co.clone();
                co.spawn(async move {
                    let value = pending.await?;
                    child.emit(value).await
                });
            }
            Ok(())
        })
    }

    /// Like [`flat_map`](Self::flat_map), but subscribes to up to
    /// `max_concurrency` inner flows at once and interleaves their items.
    pub fn flat_map_merge<U, F>(self, mut f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Flow<U> + Send + 'static,
    {
        let limit = self.config().max_concurrency;
        self.stage(move |mut upstream, co| async move {
            while let Some(item) = upstream.try_next().await? {
                co.wait_for_slot(limit).await;
                let mut inner = co.pull(f(item));
                let child = co.clone();
                co.spawn(async move {
                    while let Some(value) = inner.try_next().await? {
                        child.emit(value).await?;
                    }
                    Ok(())
                });
            }
            Ok(())
        })
    }

    /// All items of this flow, then all items of `next`.
    pub fn concat_with(self, next: Flow<T>) -> Flow<T> {
        let config = *self.config();
        Flow::concat(vec![self, next]).with_config(config)
    }

    /// Interleave this flow with `other` as items arrive.
    pub fn merge_with(self, other: Flow<T>) -> Flow<T> {
        let config = *self.config();
        Flow::merge(vec![self, other]).with_config(config)
    }

    /// Complete as soon as `token` is cancelled, cancelling upstream.
    pub fn cancel_on(self, token: CancellationToken) -> Flow<T> {
        self.stage(move |mut upstream, co| async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::trace!("cancellation token fired");
                        return Ok(());
                    }
                    next = upstream.try_next() => next?,
                };
                match next {
                    Some(item) => co.emit(item).await?,
                    None => return Ok(()),
                }
            }
        })
    }
}
