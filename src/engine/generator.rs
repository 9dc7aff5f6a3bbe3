//! Sequential producer bodies driven by downstream demand.
//!
//! A generator body is an ordinary `async` block that hands values downstream
//! through a [`Co`] handle:
//!
//! ```rust
//! use demandweld::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let squares = Flow::generate(|co| async move {
//!     for i in 1..=3 {
//!         co.emit(i * i).await?;
//!     }
//!     Ok(())
//! });
//! assert_eq!(squares.to_vec().await.unwrap(), vec![1, 4, 9]);
//! # });
//! ```
//!
//! The generator is its own executor. It polls its pending records (the body
//! plus any children spawned with [`Co::spawn`]) in queue order, on whichever
//! thread requested demand or woke one of its futures. A record suspends at
//! [`Co::emit`] until its value has been delivered, and at [`Co::emit_all`]
//! until the nested flow completes. No threads are spawned.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use futures::task::ArcWake;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::core::demand;
use crate::core::{Error, Result, Subscriber, Subscription};
use crate::engine::producer::{Emitter, Handover};
use crate::engine::pull::Pull;
use crate::flow::Flow;

type Record = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Wrap a record so a panic in user code surfaces as [`Error::Panicked`].
fn record<F>(future: F) -> Record
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    Box::pin(
        AssertUnwindSafe(future)
            .catch_unwind()
            .map(|outcome| match outcome {
                Ok(result) => result,
                Err(payload) => {
                    let error = Error::from_panic(payload);
                    tracing::debug!(error = %error, "generator record panicked");
                    Err(error)
                }
            }),
    )
}

#[derive(Default)]
struct RunState {
    started: bool,
    running: bool,
    repoll: bool,
    finished: bool,
}

enum Pass {
    Pending { again: bool },
    Done,
    Closed,
    Failed(Error),
}

pub(crate) struct Core<T> {
    emitter: Emitter<T>,
    run: Mutex<RunState>,
    records: Mutex<Vec<Record>>,
    incoming: Mutex<Vec<Record>>,
    nested: Mutex<Option<Arc<Nested>>>,
    largest_request: Arc<AtomicU64>,
    children: Arc<AtomicUsize>,
    waker: Waker,
}

struct Resume<T>(Weak<Core<T>>);

impl<T: Send + 'static> ArcWake for Resume<T> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Some(core) = arc_self.0.upgrade() {
            core.drive();
        }
    }
}

/// Subscribe `subscriber` to a fresh generator running `body`.
pub(crate) fn run<T, F, Fut>(body: F, subscriber: Box<dyn Subscriber<T>>)
where
    T: Send + 'static,
    F: FnOnce(Co<T>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let core = Arc::new_cyclic(|weak: &Weak<Core<T>>| {
        let waker = futures::task::waker(Arc::new(Resume(weak.clone())));
        Core {
            emitter: Emitter::new(Some(waker.clone())),
            run: Mutex::new(RunState::default()),
            records: Mutex::new(Vec::new()),
            incoming: Mutex::new(Vec::new()),
            nested: Mutex::new(None),
            largest_request: Arc::new(AtomicU64::new(0)),
            children: Arc::new(AtomicUsize::new(0)),
            waker,
        }
    });
    let co = Co {
        core: Arc::downgrade(&core),
    };
    core.incoming.lock().push(record(body(co)));
    tracing::trace!("generator subscribed");
    core.emitter.start(subscriber, core.clone());
}

impl<T: Send + 'static> Core<T> {
    /// Advance the pending records until none can make progress.
    ///
    /// Re-entrant calls (a record waking its own generator while being polled)
    /// only flag a repoll for the thread already driving.
    fn drive(self: &Arc<Self>) {
        {
            let mut run = self.run.lock();
            if run.finished {
                return;
            }
            if run.running {
                run.repoll = true;
                return;
            }
            if !run.started {
                if self.emitter.available() == 0 && !self.emitter.is_closed() {
                    return;
                }
                run.started = true;
            }
            run.running = true;
            run.repoll = false;
        }

        loop {
            match self.poll_records() {
                Pass::Pending { again } => {
                    let mut run = self.run.lock();
                    if again || run.repoll {
                        run.repoll = false;
                        continue;
                    }
                    run.running = false;
                    return;
                }
                Pass::Done => {
                    tracing::trace!("generator body finished");
                    self.emitter.complete();
                    self.shutdown();
                    return;
                }
                Pass::Closed => {
                    self.shutdown();
                    return;
                }
                Pass::Failed(error) => {
                    tracing::debug!(error = %error, "generator failed");
                    self.shutdown();
                    self.emitter.error(error);
                    return;
                }
            }
        }
    }

    fn poll_records(&self) -> Pass {
        let mut records = self.records.lock();
        records.append(&mut self.incoming.lock());
        let mut cx = Context::from_waker(&self.waker);
        let mut again = false;
        let mut index = 0;
        while index < records.len() {
            if self.emitter.is_closed() {
                return Pass::Closed;
            }
            match records[index].as_mut().poll(&mut cx) {
                Poll::Pending => index += 1,
                Poll::Ready(Ok(())) => {
                    drop(records.remove(index));
                    again = true;
                }
                Poll::Ready(Err(error)) => {
                    if self.emitter.is_closed() {
                        return Pass::Closed;
                    }
                    return Pass::Failed(error);
                }
            }
            records.append(&mut self.incoming.lock());
        }
        if self.emitter.is_closed() {
            Pass::Closed
        } else if records.is_empty() {
            Pass::Done
        } else {
            Pass::Pending { again }
        }
    }

    /// Drop every pending record. Dropping a suspended record unwinds it:
    /// its pulls and nested subscriptions cancel their upstreams.
    fn shutdown(&self) {
        let records = std::mem::take(&mut *self.records.lock());
        let incoming = std::mem::take(&mut *self.incoming.lock());
        {
            let mut run = self.run.lock();
            run.finished = true;
            run.running = false;
        }
        drop(records);
        drop(incoming);
        let nested = self.nested.lock().take();
        if let Some(nested) = nested {
            nested.cancel();
        }
    }
}

impl<T: Send + 'static> Subscription for Core<T> {
    fn request(&self, n: i64) {
        if n > 0 {
            self.largest_request.fetch_max(n as u64, Ordering::Relaxed);
        }
        if self.emitter.request(n) {
            let nested = self.nested.lock().clone();
            if let Some(nested) = nested {
                nested.request(n);
            }
        }
        self.waker.wake_by_ref();
    }

    fn cancel(&self) {
        if self.emitter.cancel() {
            let nested = self.nested.lock().take();
            if let Some(nested) = nested {
                nested.cancel();
            }
            self.waker.wake_by_ref();
        }
    }
}

/// Handle given to a generator body for emitting values.
pub struct Co<T> {
    core: Weak<Core<T>>,
}

impl<T> Clone for Co<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Send + 'static> Co<T> {
    /// Hand `item` downstream.
    ///
    /// Completes immediately when demand is available; otherwise the record
    /// suspends, holding the value, until downstream requests more. Resolves
    /// to [`Error::Cancelled`] if the subscription is cancelled meanwhile.
    pub fn emit(&self, item: T) -> Emit<T> {
        Emit {
            core: self.core.clone(),
            item: Some(item),
            ticket: None,
        }
    }

    /// Forward every item of `flow` downstream, then resume.
    ///
    /// Current and future demand goes to the nested subscription until it
    /// completes. An error from `flow` is returned to the caller.
    pub fn emit_all(&self, flow: Flow<T>) -> EmitAll<T> {
        EmitAll {
            core: self.core.clone(),
            flow: Some(flow),
            nested: None,
        }
    }

    /// Add an independent record that delivers into the same downstream.
    ///
    /// The generator completes only once every child has finished; an error
    /// in any child fails the whole generator.
    pub fn spawn<F>(&self, child: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let children = core.children.clone();
        children.fetch_add(1, Ordering::AcqRel);
        core.incoming.lock().push(record(async move {
            let result = child.await;
            children.fetch_sub(1, Ordering::AcqRel);
            result
        }));
        core.waker.wake_by_ref();
    }

    /// Open a pull view over `flow` whose batch grows with the largest
    /// demand placed on this generator.
    pub fn pull<U: Send + 'static>(&self, flow: Flow<U>) -> Pull<U> {
        let hint = self.core.upgrade().map(|core| core.largest_request.clone());
        let batch_size = flow.config().batch_size;
        Pull::new(flow, batch_size, hint)
    }

    /// Number of spawned children still running.
    pub fn live_children(&self) -> usize {
        self.core
            .upgrade()
            .map(|core| core.children.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Wait until fewer than `limit` children are running.
    pub async fn wait_for_slot(&self, limit: usize) {
        futures::future::poll_fn(|_| {
            if self.live_children() < limit.max(1) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Whether downstream has cancelled or the generator terminated.
    pub fn is_cancelled(&self) -> bool {
        self.core
            .upgrade()
            .map(|core| core.emitter.is_closed())
            .unwrap_or(true)
    }
}

/// Future returned by [`Co::emit`].
#[must_use = "emit does nothing unless awaited"]
pub struct Emit<T> {
    core: Weak<Core<T>>,
    item: Option<T>,
    ticket: Option<u64>,
}

// The item is moved out by value and never pinned.
impl<T> Unpin for Emit<T> {}

impl<T: Send + 'static> Future for Emit<T> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(core) = this.core.upgrade() else {
            return Poll::Ready(Err(Error::Cancelled));
        };
        if let Some(item) = this.item.take() {
            match core.emitter.push(item) {
                Some(ticket) => this.ticket = Some(ticket),
                None => return Poll::Ready(Err(Error::Cancelled)),
            }
            core.emitter.drain();
        }
        match this.ticket {
            None => Poll::Ready(Ok(())),
            Some(ticket) => match core.emitter.status(ticket) {
                Handover::Delivered => Poll::Ready(Ok(())),
                Handover::Pending => Poll::Pending,
                Handover::Closed => Poll::Ready(Err(Error::Cancelled)),
            },
        }
    }
}

#[derive(Default)]
struct NestedState {
    subscription: Option<Arc<dyn Subscription>>,
    outcome: Option<Result<()>>,
    cancelled: bool,
}

/// Bookkeeping of the nested flow an [`EmitAll`] delegates to.
#[derive(Default)]
struct Nested {
    state: Mutex<NestedState>,
}

impl Nested {
    fn request(&self, n: i64) {
        let subscription = self.state.lock().subscription.clone();
        if let Some(subscription) = subscription {
            subscription.request(n);
        }
    }

    fn cancel(&self) {
        let subscription = {
            let mut st = self.state.lock();
            st.cancelled = true;
            st.subscription.take()
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

struct NestedSubscriber<T> {
    core: Weak<Core<T>>,
    nested: Arc<Nested>,
}

impl<T: Send + 'static> NestedSubscriber<T> {
    fn finish(&mut self, outcome: Result<()>) {
        {
            let mut st = self.nested.state.lock();
            st.subscription = None;
            st.outcome = Some(outcome);
        }
        if let Some(core) = self.core.upgrade() {
            core.waker.wake_by_ref();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for NestedSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let cancelled = {
            let mut st = self.nested.state.lock();
            if !st.cancelled {
                st.subscription = Some(subscription.clone());
            }
            st.cancelled
        };
        let core = match self.core.upgrade() {
            Some(core) if !cancelled && !core.emitter.is_closed() => core,
            _ => {
                subscription.cancel();
                return;
            }
        };
        let available = core.emitter.available();
        if available > 0 {
            subscription.request(demand::to_request(available));
        }
    }

    fn on_next(&mut self, item: T) {
        if let Some(core) = self.core.upgrade() {
            core.emitter.offer(item);
        }
    }

    fn on_error(&mut self, error: Error) {
        self.finish(Err(error));
    }

    fn on_complete(&mut self) {
        self.finish(Ok(()));
    }
}

/// Future returned by [`Co::emit_all`].
///
/// Dropping it before the nested flow completes cancels the nested
/// subscription.
#[must_use = "emit_all does nothing unless awaited"]
pub struct EmitAll<T> {
    core: Weak<Core<T>>,
    flow: Option<Flow<T>>,
    nested: Option<Arc<Nested>>,
}

impl<T> EmitAll<T> {
    fn detach(&mut self, core: &Core<T>) {
        if let Some(nested) = self.nested.take() {
            let mut active = core.nested.lock();
            if active.as_ref().is_some_and(|current| Arc::ptr_eq(current, &nested)) {
                *active = None;
            }
        }
    }
}

impl<T: Send + 'static> Future for EmitAll<T> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(core) = this.core.upgrade() else {
            return Poll::Ready(Err(Error::Cancelled));
        };
        if let Some(flow) = this.flow.take() {
            let nested = Arc::new(Nested::default());
            *core.nested.lock() = Some(nested.clone());
            this.nested = Some(nested.clone());
            flow.subscribe_boxed(Box::new(NestedSubscriber {
                core: this.core.clone(),
                nested,
            }));
        }
        let Some(nested) = this.nested.clone() else {
            return Poll::Ready(Ok(()));
        };
        let outcome = nested.state.lock().outcome.take();
        match outcome {
            Some(result) => {
                this.detach(&core);
                Poll::Ready(result)
            }
            None if core.emitter.is_closed() => Poll::Ready(Err(Error::Cancelled)),
            None => Poll::Pending,
        }
    }
}

impl<T> Drop for EmitAll<T> {
    fn drop(&mut self) {
        let Some(nested) = self.nested.clone() else {
            return;
        };
        nested.cancel();
        if let Some(core) = self.core.upgrade() {
            self.detach(&core);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Recorder};

    fn counting(limit: i32, produced: Arc<AtomicUsize>) -> Flow<i32> {
        Flow::generate(move |co| async move {
            for i in 0..limit {
                produced.fetch_add(1, Ordering::SeqCst);
                co.emit(i).await?;
            }
            Ok(())
        })
    }

    #[test]
    fn does_not_start_before_demand() {
        let produced = Arc::new(AtomicUsize::new(0));
        let recorder = Recorder::new(0);
        counting(5, produced.clone()).subscribe(recorder.clone());
        assert_eq!(produced.load(Ordering::SeqCst), 0);

        recorder.request(2);
        assert_eq!(recorder.items(), vec![0, 1]);
        // the third value is computed and held, not delivered
        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn suspended_value_is_delivered_on_next_request() {
        let recorder = Recorder::new(1);
        counting(3, Arc::new(AtomicUsize::new(0))).subscribe(recorder.clone());
        assert_eq!(recorder.items(), vec![0]);
        recorder.request(1);
        assert_eq!(recorder.items(), vec![0, 1]);
        assert!(!recorder.is_terminated());
        // the body finishes once its last value is taken
        recorder.request(1);
        assert_eq!(
            recorder.events(),
            vec![Event::Next(0), Event::Next(1), Event::Next(2), Event::Complete]
        );
    }

    #[test]
    fn emit_all_forwards_demand_to_the_nested_flow() {
        let recorder = Recorder::new(0);
        Flow::generate(|co| async move {
            co.emit(0).await?;
            co.emit_all(Flow::from_iter(vec![1, 2, 3])).await?;
            co.emit(4).await?;
            Ok(())
        })
        .subscribe(recorder.clone());

        recorder.request(2);
        assert_eq!(recorder.items(), vec![0, 1]);
        recorder.request(10);
        assert_eq!(recorder.items(), vec![0, 1, 2, 3, 4]);
        assert_eq!(recorder.terminal_count(), 1);
    }

    #[test]
    fn emit_all_error_propagates_to_the_body() {
        let recorder = Recorder::new(10);
        Flow::generate(|co| async move {
            co.emit(1).await?;
            co.emit_all(Flow::failed(Error::custom("nested"))).await?;
            co.emit(2).await?;
            Ok(())
        })
        .subscribe(recorder.clone());
        assert_eq!(
            recorder.events(),
            vec![Event::Next(1), Event::Error("nested".into())]
        );
    }

    #[test]
    fn cancel_reaches_the_nested_flow() {
        let produced = Arc::new(AtomicUsize::new(0));
        let inner = produced.clone();
        let recorder = Recorder::new(2);
        Flow::generate(move |co| async move {
            co.emit_all(Flow::generate(move |nested| async move {
                loop {
                    inner.fetch_add(1, Ordering::SeqCst);
                    nested.emit(0).await?;
                }
            }))
            .await
        })
        .subscribe(recorder.clone());

        assert_eq!(recorder.items(), vec![0, 0]);
        let settled = produced.load(Ordering::SeqCst);
        recorder.cancel();
        recorder.request(10);
        assert_eq!(produced.load(Ordering::SeqCst), settled);
        assert_eq!(recorder.items(), vec![0, 0]);
        assert_eq!(recorder.terminal_count(), 0);
    }

    #[test]
    fn items_forwarded_before_a_nested_failure_are_delivered() {
        let recorder = Recorder::new(10);
        Flow::generate(|co| async move {
            co.emit_all(Flow::from_iter(vec![1, 2])).await?;
            co.emit_all(Flow::failed(Error::custom("nested"))).await
        })
        .subscribe(recorder.clone());
        assert_eq!(
            recorder.events(),
            vec![Event::Next(1), Event::Next(2), Event::Error("nested".into())]
        );
    }

    #[test]
    fn cancel_drops_pending_records() {
        struct Guard(Arc<AtomicUsize>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let witness = dropped.clone();
        let recorder = Recorder::new(1);
        Flow::generate(move |co| async move {
            let _guard = Guard(witness);
            loop {
                co.emit(7).await?;
            }
        })
        .subscribe(recorder.clone());

        assert_eq!(recorder.items(), vec![7]);
        recorder.cancel();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        recorder.cancel();
        recorder.request(5);
        assert_eq!(recorder.items(), vec![7]);
        assert_eq!(recorder.terminal_count(), 0);
    }

    #[test]
    fn panics_become_errors() {
        let recorder = Recorder::<i32>::new(1);
        Flow::generate(|_co| async move { panic!("kaboom") }).subscribe(recorder.clone());
        assert_eq!(
            recorder.events(),
            vec![Event::Error("Producer panicked: kaboom".into())]
        );
    }

    #[test]
    fn children_share_the_downstream() {
        let recorder = Recorder::new(100);
        Flow::generate(|co| async move {
            for base in [10, 20] {
                let child = co.clone();
                co.spawn(async move {
                    child.emit(base).await?;
                    child.emit(base + 1).await
                });
            }
            Ok(())
        })
        .subscribe(recorder.clone());

        let mut items = recorder.items();
        items.sort();
        assert_eq!(items, vec![10, 11, 20, 21]);
        assert_eq!(recorder.events().last(), Some(&Event::Complete));
    }
}
