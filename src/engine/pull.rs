//! Pull-side view of a flow: a batched iterator with watermark refill.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::core::demand;
use crate::core::{Error, Result, Subscriber, Subscription};
use crate::flow::Flow;

/// Upper bound on how far downstream demand can grow a batch.
pub const MAX_BATCH_GROWTH: u64 = 256;

struct State<T> {
    queue: VecDeque<T>,
    in_flight: u64,
    finished: bool,
    dropped: bool,
    failure: Option<Error>,
    subscription: Option<Arc<dyn Subscription>>,
    waker: Option<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    batch_size: u64,
    hint: Option<Arc<AtomicU64>>,
}

impl<T> Shared<T> {
    fn batch(&self) -> u64 {
        let hint = self
            .hint
            .as_ref()
            .map(|h| h.load(Ordering::Relaxed).min(MAX_BATCH_GROWTH))
            .unwrap_or(0);
        self.batch_size.max(hint).max(1)
    }

    /// Request another full batch once queued plus in-flight items fall
    /// below half a batch.
    fn refill(&self, st: &mut State<T>) -> Option<(Arc<dyn Subscription>, i64)> {
        if st.finished {
            return None;
        }
        let batch = self.batch();
        let held = (st.queue.len() as u64).saturating_add(st.in_flight);
        if held.saturating_mul(2) >= batch {
            return None;
        }
        let subscription = st.subscription.clone()?;
        st.in_flight += batch;
        Some((subscription, demand::to_request(batch)))
    }
}

/// Consumer-side iterator over a flow.
///
/// Subscribes on first use and requests one batch. Each time the number of
/// queued plus outstanding items drops below half a batch it requests another
/// batch. Upstream errors are raised after queued items are consumed.
/// Dropping the iterator cancels upstream.
pub struct Pull<T> {
    shared: Arc<Shared<T>>,
    upstream: Option<Flow<T>>,
}

impl<T: Send + 'static> Pull<T> {
    /// Iterate over `flow`, requesting `batch_size` items at a time, or the
    /// value of `hint` when that is larger (up to [`MAX_BATCH_GROWTH`]).
    pub fn new(flow: Flow<T>, batch_size: usize, hint: Option<Arc<AtomicU64>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    in_flight: 0,
                    finished: false,
                    dropped: false,
                    failure: None,
                    subscription: None,
                    waker: None,
                }),
                batch_size: batch_size as u64,
                hint,
            }),
            upstream: Some(flow),
        }
    }

    /// Poll whether another item (or a pending error) is available.
    pub fn poll_has_next(&mut self, cx: &mut Context<'_>) -> Poll<bool> {
        if let Some(flow) = self.upstream.take() {
            flow.subscribe_boxed(Box::new(PullSubscriber {
                shared: self.shared.clone(),
            }));
        }
        let mut st = self.shared.state.lock();
        if !st.queue.is_empty() || st.failure.is_some() {
            return Poll::Ready(true);
        }
        if st.finished {
            return Poll::Ready(false);
        }
        st.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Wait until an item is available or upstream has finished.
    ///
    /// Returns true when the following [`next`](Self::next) will yield an
    /// item or raise the upstream error.
    pub async fn has_next(&mut self) -> bool {
        futures::future::poll_fn(|cx| self.poll_has_next(cx)).await
    }

    /// Take the next queued item.
    ///
    /// Raises the upstream error once the queue is empty, and
    /// [`Error::Exhausted`] when nothing is available.
    pub fn next(&mut self) -> Result<T> {
        let (item, refill) = {
            let mut st = self.shared.state.lock();
            match st.queue.pop_front() {
                Some(item) => {
                    let refill = self.shared.refill(&mut st);
                    (item, refill)
                }
                None => return Err(st.failure.take().unwrap_or(Error::Exhausted)),
            }
        };
        if let Some((subscription, n)) = refill {
            subscription.request(n);
        }
        Ok(item)
    }

    /// `has_next` followed by `next`.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        if self.has_next().await {
            self.next().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<T> Drop for Pull<T> {
    fn drop(&mut self) {
        let subscription = {
            let mut st = self.shared.state.lock();
            st.dropped = true;
            st.queue.clear();
            if st.finished {
                None
            } else {
                st.subscription.take()
            }
        };
        if let Some(subscription) = subscription {
            tracing::trace!("pull dropped, cancelling upstream");
            subscription.cancel();
        }
    }
}

struct PullSubscriber<T> {
    shared: Arc<Shared<T>>,
}

impl<T> PullSubscriber<T> {
    fn wake(waker: Option<Waker>) {
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for PullSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let batch = self.shared.batch();
        let dropped = {
            let mut st = self.shared.state.lock();
            if !st.dropped {
                st.subscription = Some(subscription.clone());
                st.in_flight = batch;
            }
            st.dropped
        };
        if dropped {
            subscription.cancel();
            return;
        }
        subscription.request(demand::to_request(batch));
    }

    fn on_next(&mut self, item: T) {
        let waker = {
            let mut st = self.shared.state.lock();
            if st.dropped {
                return;
            }
            st.queue.push_back(item);
            st.in_flight = st.in_flight.saturating_sub(1);
            st.waker.take()
        };
        Self::wake(waker);
    }

    fn on_error(&mut self, error: Error) {
        let waker = {
            let mut st = self.shared.state.lock();
            st.finished = true;
            st.subscription = None;
            st.failure = Some(error);
            st.waker.take()
        };
        Self::wake(waker);
    }

    fn on_complete(&mut self) {
        let waker = {
            let mut st = self.shared.state.lock();
            st.finished = true;
            st.subscription = None;
            st.waker.take()
        };
        Self::wake(waker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::producer::Emitter;
    use parking_lot::Mutex as SyncMutex;

    /// Counts upward on demand and records every request it receives.
    struct Counter {
        emitter: Arc<Emitter<i64>>,
        requests: Arc<SyncMutex<Vec<i64>>>,
        next: SyncMutex<i64>,
        limit: i64,
    }

    impl Subscription for Counter {
        fn request(&self, n: i64) {
            self.requests.lock().push(n);
            if !self.emitter.request(n) {
                return;
            }
            for _ in 0..n {
                let value = {
                    let mut next = self.next.lock();
                    if *next >= self.limit {
                        None
                    } else {
                        *next += 1;
                        Some(*next - 1)
                    }
                };
                match value {
                    Some(value) => {
                        self.emitter.offer(value);
                    }
                    None => {
                        self.emitter.complete();
                        return;
                    }
                }
            }
        }

        fn cancel(&self) {
            self.emitter.cancel();
        }
    }

    fn recording(limit: i64, requests: Arc<SyncMutex<Vec<i64>>>) -> Flow<i64> {
        Flow::from_publisher(move |subscriber: Box<dyn Subscriber<i64>>| {
            let emitter = Arc::new(Emitter::new(None));
            let counter = Arc::new(Counter {
                emitter: emitter.clone(),
                requests,
                next: SyncMutex::new(0),
                limit,
            });
            emitter.start(subscriber, counter);
        })
    }

    fn poll_ready<T: Send + 'static>(pull: &mut Pull<T>) -> bool {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match pull.poll_has_next(&mut cx) {
            Poll::Ready(ready) => ready,
            Poll::Pending => panic!("upstream is synchronous"),
        }
    }

    #[test]
    fn refills_below_the_low_watermark() {
        let requests = Arc::new(SyncMutex::new(Vec::new()));
        let mut pull = Pull::new(recording(100, requests.clone()), 4, None);

        assert!(poll_ready(&mut pull));
        assert_eq!(*requests.lock(), vec![4]);

        assert_eq!(pull.next().unwrap(), 0);
        assert_eq!(pull.next().unwrap(), 1);
        // two still queued: not yet below the watermark
        assert_eq!(*requests.lock(), vec![4]);

        assert_eq!(pull.next().unwrap(), 2);
        assert_eq!(*requests.lock(), vec![4, 4]);
    }

    #[test]
    fn raises_exhausted_past_the_end() {
        let requests = Arc::new(SyncMutex::new(Vec::new()));
        let mut pull = Pull::new(recording(2, requests), 8, None);
        assert!(poll_ready(&mut pull));
        assert_eq!(pull.next().unwrap(), 0);
        assert_eq!(pull.next().unwrap(), 1);
        assert!(!poll_ready(&mut pull));
        assert!(matches!(pull.next(), Err(Error::Exhausted)));
    }

    #[test]
    fn batch_grows_with_the_hint() {
        let requests = Arc::new(SyncMutex::new(Vec::new()));
        let hint = Arc::new(AtomicU64::new(32));
        let mut pull = Pull::new(recording(100, requests.clone()), 4, Some(hint));
        assert!(poll_ready(&mut pull));
        assert_eq!(*requests.lock(), vec![32]);
    }

    #[test]
    fn unbounded_hint_is_capped() {
        let requests = Arc::new(SyncMutex::new(Vec::new()));
        let hint = Arc::new(AtomicU64::new(i64::MAX as u64));
        let mut pull = Pull::new(recording(10_000, requests.clone()), 4, Some(hint));
        assert!(poll_ready(&mut pull));
        assert_eq!(*requests.lock(), vec![MAX_BATCH_GROWTH as i64]);
        assert_eq!(pull.shared.state.lock().queue.len(), MAX_BATCH_GROWTH as usize);
    }

    #[test]
    fn queued_items_precede_the_error() {
        let flow = Flow::generate(|co| async move {
            co.emit(1).await?;
            co.emit(2).await?;
            Err(Error::custom("late"))
        });
        let mut pull = Pull::new(flow, 8, None);
        assert!(poll_ready(&mut pull));
        assert_eq!(pull.next().unwrap(), 1);
        assert_eq!(pull.next().unwrap(), 2);
        assert!(poll_ready(&mut pull));
        assert_eq!(pull.next().unwrap_err().to_string(), "late");
        assert!(!poll_ready(&mut pull));
    }

    #[test]
    fn drop_cancels_upstream() {
        let requests = Arc::new(SyncMutex::new(Vec::new()));
        let mut pull = Pull::new(recording(1_000, requests.clone()), 4, None);
        assert!(poll_ready(&mut pull));
        let subscription = pull.shared.state.lock().subscription.clone().unwrap();
        drop(pull);
        // a cancelled upstream rejects further demand before producing
        subscription.request(10);
        assert_eq!(*requests.lock(), vec![4, 10]);
    }
}
