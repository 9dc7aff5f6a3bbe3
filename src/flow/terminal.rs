//! Terminal consumers: subscribe, fold every item into one value, and
//! resolve a future exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::core::{Error, Result, Sink, Subscriber, Subscription, UNBOUNDED};
use crate::flow::Flow;

type Step<A, T> = Box<dyn FnMut(A, T) -> Result<ControlFlow<A, A>> + Send>;

#[derive(Default)]
struct LinkState {
    subscription: Option<Arc<dyn Subscription>>,
    dropped: bool,
}

/// Link between a terminal future and the subscription it drives.
#[derive(Default)]
struct Link {
    state: Mutex<LinkState>,
}

impl Link {
    /// Store `subscription` unless the terminal is already gone.
    fn attach(&self, subscription: &Arc<dyn Subscription>) -> bool {
        let mut st = self.state.lock();
        if st.dropped {
            return false;
        }
        st.subscription = Some(subscription.clone());
        true
    }

    fn detach(&self) {
        self.state.lock().subscription = None;
    }

    fn cancel(&self) {
        let subscription = self.state.lock().subscription.take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    fn drop_terminal(&self) {
        let subscription = {
            let mut st = self.state.lock();
            st.dropped = true;
            st.subscription.take()
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

struct FoldSubscriber<T, A> {
    acc: Option<A>,
    step: Step<A, T>,
    prefetch: i64,
    tx: Option<oneshot::Sender<Result<A>>>,
    link: Arc<Link>,
    _item: PhantomData<fn(T)>,
}

impl<T, A> FoldSubscriber<T, A> {
    fn settle(&mut self, result: Result<A>) {
        self.link.detach();
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

impl<T: Send + 'static, A: Send + 'static> Subscriber<T> for FoldSubscriber<T, A> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if !self.link.attach(&subscription) {
            subscription.cancel();
            return;
        }
        subscription.request(self.prefetch);
    }

    fn on_next(&mut self, item: T) {
        let Some(acc) = self.acc.take() else {
            return;
        };
        match (self.step)(acc, item) {
            Ok(ControlFlow::Continue(acc)) => self.acc = Some(acc),
            Ok(ControlFlow::Break(acc)) => {
                self.link.cancel();
                self.settle(Ok(acc));
            }
            Err(error) => {
                self.link.cancel();
                self.settle(Err(error));
            }
        }
    }

    fn on_error(&mut self, error: Error) {
        self.acc = None;
        self.settle(Err(error));
    }

    fn on_complete(&mut self) {
        match self.acc.take() {
            Some(acc) => self.settle(Ok(acc)),
            None => self.settle(Err(Error::Cancelled)),
        }
    }
}

/// Future resolving to the result of a terminal operation.
///
/// The flow is subscribed on first poll. Dropping the future before it
/// resolves cancels the flow.
#[must_use = "terminal operations do nothing unless awaited"]
pub struct Terminal<A> {
    start: Option<Box<dyn FnOnce() + Send>>,
    rx: oneshot::Receiver<Result<A>>,
    link: Arc<Link>,
}

// Nothing inside is structurally pinned.
impl<A> Unpin for Terminal<A> {}

impl<A: Send + 'static> Terminal<A> {
    fn new<T, F>(flow: Flow<T>, init: A, prefetch: i64, step: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(A, T) -> Result<ControlFlow<A, A>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let link = Arc::new(Link::default());
        let subscriber = FoldSubscriber {
            acc: Some(init),
            step: Box::new(step),
            prefetch,
            tx: Some(tx),
            link: link.clone(),
            _item: PhantomData,
        };
        Self {
            start: Some(Box::new(move || flow.subscribe(subscriber))),
            rx,
            link,
        }
    }
}

impl<A> Future for Terminal<A> {
    type Output = Result<A>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(start) = this.start.take() {
            start();
        }
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(closed)) => Poll::Ready(Err(closed.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<A> Drop for Terminal<A> {
    fn drop(&mut self) {
        self.link.drop_terminal();
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Combine every item into an accumulator.
    pub fn fold<A, F>(self, init: A, mut f: F) -> Terminal<A>
    where
        A: Send + 'static,
        F: FnMut(A, T) -> A + Send + 'static,
    {
        Terminal::new(self, init, UNBOUNDED, move |acc, item| {
            Ok(ControlFlow::Continue(f(acc, item)))
        })
    }

    /// Like [`fold`](Self::fold); an `Err` from `f` cancels the flow and
    /// resolves to that error.
    pub fn try_fold<A, F>(self, init: A, mut f: F) -> Terminal<A>
    where
        A: Send + 'static,
        F: FnMut(A, T) -> Result<A> + Send + 'static,
    {
        Terminal::new(self, init, UNBOUNDED, move |acc, item| {
            f(acc, item).map(ControlFlow::Continue)
        })
    }

    /// Fold using the first item as the initial value. `None` when empty.
    pub fn reduce<F>(self, mut f: F) -> Terminal<Option<T>>
    where
        F: FnMut(T, T) -> T + Send + 'static,
    {
        self.fold(None, move |acc, item| match acc {
            Some(acc) => Some(f(acc, item)),
            None => Some(item),
        })
    }

    pub fn to_vec(self) -> Terminal<Vec<T>> {
        self.fold(Vec::new(), |mut items, item| {
            items.push(item);
            items
        })
    }

    /// Collect into any `Default + Extend` container.
    pub fn collect<C>(self) -> Terminal<C>
    where
        C: Default + Extend<T> + Send + 'static,
    {
        self.fold(C::default(), |mut items, item| {
            items.extend(std::iter::once(item));
            items
        })
    }

    pub fn count(self) -> Terminal<usize> {
        self.fold(0, |n, _| n + 1)
    }

    /// The first item, requesting only one and cancelling after it.
    pub fn first(self) -> Terminal<Option<T>> {
        Terminal::new(self, None, 1, |_, item| Ok(ControlFlow::Break(Some(item))))
    }

    pub fn last(self) -> Terminal<Option<T>> {
        self.fold(None, |_, item| Some(item))
    }

    /// Whether some item satisfies `predicate`. Stops at the first match.
    pub fn any<F>(self, mut predicate: F) -> Terminal<bool>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Terminal::new(self, false, UNBOUNDED, move |_, item| {
            Ok(if predicate(&item) {
                ControlFlow::Break(true)
            } else {
                ControlFlow::Continue(false)
            })
        })
    }

    /// Whether every item satisfies `predicate`. Stops at the first miss.
    pub fn all<F>(self, mut predicate: F) -> Terminal<bool>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Terminal::new(self, true, UNBOUNDED, move |_, item| {
            Ok(if predicate(&item) {
                ControlFlow::Continue(true)
            } else {
                ControlFlow::Break(false)
            })
        })
    }

    /// Whether no item satisfies `predicate`. Stops at the first match.
    pub fn none<F>(self, mut predicate: F) -> Terminal<bool>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Terminal::new(self, true, UNBOUNDED, move |_, item| {
            Ok(if predicate(&item) {
                ControlFlow::Break(false)
            } else {
                ControlFlow::Continue(true)
            })
        })
    }

    pub fn min(self) -> Terminal<Option<T>>
    where
        T: Ord,
    {
        self.reduce(std::cmp::min)
    }

    pub fn max(self) -> Terminal<Option<T>>
    where
        T: Ord,
    {
        self.reduce(std::cmp::max)
    }

    /// Bucket items by `key`, keeping arrival order within each bucket.
    pub fn group_by<K, F>(self, mut key: F) -> Terminal<HashMap<K, Vec<T>>>
    where
        K: Eq + Hash + Send + 'static,
        F: FnMut(&T) -> K + Send + 'static,
    {
        self.fold(HashMap::new(), move |mut groups, item| {
            groups.entry(key(&item)).or_insert_with(Vec::new).push(item);
            groups
        })
    }

    /// Run `f` on every item.
    pub fn for_each<F>(self, mut f: F) -> Terminal<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        self.fold((), move |(), item| f(item))
    }

    /// Write every item into `sink`, awaiting each write before pulling the
    /// next, then call `finish`.
    pub async fn sink<S>(self, mut sink: S) -> Result<()>
    where
        S: Sink<Item = T>,
    {
        use tokio_stream::StreamExt;

        let mut stream = self.into_stream();
        while let Some(item) = stream.next().await {
            sink.write(item?).await?;
        }
        sink.finish().await
    }
}
