//! Recording subscriber used by the unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{Error, Subscriber, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event<T> {
    Next(T),
    Error(String),
    Complete,
}

struct Inner<T> {
    events: Vec<Event<T>>,
    subscription: Option<Arc<dyn Subscription>>,
}

/// Subscriber that records every event and exposes its subscription.
pub(crate) struct Recorder<T> {
    inner: Arc<Mutex<Inner<T>>>,
    initial: i64,
    per_item: i64,
    cancel_after: Option<usize>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            initial: self.initial,
            per_item: self.per_item,
            cancel_after: self.cancel_after,
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    /// Requests `initial` items on subscribe.
    pub(crate) fn new(initial: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                events: Vec::new(),
                subscription: None,
            })),
            initial,
            per_item: 0,
            cancel_after: None,
        }
    }

    /// Re-request `n` from inside every `on_next`.
    pub(crate) fn request_on_next(mut self, n: i64) -> Self {
        self.per_item = n;
        self
    }

    /// Cancel from inside `on_next` once `n` items have arrived.
    pub(crate) fn cancel_after(mut self, n: usize) -> Self {
        self.cancel_after = Some(n);
        self
    }

    pub(crate) fn request(&self, n: i64) {
        let subscription = self.inner.lock().subscription.clone();
        if let Some(subscription) = subscription {
            subscription.request(n);
        }
    }

    pub(crate) fn cancel(&self) {
        let subscription = self.inner.lock().subscription.clone();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    pub(crate) fn events(&self) -> Vec<Event<T>> {
        self.inner.lock().events.clone()
    }

    pub(crate) fn items(&self) -> Vec<T> {
        self.inner
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                Event::Next(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.inner
            .lock()
            .events
            .iter()
            .any(|event| !matches!(event, Event::Next(_)))
    }

    pub(crate) fn terminal_count(&self) -> usize {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|event| !matches!(event, Event::Next(_)))
            .count()
    }
}

impl<T: Clone + Send + 'static> Subscriber<T> for Recorder<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.inner.lock().subscription = Some(subscription.clone());
        if self.initial != 0 {
            subscription.request(self.initial);
        }
    }

    fn on_next(&mut self, item: T) {
        let (subscription, seen) = {
            let mut inner = self.inner.lock();
            inner.events.push(Event::Next(item));
            let seen = inner
                .events
                .iter()
                .filter(|event| matches!(event, Event::Next(_)))
                .count();
            (inner.subscription.clone(), seen)
        };
        if self.cancel_after == Some(seen) {
            if let Some(subscription) = subscription {
                subscription.cancel();
            }
            return;
        }
        if self.per_item > 0 {
            if let Some(subscription) = subscription {
                subscription.request(self.per_item);
            }
        }
    }

    fn on_error(&mut self, error: Error) {
        let mut inner = self.inner.lock();
        inner.events.push(Event::Error(error.to_string()));
        inner.subscription = None;
    }

    fn on_complete(&mut self) {
        let mut inner = self.inner.lock();
        inner.events.push(Event::Complete);
        inner.subscription = None;
    }
}
