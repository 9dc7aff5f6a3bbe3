//! Demand-aware delivery base shared by every producer.
//!
//! An [`Emitter`] owns the downstream subscriber, the demand counter and the
//! buffer of produced-but-undelivered items. All three live behind one lock.
//! Calls into the subscriber happen outside that lock but are serialized by an
//! `emitting` flag claimed inside it: whichever thread claims the flag drains
//! everything that became deliverable, including work added concurrently or
//! re-entrantly from `on_next`, before releasing it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::Waker;

use parking_lot::Mutex;

use crate::core::demand::{self, Demand};
use crate::core::{Error, Subscriber, Subscription};
use crate::metrics;

/// What happened to an item handed to [`Emitter::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handover {
    /// The subscriber received it
    Delivered,
    /// It sits in the buffer waiting for demand
    Pending,
    /// The emitter is terminated; the item was dropped
    Closed,
}

struct State<T> {
    demand: Demand,
    buffer: VecDeque<T>,
    failure: Option<Error>,
    completing: bool,
    released: bool,
    emitting: bool,
    enqueued: u64,
    delivered: u64,
}

enum Step<T> {
    Next(T),
    Error(Error),
    Complete,
    Release,
}

pub(crate) struct Emitter<T> {
    state: Mutex<State<T>>,
    sink: Mutex<Option<Box<dyn Subscriber<T>>>>,
    resume: Option<Waker>,
}

impl<T: Send> Emitter<T> {
    /// Create an emitter. `resume` is woken whenever a drain pass made
    /// progress, so a producer suspended on delivery can continue.
    pub(crate) fn new(resume: Option<Waker>) -> Self {
        Self {
            state: Mutex::new(State {
                demand: Demand::Unsubscribed,
                buffer: VecDeque::new(),
                failure: None,
                completing: false,
                released: false,
                emitting: false,
                enqueued: 0,
                delivered: 0,
            }),
            sink: Mutex::new(None),
            resume,
        }
    }

    /// Attach the downstream subscriber and hand it `subscription`.
    ///
    /// Requests made from inside `on_subscribe` are accounted immediately, but
    /// delivery starts only once `on_subscribe` has returned.
    pub(crate) fn start(&self, subscriber: Box<dyn Subscriber<T>>, subscription: Arc<dyn Subscription>) {
        {
            let mut st = self.state.lock();
            st.emitting = true;
            if st.demand == Demand::Unsubscribed {
                st.demand = Demand::Open(0);
            }
        }
        {
            let mut sink = self.sink.lock();
            let subscriber = sink.insert(subscriber);
            subscriber.on_subscribe(subscription);
        }
        tracing::trace!("subscriber attached");
        self.emit_loop();
    }

    /// Add `n` to the demand and deliver what it allows.
    ///
    /// Returns false if the request was ignored (terminated emitter) or was a
    /// contract violation, in which case the emitter has failed.
    pub(crate) fn request(&self, n: i64) -> bool {
        let Some(amount) = demand::amount(n) else {
            tracing::debug!(n, "negative demand requested");
            self.error(Error::IllegalDemand(n));
            return false;
        };
        {
            let mut st = self.state.lock();
            if st.demand.is_closed() {
                return false;
            }
            st.demand.add(amount);
        }
        tracing::trace!(n, "demand requested");
        metrics::requested(amount);
        self.drain();
        true
    }

    /// Close the emitter and discard the buffer. Returns true only for the
    /// call that performed the transition.
    pub(crate) fn cancel(&self) -> bool {
        let discarded = {
            let mut st = self.state.lock();
            if !st.demand.close() {
                // a failure still flushing its covered items is cut short
                let flushing = st.failure.take().map(|_| std::mem::take(&mut st.buffer));
                drop(st);
                drop(flushing);
                return false;
            }
            st.completing = false;
            std::mem::take(&mut st.buffer)
        };
        drop(discarded);
        tracing::trace!("subscription cancelled");
        metrics::cancelled();
        self.drain();
        true
    }

    /// Terminate with `error`.
    ///
    /// Buffered items already covered by demand are delivered first; the
    /// rest are discarded.
    pub(crate) fn error(&self, error: Error) -> bool {
        let discarded = {
            let mut st = self.state.lock();
            if st.demand.is_closed() || st.completing {
                return false;
            }
            let covered = st.demand.available().min(st.buffer.len() as u64) as usize;
            st.demand.close();
            st.failure = Some(error);
            st.buffer.split_off(covered)
        };
        drop(discarded);
        metrics::failed();
        self.drain();
        true
    }

    /// Complete once every buffered item has been delivered.
    pub(crate) fn complete(&self) -> bool {
        {
            let mut st = self.state.lock();
            if st.demand.is_closed() || st.completing {
                return false;
            }
            st.completing = true;
        }
        self.drain();
        true
    }

    /// Buffer `item` and deliver whatever demand allows.
    pub(crate) fn offer(&self, item: T) -> Handover {
        match self.push(item) {
            Some(ticket) => {
                self.drain();
                self.status(ticket)
            }
            None => Handover::Closed,
        }
    }

    /// Buffer `item` without draining. Returns its delivery ticket.
    pub(crate) fn push(&self, item: T) -> Option<u64> {
        let mut st = self.state.lock();
        if st.demand.is_closed() || st.completing {
            return None;
        }
        let ticket = st.enqueued;
        st.enqueued += 1;
        st.buffer.push_back(item);
        Some(ticket)
    }

    /// Whether the item holding `ticket` has reached the subscriber.
    pub(crate) fn status(&self, ticket: u64) -> Handover {
        let st = self.state.lock();
        if st.delivered > ticket {
            Handover::Delivered
        } else if st.demand.is_closed() {
            Handover::Closed
        } else {
            Handover::Pending
        }
    }

    /// Demand not already spoken for by buffered items.
    pub(crate) fn available(&self) -> u64 {
        let st = self.state.lock();
        if st.completing {
            return 0;
        }
        st.demand.available().saturating_sub(st.buffer.len() as u64)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().demand.is_closed()
    }

    /// True once a terminal signal was issued (pending or delivered).
    pub(crate) fn is_terminating(&self) -> bool {
        let st = self.state.lock();
        st.demand.is_closed() || st.completing
    }

    /// Claim the emitting flag and run the drain loop, unless another call
    /// already holds it; that call will pick up our work.
    pub(crate) fn drain(&self) {
        {
            let mut st = self.state.lock();
            if st.emitting {
                return;
            }
            st.emitting = true;
        }
        self.emit_loop();
    }

    fn emit_loop(&self) {
        let mut progressed = false;
        loop {
            let step = {
                let mut st = self.state.lock();
                if st.failure.is_some() {
                    match st.buffer.pop_front() {
                        Some(item) => {
                            st.delivered += 1;
                            Step::Next(item)
                        }
                        None => {
                            st.released = true;
                            match st.failure.take() {
                                Some(error) => Step::Error(error),
                                None => continue,
                            }
                        }
                    }
                } else if st.demand.is_closed() {
                    if st.released {
                        st.emitting = false;
                        break;
                    }
                    st.released = true;
                    Step::Release
                } else if st.demand.available() > 0 && !st.buffer.is_empty() {
                    match st.buffer.pop_front() {
                        Some(item) => {
                            st.demand.take_one();
                            st.delivered += 1;
                            Step::Next(item)
                        }
                        None => continue,
                    }
                } else if st.completing && st.buffer.is_empty() {
                    st.completing = false;
                    st.demand.close();
                    st.released = true;
                    Step::Complete
                } else {
                    st.emitting = false;
                    break;
                }
            };
            progressed = true;

            match step {
                Step::Next(item) => {
                    if let Some(subscriber) = self.sink.lock().as_mut() {
                        subscriber.on_next(item);
                        metrics::delivered();
                    }
                }
                Step::Error(error) => {
                    let subscriber = self.sink.lock().take();
                    if let Some(mut subscriber) = subscriber {
                        tracing::debug!(error = %error, "delivering terminal error");
                        subscriber.on_error(error);
                    }
                }
                Step::Complete => {
                    let subscriber = self.sink.lock().take();
                    if let Some(mut subscriber) = subscriber {
                        tracing::trace!("delivering completion");
                        subscriber.on_complete();
                    }
                }
                Step::Release => {
                    let subscriber = self.sink.lock().take();
                    drop(subscriber);
                }
            }
        }

        if progressed {
            if let Some(resume) = &self.resume {
                resume.wake_by_ref();
            }
        }
    }
}

impl<T: Send> Subscription for Emitter<T> {
    fn request(&self, n: i64) {
        Emitter::request(self, n);
    }

    fn cancel(&self) {
        Emitter::cancel(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Recorder};

    fn attached(initial: i64) -> (Arc<Emitter<i32>>, Recorder<i32>) {
        let emitter = Arc::new(Emitter::new(None));
        let recorder = Recorder::new(initial);
        emitter.start(Box::new(recorder.clone()), emitter.clone());
        (emitter, recorder)
    }

    #[test]
    fn delivers_no_more_than_requested() {
        let (emitter, recorder) = attached(2);
        for i in 0..5 {
            emitter.offer(i);
        }
        assert_eq!(recorder.items(), vec![0, 1]);

        emitter.request(1);
        assert_eq!(recorder.items(), vec![0, 1, 2]);
    }

    #[test]
    fn buffered_items_drain_oldest_first() {
        let (emitter, recorder) = attached(0);
        assert_eq!(emitter.offer(10), Handover::Pending);
        assert_eq!(emitter.offer(20), Handover::Pending);
        assert!(recorder.items().is_empty());

        emitter.request(5);
        assert_eq!(recorder.items(), vec![10, 20]);
        assert_eq!(emitter.available(), 3);
        assert_eq!(emitter.offer(30), Handover::Delivered);
    }

    #[test]
    fn completion_waits_for_the_buffer() {
        let (emitter, recorder) = attached(0);
        emitter.offer(1);
        emitter.complete();
        assert!(!recorder.is_terminated());

        emitter.request(1);
        assert_eq!(recorder.events(), vec![Event::Next(1), Event::Complete]);
    }

    #[test]
    fn error_discards_buffer_and_is_single() {
        let (emitter, recorder) = attached(0);
        emitter.offer(1);
        assert!(emitter.error(Error::custom("boom")));
        assert!(!emitter.error(Error::custom("again")));
        assert!(!emitter.complete());
        emitter.request(10);
        assert_eq!(recorder.events(), vec![Event::Error("boom".into())]);
    }

    #[test]
    fn error_delivers_items_demand_already_covers() {
        let (emitter, recorder) = attached(2);
        for i in 1..=3 {
            emitter.push(i);
        }
        assert!(emitter.error(Error::custom("late")));
        assert_eq!(
            recorder.events(),
            vec![Event::Next(1), Event::Next(2), Event::Error("late".into())]
        );
    }

    #[test]
    fn cancel_during_error_flush_suppresses_the_error() {
        let emitter = Arc::new(Emitter::new(None));
        let recorder = Recorder::new(5).cancel_after(1);
        emitter.start(Box::new(recorder.clone()), emitter.clone());
        emitter.push(1);
        emitter.push(2);
        emitter.error(Error::custom("late"));
        assert_eq!(recorder.events(), vec![Event::Next(1)]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (emitter, recorder) = attached(0);
        emitter.offer(1);
        assert!(emitter.cancel());
        assert!(!emitter.cancel());
        assert_eq!(emitter.offer(2), Handover::Closed);
        emitter.request(3);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn negative_request_fails_the_subscription() {
        let (emitter, recorder) = attached(0);
        assert!(!emitter.request(-3));
        assert_eq!(
            recorder.events(),
            vec![Event::Error(Error::IllegalDemand(-3).to_string())]
        );
    }

    #[test]
    fn reentrant_request_from_on_next_is_drained() {
        let emitter = Arc::new(Emitter::new(None));
        let recorder = Recorder::new(1).request_on_next(1);
        emitter.start(Box::new(recorder.clone()), emitter.clone());
        for i in 0..4 {
            emitter.push(i);
        }
        emitter.drain();
        assert_eq!(recorder.items(), vec![0, 1, 2, 3]);
    }
}
