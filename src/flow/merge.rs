//! Fan-in: [`Flow::merge`] interleaves sources as they deliver,
//! [`Flow::concat`] drains them one after another.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::demand;
use crate::core::{Error, Subscriber, Subscription};
use crate::engine::producer::Emitter;
use crate::flow::Flow;

struct Sources {
    handles: Vec<Option<Arc<dyn Subscription>>>,
    live: usize,
    requested: u64,
}

struct MergeCore<T> {
    emitter: Emitter<T>,
    sources: Mutex<Sources>,
}

impl<T: Send + 'static> MergeCore<T> {
    fn cancel_sources(&self) {
        let handles: Vec<_> = {
            let mut sources = self.sources.lock();
            sources.live = 0;
            sources.handles.iter_mut().filter_map(Option::take).collect()
        };
        for handle in handles {
            handle.cancel();
        }
    }

    fn fail(&self, error: Error) {
        self.cancel_sources();
        self.emitter.error(error);
    }
}

impl<T: Send + 'static> Subscription for MergeCore<T> {
    fn request(&self, n: i64) {
        if !self.emitter.request(n) {
            if n < 0 {
                self.cancel_sources();
            }
            return;
        }
        let handles: Vec<_> = {
            let mut sources = self.sources.lock();
            sources.requested = sources.requested.saturating_add(n as u64);
            sources.handles.iter().flatten().cloned().collect()
        };
        for handle in handles {
            handle.request(n);
        }
    }

    fn cancel(&self) {
        if self.emitter.cancel() {
            self.cancel_sources();
        }
    }
}

struct MergeInner<T> {
    core: Arc<MergeCore<T>>,
    index: usize,
}

impl<T: Send + 'static> Subscriber<T> for MergeInner<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.core.emitter.is_terminating() {
            subscription.cancel();
            return;
        }
        let requested = {
            let mut sources = self.core.sources.lock();
            sources.handles[self.index] = Some(subscription.clone());
            sources.requested
        };
        if requested > 0 {
            subscription.request(demand::to_request(requested));
        }
    }

    fn on_next(&mut self, item: T) {
        self.core.emitter.offer(item);
    }

    fn on_error(&mut self, error: Error) {
        self.core.sources.lock().handles[self.index] = None;
        tracing::debug!(source = self.index, error = %error, "merged source failed");
        self.core.fail(error);
    }

    fn on_complete(&mut self) {
        let finished = {
            let mut sources = self.core.sources.lock();
            sources.handles[self.index] = None;
            sources.live = sources.live.saturating_sub(1);
            sources.live == 0
        };
        if finished {
            self.core.emitter.complete();
        }
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Subscribe to every flow at once and emit items in arrival order.
    ///
    /// Each request is forwarded unchanged to every live source, so sources
    /// may together over-deliver; the surplus is buffered. Completes once
    /// all sources have completed (immediately when there are none); the
    /// first error cancels the remaining sources.
    pub fn merge<I>(flows: I) -> Flow<T>
    where
        I: IntoIterator<Item = Flow<T>>,
    {
        let flows: Vec<Flow<T>> = flows.into_iter().collect();
        Flow::from_publisher(move |subscriber: Box<dyn Subscriber<T>>| {
            let core = Arc::new(MergeCore {
                emitter: Emitter::new(None),
                sources: Mutex::new(Sources {
                    handles: vec![None; flows.len()],
                    live: flows.len(),
                    requested: 0,
                }),
            });
            core.emitter.start(subscriber, core.clone());
            if flows.is_empty() {
                core.emitter.complete();
                return;
            }
            for (index, flow) in flows.into_iter().enumerate() {
                if core.emitter.is_terminating() {
                    break;
                }
                flow.subscribe(MergeInner {
                    core: core.clone(),
                    index,
                });
            }
        })
    }

    /// Emit every item of each flow in turn, subscribing to the next only
    /// once the previous one has completed.
    pub fn concat<I>(flows: I) -> Flow<T>
    where
        I: IntoIterator<Item = Flow<T>>,
    {
        let flows: Vec<Flow<T>> = flows.into_iter().collect();
        Flow::generate(move |co| async move {
            for flow in flows {
                co.emit_all(flow).await?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Recorder};

    #[test]
    fn completes_once_after_every_source() {
        let recorder = Recorder::new(10);
        Flow::merge(vec![
            Flow::from_iter(vec![1]),
            Flow::from_iter(vec![2]),
            Flow::from_iter(vec![3]),
        ])
        .subscribe(recorder.clone());

        let mut items = recorder.items();
        items.sort();
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(recorder.terminal_count(), 1);
        assert_eq!(recorder.events().last(), Some(&Event::Complete));
    }

    #[test]
    fn merge_of_nothing_completes_immediately() {
        let recorder = Recorder::<i32>::new(0);
        Flow::merge(Vec::new()).subscribe(recorder.clone());
        assert_eq!(recorder.events(), vec![Event::Complete]);
    }

    #[test]
    fn delivery_never_exceeds_demand() {
        let recorder = Recorder::new(0);
        Flow::merge(vec![
            Flow::from_iter(0..10),
            Flow::from_iter(10..20),
        ])
        .subscribe(recorder.clone());

        recorder.request(3);
        assert_eq!(recorder.items().len(), 3);
        recorder.request(2);
        assert_eq!(recorder.items().len(), 5);
        assert!(!recorder.is_terminated());
    }

    #[test]
    fn first_error_cancels_the_other_sources() {
        let recorder = Recorder::new(10);
        Flow::merge(vec![
            Flow::generate(|co| async move {
                loop {
                    co.emit(1).await?;
                }
            }),
            Flow::failed(Error::custom("broken")),
        ])
        .subscribe(recorder.clone());

        assert_eq!(
            recorder.events().last(),
            Some(&Event::Error("broken".into()))
        );
        assert_eq!(recorder.terminal_count(), 1);
    }

    #[test]
    fn concat_never_starts_sources_after_a_failure() {
        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = started.clone();
        let recorder = Recorder::new(10);
        Flow::concat(vec![
            Flow::from_iter(vec![1]),
            Flow::failed(Error::custom("stop")),
            Flow::generate(move |co| async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                co.emit(2).await
            }),
        ])
        .subscribe(recorder.clone());

        assert_eq!(
            recorder.events(),
            vec![Event::Next(1), Event::Error("stop".into())]
        );
        assert!(!started.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn concat_preserves_source_order() {
        let recorder = Recorder::new(1).request_on_next(1);
        Flow::concat(vec![
            Flow::from_iter(vec![1, 2]),
            Flow::empty(),
            Flow::from_iter(vec![3, 4]),
        ])
        .subscribe(recorder.clone());
        assert_eq!(
            recorder.events(),
            vec![
                Event::Next(1),
                Event::Next(2),
                Event::Next(3),
                Event::Next(4),
                Event::Complete
            ]
        );
    }
}
