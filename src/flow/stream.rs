use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::core::Result;
use crate::engine::pull::Pull;

/// A flow consumed as a [`Stream`] of results.
///
/// Items are requested in batches as the stream is polled. An upstream
/// error is yielded once, after which the stream ends. Dropping the stream
/// cancels the flow.
pub struct FlowStream<T> {
    pull: Pull<T>,
}

impl<T: Send + 'static> FlowStream<T> {
    pub(crate) fn new(pull: Pull<T>) -> Self {
        Self { pull }
    }
}

impl<T: Send + 'static> Stream for FlowStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.pull.poll_has_next(cx) {
            Poll::Ready(true) => Poll::Ready(Some(this.pull.next())),
            Poll::Ready(false) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use crate::core::Error;
    use crate::flow::Flow;

    #[tokio::test]
    async fn yields_items_then_the_error_once() {
        let mut stream = Flow::generate(|co| async move {
            co.emit(1).await?;
            Err(Error::custom("broken pipe"))
        })
        .into_stream();

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_adapters_compose() {
        let doubled: Vec<i64> = Flow::range(0..5)
            .into_stream()
            .map(|item| item.map(|x| x * 2))
            .collect::<Result<Vec<_>, _>>()
            .await
            .unwrap();
        assert_eq!(doubled, vec![0, 2, 4, 6, 8]);
    }
}
