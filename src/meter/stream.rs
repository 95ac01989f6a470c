use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;
use pin_project_lite::pin_project;

use super::{UsageExtractor, UsageTokens};

pin_project! {
    /// Pass-through byte stream that meters what flows through it.
    ///
    /// Every upstream chunk is yielded downstream unchanged; the embedded
    /// [`UsageExtractor`] observes it on the way past. When the upstream
    /// stream ends cleanly the finalizer runs exactly once with the
    /// accumulated usage and model. Upstream errors and client disconnects
    /// (dropping the stream) disarm the finalizer: no usage is reported for
    /// a response that did not complete.
    pub struct MeteredStream<S, F> {
        #[pin]
        inner: S,
        extractor: UsageExtractor,
        on_complete: Option<F>,
    }
}

impl<S, F> MeteredStream<S, F>
where
    F: FnOnce(UsageTokens, Option<String>),
{
    pub fn new(inner: S, on_complete: F) -> Self {
        Self {
            inner,
            extractor: UsageExtractor::new(),
            on_complete: Some(on_complete),
        }
    }
}

impl<S, E, F> Stream for MeteredStream<S, F>
where
    S: Stream<Item = Result<Bytes, E>>,
    F: FnOnce(UsageTokens, Option<String>),
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.extractor.push_chunk(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.on_complete.take();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if let Some(finish) = this.on_complete.take() {
                    this.extractor.finish();
                    let model = this.extractor.model().map(String::from);
                    finish(this.extractor.usage(), model);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
