//! Forwards an upstream response body to the client while skimming it into
//! a capped analytics sample, without buffering the whole body in memory.
//!
//! `cm_domain::stream::BoxStream` exists for exactly this: the proxy never
//! decodes provider streaming formats, it forwards chunks through and only
//! peeks at the leading bytes up to `analytics_cap_bytes`.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use cm_domain::stream::BoxStream;
use futures_core::Stream;
use tokio::sync::oneshot;

#[derive(Default)]
pub struct ResponseSample {
    pub data: Vec<u8>,
    pub truncated: bool,
}

impl ResponseSample {
    fn push(&mut self, chunk: &[u8], cap_bytes: usize) {
        if self.data.len() >= cap_bytes {
            self.truncated = true;
            return;
        }
        let remaining = cap_bytes - self.data.len();
        if chunk.len() > remaining {
            self.data.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
        } else {
            self.data.extend_from_slice(chunk);
        }
    }
}

/// A through-stream that samples every chunk as it passes and delivers the
/// final sample over `done` once the inner stream ends (or errors).
struct SamplingStream {
    inner: BoxStream<'static, Result<Bytes, std::io::Error>>,
    sample: ResponseSample,
    cap_bytes: usize,
    done: Option<oneshot::Sender<ResponseSample>>,
}

impl Stream for SamplingStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => this.sample.push(chunk, this.cap_bytes),
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                if let Some(tx) = this.done.take() {
                    let sample = std::mem::take(&mut this.sample);
                    let _ = tx.send(sample);
                }
            }
            Poll::Pending => {}
        }
        polled
    }
}

/// Wrap an upstream reqwest response's byte stream for forwarding. Returns
/// the wrapped stream (hand to `axum::body::Body::from_stream`) and a
/// receiver that resolves with the captured analytics sample once the body
/// has finished streaming to the client.
pub fn sample_while_forwarding(
    upstream: reqwest::Response,
    cap_bytes: usize,
) -> (BoxStream<'static, Result<Bytes, std::io::Error>>, oneshot::Receiver<ResponseSample>) {
    use futures_util::StreamExt;

    let (tx, rx) = oneshot::channel();
    let inner: BoxStream<'static, Result<Bytes, std::io::Error>> = Box::pin(
        upstream
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
    );
    let stream = SamplingStream {
        inner,
        sample: ResponseSample::default(),
        cap_bytes,
        done: Some(tx),
    };
    (Box::pin(stream), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn sample_truncates_and_completes_after_stream_ends() {
        let mut sample = ResponseSample::default();
        sample.push(b"hello world", 5);
        assert_eq!(sample.data, b"hello");
        assert!(sample.truncated);
    }

    #[tokio::test]
    async fn sampling_stream_forwards_every_chunk_unmodified() {
        let (tx, rx) = oneshot::channel::<ResponseSample>();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];
        let inner: BoxStream<'static, Result<Bytes, std::io::Error>> = Box::pin(futures_util::stream::iter(chunks));
        let mut stream = SamplingStream {
            inner,
            sample: ResponseSample::default(),
            cap_bytes: 100,
            done: Some(tx),
        };

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.push(chunk.unwrap());
        }
        assert_eq!(collected.len(), 2);

        let sample = rx.await.unwrap();
        assert_eq!(sample.data, b"abcdef");
        assert!(!sample.truncated);
    }
}
