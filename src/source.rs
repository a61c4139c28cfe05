//! Uniform chunk source over inbound response bodies.
//!
//! A response body arrives in one of two shapes:
//!
//! * **pull**: the body hands out the next chunk when asked for it, like
//!   [`reqwest::Response::chunk`];
//! * **push**: a producer delivers chunks on its own schedule into a bounded
//!   channel. The producer is paused while the channel is full and resumed
//!   once the consumer has taken a chunk out.
//!
//! The bundled HTTP client produces pull bodies. Push bodies are for
//! [`Transport`](crate::http::Transport) implementations built on
//! callback-style clients, which feed them through [`Body::channel`].
//!
//! [`ByteSource`] picks the matching strategy once, when it is created from
//! a [`Body`], and from then on offers a single `next_chunk` interface.
//!
//! # Example
//!
//! ```rust
//! let mut source = ByteSource::from(response.body);
//! while let Some(chunk) = source.next_chunk().await? {
//!     sink.write_all(&chunk).await?;
//! }
//! ```

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// A body that yields its next chunk on request.
#[async_trait]
pub trait PullBody: Send {
    /// Returns the next chunk, or `None` at the end of the body.
    async fn chunk(&mut self) -> Result<Option<Bytes>>;
}

#[async_trait]
impl PullBody for reqwest::Response {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        reqwest::Response::chunk(self)
            .await
            .map_err(Error::data_loss)
    }
}

/// Producer half of a push-shaped body.
pub type ChunkSender = mpsc::Sender<io::Result<Bytes>>;

/// An inbound response body in one of its two shapes.
pub enum Body {
    Pull(Box<dyn PullBody>),
    Push(mpsc::Receiver<io::Result<Bytes>>),
}

impl Body {
    /// Creates a push-shaped body with room for `capacity` chunks in flight.
    ///
    /// Sending suspends while the body is full and fails once the consumer
    /// has stopped reading.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn channel(capacity: usize) -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::Push(rx))
    }

    /// Wraps a pull-shaped body.
    pub fn pull<B: PullBody + 'static>(body: B) -> Self {
        Self::Pull(Box::new(body))
    }
}

impl From<reqwest::Response> for Body {
    fn from(response: reqwest::Response) -> Self {
        Self::pull(response)
    }
}

enum Strategy {
    Pull(Box<dyn PullBody>),
    Push(mpsc::Receiver<io::Result<Bytes>>),
    Stopped,
}

/// Pull-style chunk iterator over either body shape.
pub struct ByteSource {
    strategy: Strategy,
    received: u64,
}

impl ByteSource {
    /// Returns the next chunk, or `None` once the body is exhausted or the
    /// source was stopped.
    ///
    /// Empty chunks are skipped.
    ///
    /// # Errors
    ///
    /// Returns a `DataLoss` error when the body broke off.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let next = match &mut self.strategy {
                Strategy::Pull(body) => body.chunk().await?,
                Strategy::Push(rx) => match rx.recv().await {
                    Some(Ok(chunk)) => Some(chunk),
                    Some(Err(e)) => return Err(Error::data_loss(e)),
                    None => None,
                },
                Strategy::Stopped => None,
            };

            match next {
                Some(chunk) if chunk.is_empty() => {}
                Some(chunk) => {
                    self.received += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                None => {
                    self.strategy = Strategy::Stopped;
                    return Ok(None);
                }
            }
        }
    }

    /// Stops production. A pull body is dropped, which aborts the underlying
    /// connection; a push producer sees its next send fail.
    pub fn stop(&mut self) {
        if let Strategy::Push(rx) = &mut self.strategy {
            rx.close();
        }
        self.strategy = Strategy::Stopped;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self.strategy, Strategy::Stopped)
    }

    /// Total number of bytes handed out so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }
}

impl From<Body> for ByteSource {
    fn from(body: Body) -> Self {
        let strategy = match body {
            Body::Pull(body) => Strategy::Pull(body),
            Body::Push(rx) => Strategy::Push(rx),
        };

        Self {
            strategy,
            received: 0,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::error::ErrorKind;

    /// Pull body replaying a fixed list of chunks.
    pub(crate) struct Chunks(pub VecDeque<Result<Bytes>>);

    impl Chunks {
        pub(crate) fn new<I, T>(chunks: I) -> Self
        where
            I: IntoIterator<Item = T>,
            T: Into<Bytes>,
        {
            Self(chunks.into_iter().map(|c| Ok(c.into())).collect())
        }
    }

    #[async_trait]
    impl PullBody for Chunks {
        async fn chunk(&mut self) -> Result<Option<Bytes>> {
            self.0.pop_front().transpose()
        }
    }

    async fn collect(mut source: ByteSource) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn pull_body_yields_all_chunks() {
        let body = Body::pull(Chunks::new([&b"ab"[..], b"", b"cd"]));
        assert_eq!(collect(ByteSource::from(body)).await, b"abcd");
    }

    #[tokio::test]
    async fn push_body_yields_all_chunks() {
        let (tx, body) = Body::channel(1);
        let producer = tokio::spawn(async move {
            for chunk in [&b"ab"[..], b"cd", b"ef"] {
                tx.send(Ok(Bytes::from_static(chunk))).await.unwrap();
            }
        });

        assert_eq!(collect(ByteSource::from(body)).await, b"abcdef");
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn push_producer_waits_for_consumer() {
        let (tx, body) = Body::channel(1);
        tx.send(Ok(Bytes::from_static(b"a"))).await.unwrap();

        // The channel is full until the consumer pulls.
        assert!(tx.try_send(Ok(Bytes::from_static(b"b"))).is_err());

        let mut source = ByteSource::from(body);
        assert_eq!(source.next_chunk().await.unwrap().unwrap(), "a");
        assert!(tx.try_send(Ok(Bytes::from_static(b"b"))).is_ok());
    }

    #[tokio::test]
    async fn stop_fails_pending_push() {
        let (tx, body) = Body::channel(1);
        let mut source = ByteSource::from(body);
        source.stop();

        assert!(source.is_stopped());
        assert!(tx.send(Ok(Bytes::from_static(b"a"))).await.is_err());
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn push_error_is_data_loss() {
        let (tx, body) = Body::channel(1);
        tx.send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            .await
            .unwrap();

        let err = ByteSource::from(body).next_chunk().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);
    }

    #[tokio::test]
    async fn counts_received_bytes() {
        let mut source = ByteSource::from(Body::pull(Chunks::new([&b"abc"[..], b"de"])));
        while source.next_chunk().await.unwrap().is_some() {}
        assert_eq!(source.received(), 5);
    }
}
