//! Message bodies that can be buffered and replayed.

use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial capacity when draining a streaming body.
const DRAIN_CHUNK: usize = 8 * 1024;

/// A request or response body.
///
/// `Stream` bodies can only be read once. [`Body::buffer`] drains a stream
/// into memory and swaps in a [`Body::Full`] copy, which can be read any
/// number of times.
///
/// # Examples
///
/// ```
/// use replay::http::Body;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let mut body = Body::from_reader(&b"streamed"[..]);
/// assert_eq!(&body.buffer().await?[..], b"streamed");
/// // Still readable afterwards.
/// assert_eq!(body.as_bytes().map(|b| &b[..]), Some(&b"streamed"[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub enum Body {
    /// No body at all.
    #[default]
    Empty,
    /// A fully buffered body.
    Full(Bytes),
    /// A body that has not been read yet.
    Stream(Box<dyn AsyncRead + Send + Sync + Unpin>),
}

impl Body {
    /// Wraps an async reader as a one-shot streaming body.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        Self::Stream(Box::new(reader))
    }

    /// Returns `true` only for [`Body::Empty`].
    ///
    /// A buffered body of zero bytes is present, just empty.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the buffered bytes, or `None` for an unread stream.
    ///
    /// [`Body::Empty`] yields an empty buffer.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        static EMPTY: Bytes = Bytes::new();
        match self {
            Self::Empty => Some(&EMPTY),
            Self::Full(bytes) => Some(bytes),
            Self::Stream(_) => None,
        }
    }

    /// Reads the whole body into memory and re-attaches it as [`Body::Full`].
    ///
    /// Returns a cheap clone of the buffered bytes. Buffering an already
    /// buffered body does no I/O.
    ///
    /// # Errors
    ///
    /// Propagates any I/O error from the underlying reader. The body is left
    /// empty in that case, since a half-read stream cannot be replayed.
    pub async fn buffer(&mut self) -> io::Result<Bytes> {
        match std::mem::take(self) {
            Self::Empty => Ok(Bytes::new()),
            Self::Full(bytes) => {
                *self = Self::Full(bytes.clone());
                Ok(bytes)
            }
            Self::Stream(mut reader) => {
                let mut buf = BytesMut::with_capacity(DRAIN_CHUNK);
                while reader.read_buf(&mut buf).await? != 0 {}
                let bytes = buf.freeze();
                *self = Self::Full(bytes.clone());
                Ok(bytes)
            }
        }
    }

    /// Consumes the body and returns all of its bytes.
    pub async fn into_bytes(mut self) -> io::Result<Bytes> {
        self.buffer().await
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Full(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Full(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Full(Bytes::from_static(bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    #[tokio::test]
    async fn buffering_a_stream_makes_it_replayable() {
        let mut body = Body::from_reader(&b"hello world"[..]);
        assert!(body.as_bytes().is_none());

        let first = body.buffer().await.unwrap();
        let second = body.buffer().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..], b"hello world");
    }

    #[tokio::test]
    async fn empty_is_absent_but_full_empty_is_not() {
        assert!(Body::Empty.is_absent());
        assert!(!Body::from(Vec::new()).is_absent());
        assert!(Body::Empty.into_bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_failure_is_propagated() {
        let mut body = Body::from_reader(Broken);
        let err = body.buffer().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(body.is_absent());
    }
}
