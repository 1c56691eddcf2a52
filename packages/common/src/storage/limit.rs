use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, ReadBuf};

use super::error::StorageError;

/// Marker carried inside the `io::Error` raised when a reader crosses its limit.
#[derive(Debug)]
struct LimitExceeded {
    actual: u64,
    limit: u64,
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read {} bytes, limit is {}", self.actual, self.limit)
    }
}

impl std::error::Error for LimitExceeded {}

/// Reader adapter that fails once more than `limit` bytes have been read.
///
/// The failure surfaces as an `io::Error` that converts into
/// [`StorageError::SizeLimitExceeded`].
pub struct LimitedReader<R> {
    inner: R,
    read: u64,
    limit: u64,
}

/// Extract `(actual, limit)` if `err` was raised by a [`LimitedReader`].
pub(crate) fn limit_exceeded(err: &io::Error) -> Option<(u64, u64)> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<LimitExceeded>())
        .map(|e| (e.actual, e.limit))
}

impl<R> LimitedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            read: 0,
            limit,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    pub fn exceeded(&self) -> bool {
        self.read > self.limit
    }

    /// Translate an error raised while draining this reader.
    ///
    /// Some clients wrap reader failures in their own error types, so the
    /// byte count is checked directly rather than relying on the error value.
    pub(crate) fn classify(&self, err: impl Into<StorageError>) -> StorageError {
        if self.exceeded() {
            StorageError::SizeLimitExceeded {
                actual: self.read,
                limit: self.limit,
            }
        } else {
            err.into()
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.read += (buf.filled().len() - before) as u64;

        if this.read > this.limit {
            // An erroring read must leave the buffer as it found it.
            buf.set_filled(before);
            return Poll::Ready(Err(io::Error::other(LimitExceeded {
                actual: this.read,
                limit: this.limit,
            })));
        }

        Poll::Ready(Ok(()))
    }
}
