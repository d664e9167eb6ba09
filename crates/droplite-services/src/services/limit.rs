//! Upload size enforcement inside the content stream.
//!
//! The backend only commits an object once its reader reaches a clean EOF.
//! Failing the read itself is what keeps a rejected upload from ever
//! replacing the object under its key.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};

use droplite_core::AppError;
use droplite_storage::ContentReader;
use tokio::io::{AsyncRead, ReadBuf};

/// Why a [`LimitedReader`] refused its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentRejection {
    Empty,
    TooLarge { limit: u64 },
}

impl From<ContentRejection> for AppError {
    fn from(rejection: ContentRejection) -> Self {
        match rejection {
            ContentRejection::Empty => AppError::InvalidInput("Content is empty".to_string()),
            ContentRejection::TooLarge { limit } => {
                AppError::PayloadTooLarge(format!("Content exceeds the {} byte limit", limit))
            }
        }
    }
}

/// Shared slot the service inspects after a failed backend write.
pub(crate) type RejectionSlot = Arc<OnceLock<ContentRejection>>;

/// Reader that errors once more than `limit` bytes pass through it, or when
/// it reaches EOF without yielding a single byte.
pub(crate) struct LimitedReader {
    inner: ContentReader,
    limit: u64,
    read: u64,
    rejection: RejectionSlot,
}

impl LimitedReader {
    pub(crate) fn new(inner: ContentReader, limit: u64) -> (Self, RejectionSlot) {
        let rejection = RejectionSlot::default();
        let reader = Self {
            inner,
            limit,
            read: 0,
            rejection: rejection.clone(),
        };
        (reader, rejection)
    }

    fn reject(&self, rejection: ContentRejection) -> io::Error {
        let _ = self.rejection.set(rejection);
        let message = match rejection {
            ContentRejection::Empty => "content is empty".to_string(),
            ContentRejection::TooLarge { limit } => format!("content exceeds {} bytes", limit),
        };
        io::Error::new(io::ErrorKind::InvalidData, message)
    }
}

impl AsyncRead for LimitedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(this.inner.as_mut().poll_read(cx, buf))?;
        let n = (buf.filled().len() - before) as u64;

        if n == 0 {
            if this.read == 0 {
                return Poll::Ready(Err(this.reject(ContentRejection::Empty)));
            }
            return Poll::Ready(Ok(()));
        }

        this.read += n;
        if this.read > this.limit {
            return Poll::Ready(Err(this.reject(ContentRejection::TooLarge { limit: this.limit })));
        }
        Poll::Ready(Ok(()))
    }
}
