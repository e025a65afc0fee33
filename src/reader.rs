//! Chunked range reads from an object store.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::StreamError;
use crate::store::ObjectStore;

/// An [`AsyncRead`] that streams an object in fixed-size range fetches.
///
/// Each fetch pulls one chunk of `chunk_size` bytes (the final chunk may be
/// shorter); bytes the caller's buffer could not hold are carried over to the
/// next read, so memory stays bounded by one chunk regardless of object size.
/// At most one fetch is ever in flight. A failed fetch does not advance the
/// cursor: reading again re-issues the identical range.
///
/// # Example
/// ```ignore
/// let mut reader = RangeReader::new(store, "my-bucket", "data.json.gz", 0, size, 5 * 1024 * 1024);
/// let mut data = vec![0u8; 1024];
/// let n = reader.read(&mut data).await?;
/// ```
pub struct RangeReader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    chunk_size: u64,
    /// Next byte offset to fetch.
    current: u64,
    /// Exclusive end of the requested range.
    end: u64,
    /// Fetched bytes not yet delivered to the caller.
    leftover: Vec<u8>,
    fetch: Option<BoxFuture<'static, Result<Vec<u8>, StreamError>>>,
}

impl RangeReader {
    /// Create a reader for `size` bytes of `s3://bucket/key` starting at
    /// `offset`.
    ///
    /// Validating `offset` against the true object size is the caller's job
    /// (see [`crate::ObjectStreamer`]); an out-of-bounds range surfaces as a
    /// fetch error from the store.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        offset: u64,
        size: u64,
        chunk_size: u64,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
            // A zero chunk size would never make progress.
            chunk_size: chunk_size.max(1),
            current: offset,
            end: offset + size,
            leftover: Vec::new(),
            fetch: None,
        }
    }

    fn start_fetch(&mut self) {
        let start = self.current;
        let end = (self.current + self.chunk_size - 1).min(self.end - 1);
        let store = Arc::clone(&self.store);
        let bucket = self.bucket.clone();
        let key = self.key.clone();

        self.fetch = Some(Box::pin(async move {
            store
                .get_object_range(&bucket, &key, start, end)
                .await
                .map_err(|e| StreamError::RangeFetch {
                    bucket,
                    key,
                    range: format!("bytes={start}-{end}"),
                    message: format!("{e:#}"),
                })
        }));
    }
}

impl AsyncRead for RangeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            // Deliver carried-over bytes before fetching anything new.
            if !this.leftover.is_empty() {
                let n = this.leftover.len().min(buf.remaining());
                buf.put_slice(&this.leftover[..n]);
                this.leftover.drain(..n);
                return Poll::Ready(Ok(()));
            }

            if let Some(fetch) = this.fetch.as_mut() {
                let chunk = match fetch.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(chunk)) => chunk,
                    Poll::Ready(Err(e)) => {
                        // Cursor stays put so the next read retries the
                        // same range.
                        this.fetch = None;
                        return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e)));
                    }
                };
                this.fetch = None;

                // Advance past the fetched range.
                this.current = (this.current + this.chunk_size).min(this.end);

                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    this.leftover = chunk[n..].to_vec();
                }
                return Poll::Ready(Ok(()));
            }

            if this.current >= this.end {
                // End of the requested range.
                return Poll::Ready(Ok(()));
            }

            this.start_fetch();
        }
    }
}
