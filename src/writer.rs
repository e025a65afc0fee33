//! Multipart uploads with part-boundary buffering.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, StreamError};
use crate::store::{ObjectStore, UploadedPart};
use crate::{MAX_PART_COUNT, MIN_PART_SIZE};

struct WriterState {
    upload_id: String,
    buffer: Vec<u8>,
    /// Number the next part will be uploaded under, starting at 1.
    next_part: i32,
    parts: Vec<UploadedPart>,
    closed: bool,
    /// Terminal error; once set, every later operation returns this same
    /// error without attempting further I/O.
    err: Option<StreamError>,
}

/// Streams an unbounded byte sequence to the store as a multipart upload.
///
/// Bytes are buffered until they fill one part of `part_size`, then uploaded
/// under a sequential part number; memory use is bounded by the part size,
/// not the total data size. The upload session is created at construction
/// and terminated exactly once, by [`close`](Self::close) (finalize) or
/// [`abort`](Self::abort).
///
/// All operations on one instance are serialized by an internal lock, so a
/// shared writer is safe to use from several tasks; parts upload strictly
/// sequentially, never in parallel.
///
/// # Example
/// ```ignore
/// let writer = MultipartWriter::new(store, "my-bucket", "output.json.gz",
///     5 * 1024 * 1024, CancellationToken::new()).await?;
/// writer.write(b"hello world\n").await?;
/// writer.close().await?;
/// ```
pub struct MultipartWriter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    part_size: usize,
    cancel: CancellationToken,
    state: Mutex<WriterState>,
}

impl std::fmt::Debug for MultipartWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartWriter")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

impl MultipartWriter {
    /// Validate parameters and synchronously create the upload session.
    ///
    /// Fails fast without any store call when the bucket or key is empty or
    /// `part_size` is below the S3 5MiB minimum; fails if session creation
    /// fails. `cancel` is checked at the start of every later operation.
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        part_size: usize,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();

        if bucket.is_empty() {
            return Err(StreamError::EmptyBucket);
        }
        if key.is_empty() {
            return Err(StreamError::EmptyKey);
        }
        if part_size < MIN_PART_SIZE {
            return Err(StreamError::PartSizeTooSmall { got: part_size });
        }

        let upload_id = store
            .create_multipart_upload(&bucket, &key)
            .await
            .map_err(|e| StreamError::CreateUpload {
                bucket: bucket.clone(),
                key: key.clone(),
                message: format!("{e:#}"),
            })?;

        debug!(%bucket, %key, %upload_id, "created multipart upload");

        Ok(Self {
            store,
            bucket,
            key,
            part_size,
            cancel,
            state: Mutex::new(WriterState {
                upload_id,
                // Large part sizes are common; start small and let the
                // buffer grow with actual data.
                buffer: Vec::with_capacity(part_size.min(1024 * 1024)),
                next_part: 1,
                parts: Vec::new(),
                closed: false,
                err: None,
            }),
        })
    }

    /// Append bytes, uploading a part each time the buffer fills.
    ///
    /// Returns the number of bytes accepted, which on success is all of
    /// `data`. The first error becomes terminal: subsequent writes return it
    /// unchanged without further I/O.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let mut state = self.state.lock().await;

        if state.closed {
            return Err(StreamError::Closed {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
            });
        }
        if let Some(err) = &state.err {
            return Err(err.clone());
        }

        let mut written = 0;
        let mut input = data;
        while !input.is_empty() {
            let remaining = self.part_size.saturating_sub(state.buffer.len());
            if remaining == 0 {
                if let Err(e) = self.flush_part(&mut state).await {
                    state.err = Some(e.clone());
                    return Err(e);
                }
                continue;
            }
            let take = input.len().min(remaining);
            state.buffer.extend_from_slice(&input[..take]);
            written += take;
            input = &input[take..];

            if state.buffer.len() >= self.part_size {
                if let Err(e) = self.flush_part(&mut state).await {
                    state.err = Some(e.clone());
                    return Err(e);
                }
            }
        }

        Ok(written)
    }

    /// Finalize the upload: flush any trailing partial part, then submit the
    /// completed-parts list sorted by part number.
    ///
    /// Fails with [`StreamError::NoParts`] when nothing was ever written (an
    /// empty object cannot go through the multipart path). Any failure here
    /// triggers a best-effort abort before returning. Close is idempotent: a
    /// second call returns the previously recorded outcome without I/O.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if self.cancel.is_cancelled() {
            if !state.closed {
                state.closed = true;
                self.abort_session(&state).await;
            }
            return Err(StreamError::Cancelled);
        }

        if state.closed {
            return match &state.err {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            };
        }
        state.closed = true;

        if !state.buffer.is_empty() {
            if let Err(e) = self.flush_part(&mut state).await {
                state.err = Some(e.clone());
                self.abort_session(&state).await;
                return Err(e);
            }
        }

        if let Err(e) = self.complete_session(&mut state).await {
            state.err = Some(e.clone());
            self.abort_session(&state).await;
            return Err(e);
        }

        Ok(())
    }

    /// Best-effort cancel of the upload session, releasing server-side
    /// parts. Always marks the writer closed; callable in any state,
    /// including after a failed close.
    pub async fn abort(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.closed = true;

        self.store
            .abort_multipart_upload(&self.bucket, &self.key, &state.upload_id)
            .await
            .map_err(|e| StreamError::AbortUpload {
                message: format!("{e:#}"),
            })
    }

    /// Upload the buffered bytes as one part. No-op on an empty buffer.
    async fn flush_part(&self, state: &mut WriterState) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        if state.next_part > MAX_PART_COUNT {
            return Err(StreamError::TooManyParts);
        }

        // Capture the number before any counter mutation and use only this
        // value for both the upload and the completed-part record. Recording
        // a recomputed number is exactly the historical bug that made the
        // store reject completion.
        let part_number = state.next_part;

        // Copy to decouple the uploaded bytes from buffer reuse.
        let body = state.buffer.clone();
        let size = body.len();

        let etag = self
            .store
            .upload_part(&self.bucket, &self.key, &state.upload_id, part_number, body)
            .await
            .map_err(|e| StreamError::UploadPart {
                part_number,
                message: format!("{e:#}"),
            })?;

        if etag.is_empty() {
            return Err(StreamError::EmptyEtag { part_number });
        }

        debug!(part_number, size, "uploaded part");

        state.parts.push(UploadedPart { part_number, etag });
        state.buffer.clear();
        state.next_part += 1;
        Ok(())
    }

    async fn complete_session(&self, state: &mut WriterState) -> Result<()> {
        if state.parts.is_empty() {
            return Err(StreamError::NoParts);
        }

        // Parts are appended in upload order, but the store requires the
        // completion list sorted ascending.
        state.parts.sort_by_key(|p| p.part_number);

        self.store
            .complete_multipart_upload(&self.bucket, &self.key, &state.upload_id, &state.parts)
            .await
            .map_err(|e| StreamError::CompleteUpload {
                parts: state.parts.len(),
                message: format!("{e:#}"),
            })?;

        debug!(
            bucket = %self.bucket,
            key = %self.key,
            parts = state.parts.len(),
            "completed multipart upload"
        );
        Ok(())
    }

    async fn abort_session(&self, state: &WriterState) {
        if let Err(e) = self
            .store
            .abort_multipart_upload(&self.bucket, &self.key, &state.upload_id)
            .await
        {
            warn!("failed to abort multipart upload during cleanup: {e:#}");
        }
    }
}
