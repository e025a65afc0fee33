//! Error types for chunked S3 streaming.
//!
//! `StreamError` is `Clone` on purpose: once a `MultipartWriter` records a
//! terminal error, every later call on the same instance returns that same
//! error value without attempting further I/O. Transport failures therefore
//! carry their context as strings rather than boxed SDK errors.

use thiserror::Error;

use crate::{MAX_PART_COUNT, MIN_PART_SIZE};

/// Errors produced by the range-read and multipart-write cores.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Bucket name was empty at construction.
    #[error("bucket name cannot be empty")]
    EmptyBucket,

    /// Object key was empty at construction.
    #[error("object key cannot be empty")]
    EmptyKey,

    /// Part size below the S3 minimum for non-final parts.
    #[error("part size must be at least {} bytes (5MiB), got {got} bytes", MIN_PART_SIZE)]
    PartSizeTooSmall { got: usize },

    /// A range fetch failed. The cursor is not advanced, so reading again
    /// re-issues the identical range.
    #[error("failed to download chunk ({range}) of s3://{bucket}/{key}: {message}")]
    RangeFetch {
        bucket: String,
        key: String,
        range: String,
        message: String,
    },

    /// Creating the multipart upload session failed; the writer is never
    /// constructed in this case.
    #[error("failed to initiate multipart upload for s3://{bucket}/{key}: {message}")]
    CreateUpload {
        bucket: String,
        key: String,
        message: String,
    },

    /// Uploading one part failed.
    #[error("failed to upload part {part_number}: {message}")]
    UploadPart { part_number: i32, message: String },

    /// The store returned no ETag for an uploaded part; completion would be
    /// rejected, so the part upload is treated as failed.
    #[error("received empty ETag for part {part_number}")]
    EmptyEtag { part_number: i32 },

    /// The S3 per-upload part ceiling was reached.
    #[error("exceeded maximum number of parts ({}) for multipart upload", MAX_PART_COUNT)]
    TooManyParts,

    /// Finalizing the upload failed.
    #[error("failed to complete multipart upload with {parts} parts: {message}")]
    CompleteUpload { parts: usize, message: String },

    /// Aborting the upload failed.
    #[error("failed to abort multipart upload: {message}")]
    AbortUpload { message: String },

    /// Close was called before any part was uploaded. An empty object cannot
    /// be finalized through the multipart path.
    #[error("no parts uploaded for multipart upload")]
    NoParts,

    /// Write after close or after abort.
    #[error("cannot write to closed writer (bucket: {bucket}, key: {key})")]
    Closed { bucket: String, key: String },

    /// The caller-supplied cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The compression transform failed.
    #[error("compression error: {message}")]
    Compression { message: String },
}

/// Result type for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;
