//! Bounded-memory streaming of large S3 objects.
//!
//! The read path pulls an object in fixed-size byte ranges and exposes it as
//! one continuous stream ([`RangeReader`]); the write path accepts an
//! unbounded byte stream and uploads it as sequentially numbered parts of a
//! multipart upload ([`MultipartWriter`]). Gzip and bzip2 sit transparently
//! on either path ([`decompressed_reader`], [`CompressedWriter`]), selected
//! by magic-byte detection ([`Compression`]). Memory use is bounded by the
//! chunk/part size, never by the object size.
//!
//! # Example
//!
//! ```ignore
//! use chunkstream::{MultipartWriter, ObjectStreamer, S3ObjectStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(S3ObjectStore::from_env().await);
//!
//! // Upload a stream as multipart.
//! let writer = MultipartWriter::new(
//!     store.clone(), "my-bucket", "out.json.gz",
//!     5 * 1024 * 1024, CancellationToken::new(),
//! ).await?;
//! writer.write(b"hello world\n").await?;
//! writer.close().await?;
//!
//! // Stream it back line by line.
//! ObjectStreamer::new(store)
//!     .stream("my-bucket", "out.json.gz", 0, |offset, line| {
//!         println!("{offset}: {}", String::from_utf8_lossy(line));
//!         Ok(())
//!     })
//!     .await?;
//! ```

pub mod compression;
pub mod error;
pub mod reader;
pub mod store;
pub mod streamer;
pub mod testing;
pub mod writer;

pub use compression::{decompressed_reader, CompressedWriter, Compression};
pub use error::{Result, StreamError};
pub use reader::RangeReader;
pub use store::{ObjectStore, S3ObjectStore, UploadedPart};
pub use streamer::ObjectStreamer;
pub use writer::MultipartWriter;

/// S3 minimum size for every part except the final one (5MiB).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 maximum number of parts per multipart upload.
pub const MAX_PART_COUNT: i32 = 10_000;

/// Default range-fetch chunk size for downloads (5MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default part size for uploads (5MiB).
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default buffer size for read-side buffering (1MB).
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;
