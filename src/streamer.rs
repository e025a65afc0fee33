//! Line-oriented streaming of (possibly compressed) objects.

use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::compression::decompressed_reader;
use crate::reader::RangeReader;
use crate::store::ObjectStore;
use crate::{DEFAULT_BUFFER_SIZE, DEFAULT_CHUNK_SIZE};

/// Streams newline-delimited records out of a stored object, decompressing
/// transparently.
///
/// # Example
/// ```ignore
/// let streamer = ObjectStreamer::new(store);
/// streamer
///     .stream("my-bucket", "data.json.gz", 0, |offset, line| {
///         // Process each record.
///         Ok(())
///     })
///     .await?;
/// ```
pub struct ObjectStreamer {
    store: Arc<dyn ObjectStore>,
    chunk_size: u64,
}

impl ObjectStreamer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the range-fetch chunk size (default 5MiB).
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Download the object starting at byte `offset`, decompress if needed,
    /// and call `f(record_offset, record)` for each newline-delimited record
    /// (terminator stripped, `\r\n` tolerated). Returns the record count.
    ///
    /// `record_offset` is the record's byte offset within the *decompressed*
    /// stream. Compressed streams have no random access, so these offsets
    /// can only be fed back as a resume `offset` for uncompressed objects.
    pub async fn stream<F>(&self, bucket: &str, key: &str, offset: u64, f: F) -> Result<u64>
    where
        F: FnMut(u64, &[u8]) -> Result<()> + Send + 'static,
    {
        let total_size = self
            .store
            .head_object(bucket, key)
            .await
            .context("failed to get object metadata")?;

        if total_size == 0 {
            bail!("object s3://{bucket}/{key} is empty");
        }
        if offset >= total_size {
            bail!("offset {offset} exceeds object size {total_size}");
        }

        debug!(%bucket, %key, offset, total_size, "streaming object");

        let reader = RangeReader::new(
            Arc::clone(&self.store),
            bucket,
            key,
            offset,
            total_size - offset,
            self.chunk_size,
        );
        let reader = decompressed_reader(reader, DEFAULT_BUFFER_SIZE).await?;

        // The bridged reader blocks, so the line loop runs off the runtime.
        tokio::task::spawn_blocking(move || scan_lines(reader, f))
            .await
            .context("line processing task panicked")?
    }
}

fn scan_lines<F>(reader: Box<dyn std::io::Read + Send>, mut f: F) -> Result<u64>
where
    F: FnMut(u64, &[u8]) -> Result<()>,
{
    let mut reader = BufReader::with_capacity(DEFAULT_BUFFER_SIZE, reader);
    let mut line = Vec::new();
    let mut position: u64 = 0;
    let mut records: u64 = 0;

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .context("error scanning lines")?;
        if n == 0 {
            break;
        }

        let record_offset = position;
        position += n as u64;
        records += 1;

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }

        f(record_offset, &line)
            .with_context(|| format!("error processing record {records}"))?;
    }

    Ok(records)
}
