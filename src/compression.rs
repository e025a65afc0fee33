//! Compression detection and transparent (de)compression on both stream
//! paths.

use std::io::Read;

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use crate::error::StreamError;
use crate::writer::MultipartWriter;

/// Gzip magic bytes. Only the first 2 bytes are checked to support all gzip
/// compression methods.
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
/// Bzip2 magic bytes ("BZh").
const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];

/// Supported compression formats for stored objects.
///
/// # Example
/// ```
/// use chunkstream::Compression;
///
/// let kind = Compression::detect(&[0x1F, 0x8B, 0x08]);
/// assert_eq!(kind, Compression::Gzip);
/// assert_eq!(kind.extension(), ".gz");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    Uncompressed,
    /// Gzip compression.
    Gzip,
    /// Bzip2 compression.
    Bzip2,
}

impl Compression {
    /// Classify a byte stream from its leading bytes; the first 10 bytes are
    /// more than enough. Inputs shorter than a signature never match it, and
    /// anything unrecognized (including an empty input) is uncompressed.
    pub fn detect(prefix: &[u8]) -> Compression {
        if prefix.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if prefix.starts_with(&BZIP2_MAGIC) {
            Compression::Bzip2
        } else {
            Compression::Uncompressed
        }
    }

    /// The file extension for this format, empty for uncompressed.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Uncompressed => "",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
        }
    }

    /// Infer the format from a path or object-key extension.
    pub fn from_extension(path: &str) -> Compression {
        if path.ends_with(".gz") {
            Compression::Gzip
        } else if path.ends_with(".bz2") {
            Compression::Bzip2
        } else {
            Compression::Uncompressed
        }
    }
}

/// Bytes to sniff from the head of a stream; enough for every known
/// signature.
const DETECT_PREFIX_LEN: usize = 10;

/// Wrap an async byte source in a decompressor selected by sniffing its
/// leading bytes, returning a sync reader of the decompressed stream.
///
/// The prefix is read, classified, and chained back in front of the source,
/// which is then bridged to `std::io::Read` so the flate2/bzip2 decoders can
/// run over it. The returned reader performs blocking reads and must be
/// consumed off the async runtime, e.g. inside `spawn_blocking`.
pub async fn decompressed_reader<R>(
    mut source: R,
    buffer_size: usize,
) -> Result<Box<dyn Read + Send>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    use tokio::io::AsyncReadExt;

    // Collect the full prefix even if the source trickles it out; stop
    // early only at end of stream.
    let mut prefix = [0u8; DETECT_PREFIX_LEN];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = source
            .read(&mut prefix[filled..])
            .await
            .context("failed to read stream prefix for compression detection")?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let compression = Compression::detect(&prefix[..filled]);
    debug!(?compression, "detected stream compression");

    // Disambiguated call: `Cursor` is also a blocking `Read`, and both
    // `chain` methods are in scope here.
    let rejoined = AsyncReadExt::chain(std::io::Cursor::new(prefix[..filled].to_vec()), source);
    let buffered = BufReader::with_capacity(buffer_size, rejoined);
    let bridge = SyncIoBridge::new(buffered);

    Ok(match compression {
        Compression::Uncompressed => Box::new(bridge),
        Compression::Gzip => Box::new(MultiGzDecoder::new(bridge)),
        Compression::Bzip2 => Box::new(BzDecoder::new(bridge)),
    })
}

enum Codec {
    Plain,
    Gzip(GzEncoder<Vec<u8>>),
    Bzip2(BzEncoder<Vec<u8>>),
}

/// A [`MultipartWriter`] with a compression transform in front of it.
///
/// Written bytes are compressed before they reach the part buffer. On close
/// the transform is finished first, so the compressed tail and trailer land
/// in the upload, and only then is the underlying writer closed; a failed
/// finish aborts the upload instead.
///
/// # Example
/// ```ignore
/// let writer = MultipartWriter::new(store, "my-bucket", "output.json.gz",
///     5 * 1024 * 1024, CancellationToken::new()).await?;
/// let mut writer = CompressedWriter::new(writer, Compression::Gzip);
/// writer.write(b"hello world\n").await?;
/// writer.close().await?;
/// ```
pub struct CompressedWriter {
    inner: MultipartWriter,
    codec: Codec,
}

impl CompressedWriter {
    pub fn new(writer: MultipartWriter, compression: Compression) -> Self {
        let codec = match compression {
            Compression::Uncompressed => Codec::Plain,
            Compression::Gzip => Codec::Gzip(GzEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            )),
            Compression::Bzip2 => Codec::Bzip2(BzEncoder::new(
                Vec::new(),
                bzip2::Compression::default(),
            )),
        };
        Self {
            inner: writer,
            codec,
        }
    }

    /// Compress and append bytes, uploading parts as they fill.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        use std::io::Write;

        match &mut self.codec {
            Codec::Plain => return self.inner.write(data).await,
            Codec::Gzip(encoder) => encoder
                .write_all(data)
                .map_err(|e| StreamError::Compression {
                    message: e.to_string(),
                })?,
            Codec::Bzip2(encoder) => encoder
                .write_all(data)
                .map_err(|e| StreamError::Compression {
                    message: e.to_string(),
                })?,
        }

        let pending = match &mut self.codec {
            Codec::Plain => unreachable!(),
            Codec::Gzip(encoder) => std::mem::take(encoder.get_mut()),
            Codec::Bzip2(encoder) => std::mem::take(encoder.get_mut()),
        };
        if !pending.is_empty() {
            self.inner.write(&pending).await?;
        }

        Ok(data.len())
    }

    /// Finish the compression transform, push its tail into the upload, and
    /// finalize. A transform failure aborts the upload and surfaces as a
    /// compression error.
    pub async fn close(&mut self) -> Result<(), StreamError> {
        let tail = match std::mem::replace(&mut self.codec, Codec::Plain) {
            Codec::Plain => Vec::new(),
            Codec::Gzip(encoder) => match encoder.finish() {
                Ok(tail) => tail,
                Err(e) => {
                    let _ = self.inner.abort().await;
                    return Err(StreamError::Compression {
                        message: e.to_string(),
                    });
                }
            },
            Codec::Bzip2(encoder) => match encoder.finish() {
                Ok(tail) => tail,
                Err(e) => {
                    let _ = self.inner.abort().await;
                    return Err(StreamError::Compression {
                        message: e.to_string(),
                    });
                }
            },
        };

        if !tail.is_empty() {
            if let Err(e) = self.inner.write(&tail).await {
                let _ = self.inner.abort().await;
                return Err(e);
            }
        }

        self.inner.close().await
    }

    /// Best-effort cancel of the underlying upload.
    pub async fn abort(&self) -> Result<(), StreamError> {
        self.inner.abort().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::RangeReader;
    use crate::testing::MemoryStore;
    use crate::store::ObjectStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const MIN_PART: usize = crate::MIN_PART_SIZE;

    #[test]
    fn detects_known_magic_bytes() {
        assert_eq!(
            Compression::detect(&[0x1F, 0x8B, 0x08, 0x00]),
            Compression::Gzip
        );
        assert_eq!(
            Compression::detect(&[0x42, 0x5A, 0x68, 0x39]),
            Compression::Bzip2
        );
        assert_eq!(
            Compression::detect(b"plain text data"),
            Compression::Uncompressed
        );
    }

    #[test]
    fn short_and_empty_inputs_are_uncompressed() {
        assert_eq!(Compression::detect(&[]), Compression::Uncompressed);
        assert_eq!(Compression::detect(&[0x1F]), Compression::Uncompressed);
        assert_eq!(
            Compression::detect(&[0x42, 0x5A]),
            Compression::Uncompressed
        );
    }

    #[test]
    fn extensions_round_trip() {
        assert_eq!(Compression::Gzip.extension(), ".gz");
        assert_eq!(Compression::Bzip2.extension(), ".bz2");
        assert_eq!(Compression::Uncompressed.extension(), "");

        assert_eq!(Compression::from_extension("data.json.gz"), Compression::Gzip);
        assert_eq!(Compression::from_extension("dump.bz2"), Compression::Bzip2);
        assert_eq!(
            Compression::from_extension("notes.txt"),
            Compression::Uncompressed
        );
    }

    async fn multipart_writer(store: &Arc<MemoryStore>, key: &str) -> MultipartWriter {
        MultipartWriter::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            "bucket",
            key,
            MIN_PART,
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    async fn read_decompressed(store: &Arc<MemoryStore>, key: &str) -> Vec<u8> {
        let size = store.object("bucket", key).unwrap().len() as u64;
        let reader = RangeReader::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            "bucket",
            key,
            0,
            size,
            1024 * 1024,
        );
        let mut reader = decompressed_reader(reader, 64 * 1024).await.unwrap();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            out
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gzip_round_trip() {
        let data: Vec<u8> = (0..3_000_000).map(|i| (i % 53) as u8).collect();
        let store = Arc::new(MemoryStore::new());
        let writer = multipart_writer(&store, "data.gz").await;
        let mut writer = CompressedWriter::new(writer, Compression::Gzip);

        for piece in data.chunks(70_000) {
            writer.write(piece).await.unwrap();
        }
        writer.close().await.unwrap();

        let stored = store.object("bucket", "data.gz").unwrap();
        assert_eq!(Compression::detect(&stored[..4]), Compression::Gzip);
        assert_eq!(read_decompressed(&store, "data.gz").await, data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bzip2_round_trip() {
        let data: Vec<u8> = (0..500_000).map(|i| (i % 91) as u8).collect();
        let store = Arc::new(MemoryStore::new());
        let writer = multipart_writer(&store, "data.bz2").await;
        let mut writer = CompressedWriter::new(writer, Compression::Bzip2);

        writer.write(&data).await.unwrap();
        writer.close().await.unwrap();

        let stored = store.object("bucket", "data.bz2").unwrap();
        assert_eq!(Compression::detect(&stored[..4]), Compression::Bzip2);
        assert_eq!(read_decompressed(&store, "data.bz2").await, data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn uncompressed_passthrough() {
        let data = b"no compression involved at all\n".repeat(1000);
        let store = Arc::new(MemoryStore::new());
        let writer = multipart_writer(&store, "plain.txt").await;
        let mut writer = CompressedWriter::new(writer, Compression::Uncompressed);

        writer.write(&data).await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(store.object("bucket", "plain.txt").unwrap(), data);
        assert_eq!(read_decompressed(&store, "plain.txt").await, data);
    }

    #[tokio::test]
    async fn abort_passes_through_to_upload() {
        let store = Arc::new(MemoryStore::new());
        let writer = multipart_writer(&store, "data.gz").await;
        let mut writer = CompressedWriter::new(writer, Compression::Gzip);

        writer.write(b"some data").await.unwrap();
        writer.abort().await.unwrap();

        assert_eq!(store.aborted_uploads().len(), 1);
        assert!(store.completions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn detects_across_fragmented_reads() {
        use std::io::Write;

        // Build a real gzip stream, then hand it over one byte at a time:
        // detection must still see the full signature.
        let data = b"fragmented but intact".to_vec();
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut mock = tokio_test::io::Builder::new();
        for byte in &compressed {
            mock.read(std::slice::from_ref(byte));
        }
        let source = mock.build();

        let mut reader = decompressed_reader(source, 8 * 1024).await.unwrap();
        let out = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            out
        })
        .await
        .unwrap();

        assert_eq!(out, data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn detection_reads_nothing_ahead_of_the_decoder() {
        // A stream that merely *starts* with text must stay byte-identical
        // through the adapter.
        let data = b"BZ-prefix-but-not-bzip2".to_vec();
        let store = Arc::new(MemoryStore::new());
        store.put_object("bucket", "odd.txt", data.clone());

        assert_eq!(read_decompressed(&store, "odd.txt").await, data);
    }
}
