//! End-to-end round trips through the public API, upload to download, over
//! the in-memory store.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use chunkstream::testing::MemoryStore;
use chunkstream::{
    decompressed_reader, CompressedWriter, Compression, MultipartWriter, ObjectStore,
    ObjectStreamer, RangeReader, MIN_PART_SIZE,
};

const MIB: usize = 1024 * 1024;

fn patterned(len: usize) -> Vec<u8> {
    // Repetitive enough to compress, irregular enough to catch reordering.
    (0..len).map(|i| ((i * 7) % 247) as u8).collect()
}

async fn upload(
    store: &Arc<MemoryStore>,
    key: &str,
    data: &[u8],
    compression: Compression,
) {
    let writer = MultipartWriter::new(
        Arc::clone(store) as Arc<dyn ObjectStore>,
        "bucket",
        key,
        MIN_PART_SIZE,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let mut writer = CompressedWriter::new(writer, compression);

    for piece in data.chunks(200_000) {
        writer.write(piece).await.unwrap();
    }
    writer.close().await.unwrap();
}

async fn download(store: &Arc<MemoryStore>, key: &str, chunk_size: u64) -> Vec<u8> {
    let size = store.head_object("bucket", key).await.unwrap();
    let reader = RangeReader::new(
        Arc::clone(store) as Arc<dyn ObjectStore>,
        "bucket",
        key,
        0,
        size,
        chunk_size,
    );
    let mut reader = decompressed_reader(reader, MIB).await.unwrap();
    tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut out).unwrap();
        out
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn uncompressed_upload_download_round_trip() {
    let data = patterned(12 * MIB);
    let store = Arc::new(MemoryStore::new());

    upload(&store, "big.bin", &data, Compression::Uncompressed).await;

    // 12MiB at 5MiB parts lands as three parts; the reassembled object must
    // be byte-identical.
    assert_eq!(store.uploaded_part_numbers(), vec![1, 2, 3]);
    assert_eq!(download(&store, "big.bin", 5 * MIB as u64).await, data);
}

#[tokio::test(flavor = "multi_thread")]
async fn compressed_round_trips_are_identity() {
    let data = patterned(7 * MIB);
    for (key, compression) in [
        ("data.gz", Compression::Gzip),
        ("data.bz2", Compression::Bzip2),
    ] {
        let store = Arc::new(MemoryStore::new());
        upload(&store, key, &data, compression).await;

        let stored = store.object("bucket", key).unwrap();
        assert_eq!(Compression::detect(&stored), compression);
        assert!(stored.len() < data.len());

        assert_eq!(download(&store, key, 128 * 1024).await, data);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn raw_reader_sees_exact_chunk_ranges() {
    let data = patterned(12 * MIB);
    let store = Arc::new(MemoryStore::new());
    store.put_object("bucket", "raw.bin", data.clone());

    let mut reader = RangeReader::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        "bucket",
        "raw.bin",
        0,
        data.len() as u64,
        5 * MIB as u64,
    );
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();

    assert_eq!(out, data);
    assert_eq!(
        store.range_requests(),
        vec![
            "bytes=0-5242879",
            "bytes=5242880-10485759",
            "bytes=10485760-12582911",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn streamer_round_trips_compressed_records() {
    let mut body = Vec::new();
    for i in 0..5_000 {
        body.extend_from_slice(format!("{{\"record\":{i}}}\n").as_bytes());
    }
    let store = Arc::new(MemoryStore::new());
    upload(&store, "records.json.gz", &body, Compression::Gzip).await;

    let count = ObjectStreamer::new(Arc::clone(&store) as Arc<dyn ObjectStore>)
        .stream("bucket", "records.json.gz", 0, |_, line| {
            anyhow::ensure!(line.starts_with(b"{\"record\":"));
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(count, 5_000);
}
