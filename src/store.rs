//! Backing-store abstraction over the S3 operations the streaming cores
//! consume.
//!
//! Keeping this behind a trait lets the reader and writer run against an
//! in-memory store in tests (see [`crate::testing::MemoryStore`]) while
//! production code uses [`S3ObjectStore`] over the AWS SDK client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::AsyncReadExt;

/// One completed part of a multipart upload.
///
/// `part_number` must be the number the part was uploaded under; the store
/// rejects completion when the submitted numbers do not match the uploaded
/// ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based sequential part number.
    pub part_number: i32,
    /// Entity tag returned by the store for this part.
    pub etag: String,
}

/// The store operations required for chunked reads and multipart writes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Return the total size of an object in bytes.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<u64>;

    /// Fetch the inclusive byte range `[start, end]` of an object.
    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>>;

    /// Start a multipart upload session, returning its upload ID.
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String>;

    /// Upload one part under `part_number`, returning the part's ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String>;

    /// Finalize a multipart upload from its completed parts.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()>;

    /// Cancel a multipart upload and release its server-side parts.
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;
}

/// [`ObjectStore`] implementation backed by the AWS S3 SDK client.
///
/// Creating an S3 client is relatively expensive, so this struct allows
/// reusing the client across readers and writers.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// Wrap an existing SDK client.
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Create a client from the default AWS config chain (environment,
    /// shared config files, instance metadata).
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_s3::Client::new(&sdk_config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<u64> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to get object metadata for s3://{bucket}/{key}"))?;

        let size = response
            .content_length
            .context("content length is missing from object metadata")?;

        u64::try_from(size).context("object reported a negative content length")
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>> {
        let range = format!("bytes={start}-{end}");
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(&range)
            .send()
            .await
            .with_context(|| format!("failed to fetch range {range} from s3://{bucket}/{key}"))?;

        let mut data = Vec::new();
        response
            .body
            .into_async_read()
            .read_to_end(&mut data)
            .await
            .context("failed to read S3 object body")?;

        Ok(data)
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to create multipart upload for s3://{bucket}/{key}"))?;

        response
            .upload_id
            .context("multipart upload response is missing an upload ID")
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String> {
        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("failed to upload part {part_number}"))?;

        response
            .e_tag
            .with_context(|| format!("upload response for part {part_number} is missing an ETag"))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let completed = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("failed to complete multipart upload for s3://{bucket}/{key}"))?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .with_context(|| format!("failed to abort multipart upload for s3://{bucket}/{key}"))?;

        Ok(())
    }
}

// Integration tests for the SDK-backed store would require AWS credentials
// or a local S3 stand-in; the streaming cores are tested against
// `testing::MemoryStore` instead.
