//! In-memory [`ObjectStore`] for tests.
//!
//! `MemoryStore` records every range request and part upload, assembles
//! completed multipart uploads into readable objects, and supports fault
//! injection for exercising error paths. It backs the unit and integration
//! tests of the reader and writer cores, but is exported so downstream users
//! can test their own streaming pipelines without S3.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::store::{ObjectStore, UploadedPart};

#[derive(Default)]
struct Upload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (String, Vec<u8>)>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    uploads: HashMap<String, Upload>,
    next_upload_id: u64,

    // Recorded activity, in call order.
    range_requests: Vec<String>,
    uploaded_part_numbers: Vec<i32>,
    completions: Vec<Vec<UploadedPart>>,
    aborted_uploads: Vec<String>,
    create_upload_calls: usize,

    // Fault injection.
    fail_next_range_fetch: bool,
    fail_part_number: Option<i32>,
    fail_complete: bool,
}

/// In-memory object store with request recording and fault injection.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn object_id(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object for the read path.
    pub fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(object_id(bucket, key), data);
    }

    /// Bytes of a stored object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.objects.get(&object_id(bucket, key)).cloned()
    }

    /// Every `bytes=start-end` range requested so far, in order.
    pub fn range_requests(&self) -> Vec<String> {
        self.inner.lock().unwrap().range_requests.clone()
    }

    /// Part numbers in the order they were uploaded.
    pub fn uploaded_part_numbers(&self) -> Vec<i32> {
        self.inner.lock().unwrap().uploaded_part_numbers.clone()
    }

    /// Part lists submitted to `complete_multipart_upload`, in call order.
    pub fn completions(&self) -> Vec<Vec<UploadedPart>> {
        self.inner.lock().unwrap().completions.clone()
    }

    /// Upload IDs that were aborted, in call order.
    pub fn aborted_uploads(&self) -> Vec<String> {
        self.inner.lock().unwrap().aborted_uploads.clone()
    }

    /// Number of `create_multipart_upload` calls seen.
    pub fn create_upload_calls(&self) -> usize {
        self.inner.lock().unwrap().create_upload_calls
    }

    /// Make the next range fetch fail once.
    pub fn fail_next_range_fetch(&self) {
        self.inner.lock().unwrap().fail_next_range_fetch = true;
    }

    /// Make every upload of the given part number fail.
    pub fn fail_part(&self, part_number: i32) {
        self.inner.lock().unwrap().fail_part_number = Some(part_number);
    }

    /// Make completion fail.
    pub fn fail_complete(&self) {
        self.inner.lock().unwrap().fail_complete = true;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        let data = inner
            .objects
            .get(&object_id(bucket, key))
            .with_context(|| format!("no such object: s3://{bucket}/{key}"))?;
        Ok(data.len() as u64)
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner.range_requests.push(format!("bytes={start}-{end}"));

        if inner.fail_next_range_fetch {
            inner.fail_next_range_fetch = false;
            bail!("injected range fetch failure");
        }

        let data = inner
            .objects
            .get(&object_id(bucket, key))
            .with_context(|| format!("no such object: s3://{bucket}/{key}"))?;

        // Same validation a real store applies to the Range header.
        if start > end || end >= data.len() as u64 {
            bail!(
                "invalid range bytes={start}-{end} for object of {} bytes",
                data.len()
            );
        }

        Ok(data[start as usize..=end as usize].to_vec())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.create_upload_calls += 1;
        inner.next_upload_id += 1;
        let upload_id = format!("upload-{}", inner.next_upload_id);
        inner.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String> {
        let _ = (bucket, key);
        let mut inner = self.inner.lock().unwrap();
        inner.uploaded_part_numbers.push(part_number);

        if inner.fail_part_number == Some(part_number) {
            bail!("injected failure for part {part_number}");
        }

        let etag = format!("\"etag-{part_number}-{}\"", body.len());
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .with_context(|| format!("no such upload: {upload_id}"))?;
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let _ = (bucket, key);
        let mut inner = self.inner.lock().unwrap();
        inner.completions.push(parts.to_vec());

        if inner.fail_complete {
            bail!("injected completion failure");
        }

        let upload = inner
            .uploads
            .remove(upload_id)
            .with_context(|| format!("no such upload: {upload_id}"))?;

        if parts.is_empty() {
            bail!("completion submitted with no parts");
        }

        let mut assembled = Vec::new();
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                bail!("parts not in ascending order at part {}", part.part_number);
            }
            previous = part.part_number;

            let (etag, body) = upload
                .parts
                .get(&part.part_number)
                .with_context(|| format!("part {} was never uploaded", part.part_number))?;
            if *etag != part.etag {
                bail!(
                    "ETag mismatch for part {}: uploaded {etag}, submitted {}",
                    part.part_number,
                    part.etag
                );
            }
            assembled.extend_from_slice(body);
        }

        inner
            .objects
            .insert(object_id(&upload.bucket, &upload.key), assembled);
        Ok(())
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        let _ = (bucket, key);
        let mut inner = self.inner.lock().unwrap();
        inner.aborted_uploads.push(upload_id.to_string());
        inner.uploads.remove(upload_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn range_fetch_is_bounds_checked() {
        let store = MemoryStore::new();
        store.put_object("b", "k", vec![0u8; 10]);

        assert_eq!(
            store.get_object_range("b", "k", 2, 4).await.unwrap(),
            vec![0u8; 3]
        );
        assert!(store.get_object_range("b", "k", 5, 10).await.is_err());
        assert!(store.get_object_range("b", "k", 4, 2).await.is_err());
    }

    #[tokio::test]
    async fn completion_rejects_unknown_parts() {
        let store = MemoryStore::new();
        let id = store.create_multipart_upload("b", "k").await.unwrap();
        let etag = store
            .upload_part("b", "k", &id, 1, b"data".to_vec())
            .await
            .unwrap();

        let bogus = vec![UploadedPart {
            part_number: 2,
            etag,
        }];
        assert!(store
            .complete_multipart_upload("b", "k", &id, &bogus)
            .await
            .is_err());
    }
}
