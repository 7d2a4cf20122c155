use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::{CompletedPart, ObjectBody, S3Client, S3Error};

/// The store calls the mock can delay, fail and record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    PutObject,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    GetObject,
    DeleteObject,
    ListBuckets,
}

/// How get_object bodies break partway through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFault {
    /// Yield this many bytes, then fail the read
    ErrorAfter(usize),
    /// Yield this many bytes, then never produce more
    StallAfter(usize),
}

// Tail of a faulty body. A stalled read stays pending without registering a
// waker; the caller's deadline is what ends it.
struct BrokenTail {
    stall: bool,
}

impl AsyncRead for BrokenTail {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.stall {
            Poll::Pending
        } else {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset while reading object body",
            )))
        }
    }
}

/// One recorded call. `key` is empty for bucket-level calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Call {
    pub op: MockOp,
    pub key: String,
    pub part_number: Option<i32>,
    pub body_len: Option<usize>,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<String, Bytes>,
    uploads: HashMap<String, PendingUpload>,
    calls: Vec<S3Call>,
    next_upload_id: u64,
}

struct PendingUpload {
    object_key: String,
    parts: HashMap<i32, Bytes>,
}

// Decrements the in-flight part counter even when the call is cancelled.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock S3 client for testing - always available, no conditional compilation needed
///
/// Objects are kept in memory, so anything put (single-shot or multipart)
/// can be read back. Latency and failures are injected per operation or
/// per key; every call is recorded, including calls that end up failing
/// or being cancelled by a caller deadline.
#[derive(Clone, Default)]
pub struct MockS3Client {
    latency: HashMap<MockOp, Duration>,
    failures: HashMap<MockOp, S3Error>,
    key_failures: HashMap<String, S3Error>,
    corrupt_reads: bool,
    body_fault: Option<BodyFault>,
    state: Arc<Mutex<MockState>>,
    parts_in_flight: Arc<AtomicUsize>,
    max_parts_in_flight: Arc<AtomicUsize>,
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}:{key}")
}

impl MockS3Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call of `op` by `latency` before it does anything
    pub fn with_latency(mut self, op: MockOp, latency: Duration) -> Self {
        self.latency.insert(op, latency);
        self
    }

    /// Make every call of `op` fail with `error`
    pub fn fail_on(mut self, op: MockOp, error: S3Error) -> Self {
        self.failures.insert(op, error);
        self
    }

    /// Make every call touching `key` fail with `error`, whatever the bucket
    pub fn fail_key(mut self, key: &str, error: S3Error) -> Self {
        self.key_failures.insert(key.to_string(), error);
        self
    }

    /// Flip the first byte of every object returned by get_object
    pub fn corrupt_reads(mut self) -> Self {
        self.corrupt_reads = true;
        self
    }

    /// Break every get_object body after a prefix of the object
    pub fn with_body_fault(mut self, fault: BodyFault) -> Self {
        self.body_fault = Some(fault);
        self
    }

    /// Seed an object
    pub fn with_object(self, bucket: &str, key: &str, body: impl Into<Bytes>) -> Self {
        self.lock()
            .objects
            .insert(object_key(bucket, key), body.into());
        self
    }

    pub fn calls(&self) -> Vec<S3Call> {
        self.lock().calls.clone()
    }

    /// Operations recorded for `key`, in call order
    pub fn ops_for(&self, key: &str) -> Vec<MockOp> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.key == key)
            .map(|call| call.op)
            .collect()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock().objects.get(&object_key(bucket, key)).cloned()
    }

    /// Multipart uploads that were created but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Highest number of upload_part calls observed running at the same time
    pub fn max_parts_in_flight(&self) -> usize {
        self.max_parts_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // Keeps serving after a caller panicked while holding the lock.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // Records the call, waits out the injected latency, then applies injected failures.
    async fn enter(&self, call: S3Call) -> Result<(), S3Error> {
        let op = call.op;
        let key = call.key.clone();
        self.lock().calls.push(call);

        if let Some(latency) = self.latency.get(&op) {
            tokio::time::sleep(*latency).await;
        }
        if let Some(error) = self.key_failures.get(&key) {
            return Err(error.clone());
        }
        if let Some(error) = self.failures.get(&op) {
            return Err(error.clone());
        }
        Ok(())
    }
}

fn call(op: MockOp, key: &str) -> S3Call {
    S3Call {
        op,
        key: key.to_string(),
        part_number: None,
        body_len: None,
    }
}

#[async_trait]
impl S3Client for MockS3Client {
    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<(), S3Error> {
        let body = Bytes::from(tokio::fs::read(path).await?);
        self.enter(S3Call {
            body_len: Some(body.len()),
            ..call(MockOp::PutObject, key)
        })
        .await?;

        self.lock().objects.insert(object_key(bucket, key), body);
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, S3Error> {
        self.enter(call(MockOp::CreateMultipartUpload, key)).await?;

        let mut state = self.lock();
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                object_key: object_key(bucket, key),
                parts: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, S3Error> {
        let in_flight = self.parts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.parts_in_flight);
        self.max_parts_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        self.enter(S3Call {
            op: MockOp::UploadPart,
            key: key.to_string(),
            part_number: Some(part_number),
            body_len: Some(body.len()),
        })
        .await?;

        let mut state = self.lock();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| S3Error::OperationFailed(format!("NoSuchUpload: {upload_id}")))?;
        upload.parts.insert(part_number, body);
        Ok(CompletedPart {
            part_number,
            e_tag: Some(format!("\"{upload_id}-{part_number}\"")),
        })
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), S3Error> {
        self.enter(call(MockOp::CompleteMultipartUpload, key))
            .await?;

        let mut state = self.lock();
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| S3Error::OperationFailed(format!("NoSuchUpload: {upload_id}")))?;

        let mut body = Vec::new();
        let mut previous = 0;
        for part in &parts {
            if part.part_number <= previous {
                return Err(S3Error::OperationFailed("InvalidPartOrder".to_string()));
            }
            previous = part.part_number;
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                S3Error::OperationFailed(format!("InvalidPart: {}", part.part_number))
            })?;
            body.extend_from_slice(data);
        }
        state.objects.insert(upload.object_key, Bytes::from(body));
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3Error> {
        self.enter(call(MockOp::AbortMultipartUpload, key)).await?;

        self.lock().uploads.remove(upload_id);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody, S3Error> {
        self.enter(call(MockOp::GetObject, key)).await?;

        let data = self
            .lock()
            .objects
            .get(&object_key(bucket, key))
            .cloned()
            .ok_or_else(|| S3Error::NotFound(key.to_string()))?;

        let data = if self.corrupt_reads {
            let mut altered = data.to_vec();
            match altered.first_mut() {
                Some(first) => *first ^= 0xFF,
                None => altered.push(0),
            }
            Bytes::from(altered)
        } else {
            data
        };

        let body: ObjectBody = match self.body_fault {
            None => Box::pin(io::Cursor::new(data)),
            Some(fault) => {
                let (served, stall) = match fault {
                    BodyFault::ErrorAfter(n) => (n, false),
                    BodyFault::StallAfter(n) => (n, true),
                };
                let prefix = data.slice(..served.min(data.len()));
                Box::pin(io::Cursor::new(prefix).chain(BrokenTail { stall }))
            }
        };
        Ok(body)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        self.enter(call(MockOp::DeleteObject, key)).await?;

        self.lock().objects.remove(&object_key(bucket, key));
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, S3Error> {
        self.enter(call(MockOp::ListBuckets, "")).await?;

        let mut buckets: Vec<String> = self
            .lock()
            .objects
            .keys()
            .filter_map(|key| key.split_once(':').map(|(bucket, _)| bucket.to_string()))
            .collect();
        buckets.sort();
        buckets.dedup();
        Ok(buckets)
    }
}
