//! Probe-level object store: the Put/Get/Delete operations of a lifecycle
//! run, each bounded by its own deadline.
//!
//! A deadline drops the in-flight future, which cancels the underlying
//! requests rather than just stopping waiting for them. Timeouts are
//! reported as [`OperationError::Timeout`], distinct from every other
//! failure, so they can be exported separately.

use std::future::Future;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common_s3::{CompletedPart, S3Client, S3Error};
use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::target::Operation;

/// Smallest part size S3 accepts for every part but the last
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Most parts a single multipart upload may have
pub const MAX_PARTS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartSettings {
    /// Objects of at least this many bytes are uploaded in parts
    pub threshold: u64,
    pub part_size: u64,
    /// Parts in flight at once, per upload
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    SingleShot,
    Multipart,
}

impl MultipartSettings {
    pub fn strategy_for(&self, size: u64) -> UploadStrategy {
        if size < self.threshold {
            UploadStrategy::SingleShot
        } else {
            UploadStrategy::Multipart
        }
    }

    pub fn part_count(&self, size: u64) -> u64 {
        size.div_ceil(self.part_size).max(1)
    }

    /// Byte ranges of each part, in part order. An empty object still gets
    /// one (empty) part.
    pub fn part_ranges(&self, size: u64) -> Vec<Range<u64>> {
        if size == 0 {
            return vec![0..0];
        }
        (0..size)
            .step_by(self.part_size as usize)
            .map(|start| start..(start + self.part_size).min(size))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: Operation,
        after: Duration,
    },
    #[error("{operation} failed: {source}")]
    Store {
        operation: Operation,
        #[source]
        source: S3Error,
    },
    #[error("{operation} failed on local file {}: {source}", path.display())]
    Local {
        operation: Operation,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OperationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, OperationError::Timeout { .. })
    }

    pub fn operation(&self) -> Operation {
        match self {
            OperationError::Timeout { operation, .. }
            | OperationError::Store { operation, .. }
            | OperationError::Local { operation, .. } => *operation,
        }
    }
}

fn store_error(operation: Operation) -> impl Fn(S3Error) -> OperationError {
    move |source| OperationError::Store { operation, source }
}

fn local_error(operation: Operation, path: &Path) -> impl Fn(std::io::Error) -> OperationError + '_ {
    move |source| OperationError::Local {
        operation,
        path: path.to_path_buf(),
        source,
    }
}

async fn with_deadline<T, F>(operation: Operation, after: Duration, fut: F) -> Result<T, OperationError>
where
    F: Future<Output = Result<T, OperationError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(OperationError::Timeout { operation, after }),
    }
}

async fn read_range(path: &Path, range: Range<u64>) -> Result<Bytes, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let mut buf = vec![0u8; (range.end - range.start) as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// The object store as the lifecycle engine sees it: one bucket, a size
/// based upload strategy, and a deadline on every call.
pub struct ObjectStore {
    client: Arc<dyn S3Client>,
    bucket: String,
    multipart: MultipartSettings,
}

impl ObjectStore {
    pub fn new(client: Arc<dyn S3Client>, bucket: impl Into<String>, multipart: MultipartSettings) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            multipart,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload the local file at `path` under `name`. `size` picks the
    /// strategy: single-shot below the multipart threshold, parallel parts
    /// at or above it.
    pub async fn put(
        &self,
        name: &str,
        path: &Path,
        size: u64,
        timeout: Duration,
    ) -> Result<UploadStrategy, OperationError> {
        let strategy = self.multipart.strategy_for(size);
        debug!(file = name, ?strategy, size, "uploading");
        with_deadline(Operation::Upload, timeout, async {
            match strategy {
                UploadStrategy::SingleShot => self.put_single(name, path).await?,
                UploadStrategy::Multipart => self.put_multipart(name, path, size).await?,
            }
            Ok(strategy)
        })
        .await
    }

    async fn put_single(&self, name: &str, path: &Path) -> Result<(), OperationError> {
        // The body is streamed from disk; only check the file is there first.
        tokio::fs::metadata(path)
            .await
            .map_err(local_error(Operation::Upload, path))?;
        self.client
            .put_object(&self.bucket, name, path)
            .await
            .map_err(store_error(Operation::Upload))
    }

    async fn put_multipart(&self, name: &str, path: &Path, size: u64) -> Result<(), OperationError> {
        let upload_id = self
            .client
            .create_multipart_upload(&self.bucket, name)
            .await
            .map_err(store_error(Operation::Upload))?;

        let ranges = self.multipart.part_ranges(size);
        debug!(file = name, parts = ranges.len(), %upload_id, "multipart upload started");

        let uploads = ranges.into_iter().enumerate().map(|(index, range)| {
            let upload_id = upload_id.as_str();
            async move {
                let part_number = index as i32 + 1;
                let body = read_range(path, range)
                    .await
                    .map_err(local_error(Operation::Upload, path))?;
                self.client
                    .upload_part(&self.bucket, name, upload_id, part_number, body)
                    .await
                    .map_err(store_error(Operation::Upload))
            }
        });

        let uploaded: Result<Vec<CompletedPart>, OperationError> = stream::iter(uploads)
            .buffer_unordered(self.multipart.concurrency)
            .try_collect()
            .await;

        let mut parts = match uploaded {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart(name, &upload_id).await;
                return Err(e);
            }
        };
        parts.sort_by_key(|part| part.part_number);

        if let Err(e) = self
            .client
            .complete_multipart_upload(&self.bucket, name, &upload_id, parts)
            .await
        {
            self.abort_multipart(name, &upload_id).await;
            return Err(store_error(Operation::Upload)(e));
        }
        Ok(())
    }

    // Best effort: a failed abort leaves the upload to the bucket's lifecycle rules.
    async fn abort_multipart(&self, name: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload(&self.bucket, name, upload_id)
            .await
        {
            warn!(file = name, %upload_id, error = %e, "failed to abort multipart upload");
        }
    }

    /// Stream the object `name` into a freshly created file at `dest`.
    /// Returns the number of bytes written.
    pub async fn get(&self, name: &str, dest: &Path, timeout: Duration) -> Result<u64, OperationError> {
        with_deadline(Operation::Download, timeout, async {
            let mut body = self
                .client
                .get_object(&self.bucket, name)
                .await
                .map_err(store_error(Operation::Download))?;

            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(local_error(Operation::Download, dest))?;
            let written = tokio::io::copy(&mut body, &mut file)
                .await
                .map_err(|e| OperationError::Store {
                    operation: Operation::Download,
                    source: S3Error::Io(format!(
                        "failed streaming object body to {}: {e}",
                        dest.display()
                    )),
                })?;
            file.flush()
                .await
                .map_err(local_error(Operation::Download, dest))?;
            Ok(written)
        })
        .await
    }

    pub async fn delete(&self, name: &str, timeout: Duration) -> Result<(), OperationError> {
        with_deadline(Operation::Delete, timeout, async {
            self.client
                .delete_object(&self.bucket, name)
                .await
                .map_err(store_error(Operation::Delete))
        })
        .await
    }
}
