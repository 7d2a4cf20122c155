//! S3 client abstraction for the synthetic probe
//!
//! The probe only needs a handful of raw store calls: single-shot put,
//! the multipart upload calls, a streamed get, delete, and a bucket listing
//! for readiness. They live behind [`S3Client`] so the lifecycle can run
//! against the real `aws-sdk-s3` backed [`S3Impl`] or the in-memory
//! [`MockS3Client`], which is always available for tests.

mod aws;
mod mock;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use aws::{S3Impl, S3Settings};
pub use mock::{BodyFault, MockOp, MockS3Client, S3Call};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum S3Error {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("S3 operation failed: {0}")]
    OperationFailed(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for S3Error {
    fn from(err: std::io::Error) -> Self {
        S3Error::Io(err.to_string())
    }
}

/// Object body as returned by [`S3Client::get_object`], read incrementally.
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// A part accepted by the store during a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: Option<String>,
}

/// S3 client trait that both real and mock implementations use
#[async_trait]
pub trait S3Client: Send + Sync {
    /// Stream the file at `path` under `key` in one request
    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<(), S3Error>;

    /// Start a multipart upload and return its upload id
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, S3Error>;

    /// Upload one part. Part numbers start at 1.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, S3Error>;

    /// Assemble the uploaded parts into the final object. `parts` must be
    /// sorted by part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), S3Error>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3Error>;

    /// Open the object for streaming. Errors while reading the body surface
    /// as I/O errors from the returned reader.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody, S3Error>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error>;

    /// Lightweight connectivity check, returns the visible bucket names
    async fn list_buckets(&self) -> Result<Vec<String>, S3Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let s3_error = S3Error::from(io_error);
        assert_eq!(s3_error, S3Error::Io("pipe closed".to_string()));
    }

    #[test]
    fn test_s3_error_display() {
        assert_eq!(
            S3Error::NotFound("probe-a".to_string()).to_string(),
            "Object not found: probe-a"
        );
        assert_eq!(
            S3Error::OperationFailed("AccessDenied".to_string()).to_string(),
            "S3 operation failed: AccessDenied"
        );
    }
}
