use std::path::Path;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as AwsCompletedPart};
use aws_sdk_s3::Client as AwsS3SdkClient;
use bytes::Bytes;
use tracing::info;

use crate::{CompletedPart, ObjectBody, S3Client, S3Error};

/// Connection settings for an S3-compatible endpoint with static credentials.
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub force_path_style: bool,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("force_path_style", &self.force_path_style)
            .finish_non_exhaustive()
    }
}

/// Real S3 client implementation
pub struct S3Impl {
    client: AwsS3SdkClient,
}

impl S3Impl {
    pub fn new(client: AwsS3SdkClient) -> Self {
        Self { client }
    }

    /// Build a client for the given endpoint. SDK retries are disabled: every
    /// failure must reach the caller as-is.
    ///
    /// The default SDK transport negotiates HTTP/2 over ALPN when the endpoint
    /// offers it and falls back to HTTP/1.1 otherwise.
    pub fn from_settings(settings: &S3Settings) -> Self {
        info!(
            endpoint = %settings.endpoint,
            region = %settings.region,
            "Using explicit S3 credentials from config"
        );
        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            "environment",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(&settings.endpoint)
            .credentials_provider(credentials)
            .force_path_style(settings.force_path_style)
            .retry_config(RetryConfig::disabled())
            .build();

        Self::new(AwsS3SdkClient::from_conf(config))
    }
}

fn operation_failed<E>(context: &str, err: E) -> S3Error
where
    E: std::error::Error,
{
    S3Error::OperationFailed(format!("{context}: {}", DisplayErrorContext(&err)))
}

#[async_trait]
impl S3Client for S3Impl {
    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<(), S3Error> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| S3Error::Io(format!("Failed to open {}: {e}", path.display())))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| operation_failed("Failed to put object to S3", e))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, S3Error> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| operation_failed("Failed to create multipart upload", e))?;

        output.upload_id().map(str::to_owned).ok_or_else(|| {
            S3Error::OperationFailed(
                "Multipart upload creation response missing upload ID".to_string(),
            )
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, S3Error> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| operation_failed(&format!("Failed to upload part {part_number}"), e))?;

        Ok(CompletedPart {
            part_number,
            e_tag: output.e_tag().map(str::to_owned),
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), S3Error> {
        let parts = parts
            .into_iter()
            .map(|part| {
                AwsCompletedPart::builder()
                    .set_e_tag(part.e_tag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| operation_failed("Failed to complete multipart upload", e))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3Error> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| operation_failed("Failed to abort multipart upload", e))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody, S3Error> {
        let get_object_output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!(
                    "Failed to get object from S3: {}",
                    DisplayErrorContext(&e)
                );
                if let aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_) =
                    e.into_service_error()
                {
                    S3Error::NotFound(key.to_string())
                } else {
                    S3Error::OperationFailed(error_message)
                }
            })?;

        let body: ObjectBody = Box::pin(get_object_output.body.into_async_read());
        Ok(body)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| operation_failed("Failed to delete object from S3", e))?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, S3Error> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| operation_failed("Failed to list buckets", e))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_owned))
            .collect())
    }
}
