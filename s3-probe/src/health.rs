use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common_s3::S3Client;
use tracing::warn;

/// Result of a readiness check, rendered as 200 or 503.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessStatus {
    Ready,
    NotReady(String),
}

impl ReadinessStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessStatus::Ready)
    }
}

impl IntoResponse for ReadinessStatus {
    fn into_response(self) -> Response {
        match self {
            ReadinessStatus::Ready => (StatusCode::OK, "ok").into_response(),
            ReadinessStatus::NotReady(reason) => {
                (StatusCode::SERVICE_UNAVAILABLE, reason).into_response()
            }
        }
    }
}

/// Ready means the object store answers a bucket listing within the
/// readiness timeout. Every check is a live call; nothing is cached.
#[derive(Clone)]
pub struct HealthChecker {
    client: Arc<dyn S3Client>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(client: Arc<dyn S3Client>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn readiness(&self) -> ReadinessStatus {
        match tokio::time::timeout(self.timeout, self.client.list_buckets()).await {
            Ok(Ok(_buckets)) => ReadinessStatus::Ready,
            Ok(Err(e)) => {
                warn!(error = %e, "readiness check failed");
                ReadinessStatus::NotReady(format!("object store unavailable: {e}"))
            }
            Err(_elapsed) => {
                warn!(timeout = ?self.timeout, "readiness check timed out");
                ReadinessStatus::NotReady(format!(
                    "object store did not answer within {:?}",
                    self.timeout
                ))
            }
        }
    }
}

/// The process is alive as long as it can answer.
pub async fn liveness() -> &'static str {
    "ok"
}
