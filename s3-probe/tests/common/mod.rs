#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use common_s3::MockS3Client;
use s3_probe::lifecycle::LifecycleEngine;
use s3_probe::metrics::InMemorySink;
use s3_probe::provision::{ProvisionedTarget, Provisioner};
use s3_probe::store::{MultipartSettings, ObjectStore};
use s3_probe::target::ProbeTarget;
use tempfile::TempDir;

pub const BUCKET: &str = "synthetic";

pub const SMALL_PARTS: MultipartSettings = MultipartSettings {
    threshold: 8 * 1024 * 1024,
    part_size: 8 * 1024 * 1024,
    concurrency: 5,
};

pub fn target(name: &str, size: u64, timeout: Duration) -> ProbeTarget {
    ProbeTarget {
        name: name.to_string(),
        size,
        upload_timeout: timeout,
        download_timeout: timeout,
        delete_timeout: timeout,
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub client: MockS3Client,
    pub sink: Arc<InMemorySink>,
    pub engine: Arc<LifecycleEngine>,
}

impl Harness {
    pub fn new(client: MockS3Client) -> Self {
        Self::with_multipart(client, SMALL_PARTS)
    }

    pub fn with_multipart(client: MockS3Client, multipart: MultipartSettings) -> Self {
        let sink = Arc::new(InMemorySink::new());
        let store = ObjectStore::new(Arc::new(client.clone()), BUCKET, multipart);
        let engine = Arc::new(LifecycleEngine::new(store, sink.clone()));
        Self {
            dir: TempDir::new().unwrap(),
            client,
            sink,
            engine,
        }
    }

    pub async fn provision(&self, targets: &[ProbeTarget]) -> Vec<ProvisionedTarget> {
        Provisioner::new(self.dir.path())
            .provision_all(targets)
            .await
            .unwrap()
    }
}
