//! One Put / Get / Verify / Delete pass over a single provisioned target.
//!
//! A run never fails as a whole: each step's result is turned into metrics
//! and logs, and the outcome records what happened for callers and tests.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::metrics::MetricsSink;
use crate::provision::ProvisionedTarget;
use crate::store::{ObjectStore, OperationError};
use crate::target::Operation;
use crate::verify::{self, IntegrityVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Uploading,
    Downloading,
    Verifying,
    LocalCleanup,
    Deleting,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub duration: Duration,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// What a single run did. Steps that never ran are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleOutcome {
    pub file: String,
    pub upload: Option<StepOutcome>,
    pub download: Option<StepOutcome>,
    pub delete: Option<StepOutcome>,
    pub integrity: IntegrityVerdict,
    /// Stages in the order they were entered, from `Start` to `Done`
    pub stages: Vec<Stage>,
}

impl LifecycleOutcome {
    fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            upload: None,
            download: None,
            delete: None,
            integrity: IntegrityVerdict::Skipped,
            stages: vec![Stage::Start],
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(file = %self.file, ?stage, "entering stage");
        self.stages.push(stage);
    }
}

pub struct LifecycleEngine {
    store: ObjectStore,
    sink: Arc<dyn MetricsSink>,
}

impl LifecycleEngine {
    pub fn new(store: ObjectStore, sink: Arc<dyn MetricsSink>) -> Self {
        Self { store, sink }
    }

    pub async fn run(&self, provisioned: &ProvisionedTarget) -> LifecycleOutcome {
        let target = &provisioned.target;
        let name = target.name.as_str();
        let mut outcome = LifecycleOutcome::new(name);

        outcome.enter(Stage::Uploading);
        let upload = self
            .step(name, Operation::Upload, async {
                self.store
                    .put(
                        name,
                        &provisioned.artifact,
                        target.size,
                        target.timeout(Operation::Upload),
                    )
                    .await
                    .map(|strategy| debug!(file = name, ?strategy, "upload strategy"))
            })
            .await;
        outcome.upload = Some(upload);
        if !upload.succeeded() {
            // Nothing was stored, so there is nothing to fetch or delete.
            outcome.enter(Stage::Done);
            return outcome;
        }

        outcome.enter(Stage::Downloading);
        let download = self
            .step(name, Operation::Download, async {
                self.store
                    .get(
                        name,
                        &provisioned.download_path,
                        target.timeout(Operation::Download),
                    )
                    .await
                    .map(|bytes| debug!(file = name, bytes, "downloaded"))
            })
            .await;
        outcome.download = Some(download);

        if download.succeeded() {
            outcome.enter(Stage::Verifying);
            outcome.integrity = self.verify(name, provisioned).await;
        }

        outcome.enter(Stage::LocalCleanup);
        remove_download(name, &provisioned.download_path).await;

        outcome.enter(Stage::Deleting);
        let delete = self
            .step(name, Operation::Delete, async {
                self.store
                    .delete(name, target.timeout(Operation::Delete))
                    .await
            })
            .await;
        outcome.delete = Some(delete);

        outcome.enter(Stage::Done);
        outcome
    }

    /// Runs one network step, timing it and publishing its flags. Upload and
    /// download durations are only published on success; a delete's
    /// duration is published whatever the result.
    async fn step<F>(&self, file: &str, operation: Operation, fut: F) -> StepOutcome
    where
        F: Future<Output = Result<(), OperationError>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let duration = started.elapsed();

        if result.is_ok() || operation == Operation::Delete {
            self.sink
                .record_duration(file, operation, duration.as_secs_f64());
        }

        let status = match result {
            Ok(()) => {
                info!(file, %operation, duration_secs = duration.as_secs_f64(), "operation succeeded");
                StepStatus::Succeeded
            }
            Err(e) if e.is_timeout() => {
                warn!(file, %operation, error = %e, "operation timed out");
                StepStatus::TimedOut
            }
            Err(e) => {
                error!(file, %operation, error = %e, "operation failed");
                StepStatus::Failed
            }
        };
        self.sink.record_step_flags(
            file,
            operation,
            status == StepStatus::TimedOut,
            status == StepStatus::Failed,
        );

        StepOutcome { status, duration }
    }

    async fn verify(&self, file: &str, provisioned: &ProvisionedTarget) -> IntegrityVerdict {
        match verify::verify(&provisioned.artifact, &provisioned.download_path).await {
            Ok(verdict) => {
                let matched = verdict == IntegrityVerdict::Match;
                self.sink.record_integrity(file, matched);
                if matched {
                    info!(file, "downloaded copy matches artifact");
                } else {
                    warn!(file, "downloaded copy differs from artifact");
                }
                verdict
            }
            Err(e) => {
                error!(file, error = %e, "could not verify downloaded copy");
                IntegrityVerdict::Skipped
            }
        }
    }
}

async fn remove_download(file: &str, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file, path = %path.display(), error = %e, "failed to remove downloaded copy"),
    }
}
