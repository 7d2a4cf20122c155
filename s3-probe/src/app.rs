use std::sync::Arc;

use common_s3::S3Client;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ConfigError};
use crate::health::HealthChecker;
use crate::lifecycle::LifecycleEngine;
use crate::metrics::MetricsSink;
use crate::provision::{ProvisionError, Provisioner};
use crate::scheduler::Scheduler;
use crate::store::ObjectStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Everything the binary runs: the cycle scheduler, the provisioner that
/// owns the local artifacts, and the health checker behind the HTTP routes.
pub struct Probe {
    pub scheduler: Scheduler,
    pub provisioner: Provisioner,
    pub health: HealthChecker,
}

/// Validates the configuration and provisions every artifact before
/// anything runs. Nothing is probed if any target is invalid.
pub async fn startup(
    config: &Config,
    client: Arc<dyn S3Client>,
    sink: Arc<dyn MetricsSink>,
) -> Result<Probe, StartupError> {
    let targets = config.targets()?;
    let multipart = config.multipart(&targets)?;

    let mut provisioner = Provisioner::new(config.files_dir.clone());
    let provisioned = match provisioner.provision_all(&targets).await {
        Ok(provisioned) => provisioned,
        Err(e) => {
            provisioner.cleanup().await;
            return Err(e.into());
        }
    };

    let store = ObjectStore::new(client.clone(), config.s3_bucket.clone(), multipart);
    let engine = Arc::new(LifecycleEngine::new(store, sink.clone()));
    let scheduler = Scheduler::new(engine, provisioned, config.cycle_interval(), sink);
    let health = HealthChecker::new(client, config.readiness_timeout());

    info!(
        targets = targets.len(),
        bucket = %config.s3_bucket,
        files_dir = %config.files_dir.display(),
        "probe ready to start"
    );
    Ok(Probe {
        scheduler,
        provisioner,
        health,
    })
}
