use std::process::ExitCode;
use std::sync::Arc;

use common_s3::S3Impl;
use envconfig::Envconfig;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use s3_probe::app::startup;
use s3_probe::config::{Config, LogFormat};
use s3_probe::http::{router, serve, setup_metrics_recorder};
use s3_probe::metrics::{describe_metrics, PrometheusSink};
use s3_probe::shutdown::{wait_for_shutdown_signal, wait_for_stop};

fn init_tracing(config: &Config) {
    // RUST_LOG directives win over LOG_LEVEL
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let base_layer = fmt::layer().with_target(true).with_level(true);
    let log_layer = match config.log_format {
        LogFormat::Json => base_layer.json().with_filter(filter).boxed(),
        LogFormat::Text => base_layer.with_filter(filter).boxed(),
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    let metrics = match setup_metrics_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to install metrics recorder");
            return ExitCode::FAILURE;
        }
    };
    describe_metrics();

    let client = Arc::new(S3Impl::from_settings(&config.s3_settings()));
    let probe = match startup(&config, client, Arc::new(PrometheusSink)).await {
        Ok(probe) => probe,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let bind = config.bind_address();
    let server = tokio::spawn({
        let app = router(probe.health.clone(), Some(metrics));
        let bind = bind.clone();
        async move { serve(app, &bind).await }
    });
    info!(%bind, "serving health and metrics");

    let shutdown = CancellationToken::new();
    let scheduler = probe.scheduler;
    let cycles = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    let reason = wait_for_stop(wait_for_shutdown_signal(), server).await;
    let code = ExitCode::from(reason.exit_code());

    info!("shutting down");
    shutdown.cancel();
    if let Err(e) = cycles.await {
        error!(error = %e, "scheduler task panicked");
    }
    probe.provisioner.cleanup().await;
    info!("shutdown complete");
    code
}
