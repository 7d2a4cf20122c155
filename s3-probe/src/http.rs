use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::health::{liveness, HealthChecker, ReadinessStatus};

pub const SERVICE_NAME: &str = "s3-probe";

async fn index() -> &'static str {
    SERVICE_NAME
}

async fn readiness(State(health): State<HealthChecker>) -> ReadinessStatus {
    health.readiness().await
}

/// Liveness, readiness and, when a handle is given, the Prometheus scrape
/// endpoint.
pub fn router(health: HealthChecker, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/healthz", get(liveness))
        .route("/_liveness", get(liveness))
        .route("/ready", get(readiness))
        .route("/_readiness", get(readiness))
        .with_state(health);

    match metrics {
        Some(handle) => router
            .route(
                "/metrics",
                get(move || std::future::ready(handle.render())),
            )
            .layer(axum::middleware::from_fn(track_metrics)),
        None => router,
    }
}

/// Bind a `TcpListener` on the provided bind address and serve `router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
