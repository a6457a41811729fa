use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
        metrics::describe_histogram!(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        );
        metrics::describe_counter!(
            "matches_registered_total",
            "Matches successfully registered, by group"
        );
        metrics::describe_counter!(
            "matches_duplicate_total",
            "Match registrations short-circuited by an idempotency hit"
        );
        metrics::describe_counter!("matches_undone_total", "Matches undone");
        metrics::describe_counter!(
            "optimistic_conflicts_total",
            "Optimistic-lock conflicts encountered by the match engine"
        );
        metrics::describe_counter!(
            "optimistic_conflicts_exhausted_total",
            "Optimistic-lock retries that exhausted the retry budget"
        );
        metrics::describe_counter!(
            "identity_verifications_total",
            "Identity verifier outcomes, by result"
        );
        metrics::describe_counter!(
            "commands_rejected_total",
            "Commands rejected by topic scoping or authorization, by reason"
        );
        metrics::describe_gauge!(
            "database_connections_active",
            "Number of active database connections"
        );
        metrics::describe_counter!("database_queries_total", "Total number of database queries");

        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (StatusCode::OK, handle.render())
}

#[allow(dead_code)]
pub async fn track_request_metrics(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();

    metrics::counter!("http_requests_total").increment(1);
    metrics::histogram!("http_request_duration_seconds").record(duration.as_secs_f64());

    response
}

pub fn record_db_query(duration: Duration) {
    metrics::counter!("database_queries_total").increment(1);
    metrics::histogram!("database_query_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_match_registered() {
    metrics::counter!("matches_registered_total").increment(1);
}

pub fn record_match_duplicate() {
    metrics::counter!("matches_duplicate_total").increment(1);
}

pub fn record_match_undone() {
    metrics::counter!("matches_undone_total").increment(1);
}

pub fn record_optimistic_conflict() {
    metrics::counter!("optimistic_conflicts_total").increment(1);
}

pub fn record_optimistic_conflict_exhausted() {
    metrics::counter!("optimistic_conflicts_exhausted_total").increment(1);
}

pub fn record_identity_verification(result: &'static str) {
    metrics::counter!("identity_verifications_total", "result" => result).increment(1);
}

pub fn record_command_rejected(reason: &'static str) {
    metrics::counter!("commands_rejected_total", "reason" => reason).increment(1);
}
