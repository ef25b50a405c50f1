//! Telemetry logic.
//! OTLP export of traces and logs, Prometheus metrics for HTTP traffic,
//! the process and account lifecycle.
use axum::extract::{MatchedPath, Request};
use axum::http::Version;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::{Unit, counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle,
};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

use std::time::{Duration, Instant};

type Error = Box<dyn std::error::Error + Send + Sync>;

const HTTP_REQUESTS: &str = "http_requests_total";
const HTTP_DURATION: &str = "http_requests_duration_seconds";
const PROCESS_CPU: &str = "process_cpu_usage";
const PROCESS_MEMORY: &str = "process_memory_used_bytes";
pub const ACCOUNTS_REGISTERED: &str = "accounts_registered_total";
pub const EMAIL_CONFIRMATIONS: &str = "email_confirmations_total";
pub const LOGINS: &str = "logins_total";

const PROCESS_REFRESH: Duration = Duration::from_secs(10);

fn resource() -> Resource {
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attributes([KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build()
}

/// Create span exporter towards the OTLP `endpoint`.
pub fn setup_tracer(endpoint: &str) -> Result<SdkTracerProvider, Error> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

/// Create `tracing` layer forwarding log records to the OTLP `endpoint`.
pub fn setup_logging(
    endpoint: &str,
) -> Result<OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>, Error> {
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = SdkLoggerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build();

    Ok(OpenTelemetryTracingBridge::new(&provider))
}

/// Install the global Prometheus recorder.
///
/// Must be called inside a Tokio runtime: process gauges are refreshed by a
/// background task.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_DURATION.to_owned()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()?;

    describe_metrics();
    spawn_process_gauges();

    Ok(handle)
}

/// Register units and help texts on the current recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS, "Handled HTTP requests.");
    describe_gauge!(
        PROCESS_CPU,
        Unit::Percent,
        "CPU usage of the process in percentage."
    );
    describe_gauge!(
        PROCESS_MEMORY,
        Unit::Bytes,
        "Total process memory in bytes."
    );
    describe_counter!(ACCOUNTS_REGISTERED, "Accounts created, unconfirmed.");
    describe_counter!(
        EMAIL_CONFIRMATIONS,
        "Confirmation links visited, by outcome."
    );
    describe_counter!(LOGINS, "Login attempts, by outcome.");
}

fn spawn_process_gauges() {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new_with_specifics(RefreshKind::nothing());

    tokio::spawn(async move {
        loop {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory().with_cpu(),
            );

            if let Some(process) = system.process(pid) {
                gauge!(PROCESS_MEMORY).set(process.memory() as f64);
                gauge!(PROCESS_CPU).set(process.cpu_usage() as f64);
            }

            tokio::time::sleep(PROCESS_REFRESH).await;
        }
    });
}

/// An account was created.
pub fn record_registration() {
    counter!(ACCOUNTS_REGISTERED).increment(1);
}

/// A confirmation code was submitted.
pub fn record_confirmation(outcome: &'static str) {
    counter!(EMAIL_CONFIRMATIONS, "outcome" => outcome).increment(1);
}

/// Credentials were submitted.
pub fn record_login(outcome: &'static str) {
    counter!(LOGINS, "outcome" => outcome).increment(1);
}

fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "UNKNOWN",
    }
}

/// Middleware recording a span, a counter and a latency histogram per
/// request.
///
/// Paths are labelled by route template so confirmation codes do not end up
/// in metric labels.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let mut span = global::tracer("mailconfirm-http").start("http-request");

    let start = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().to_string();
    let version = http_version(req.version());

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    span.set_attributes([
        KeyValue::new("version", version),
        KeyValue::new("path", route.clone()),
        KeyValue::new("method", method.clone()),
        KeyValue::new("status", status.clone()),
    ]);
    span.end();

    let labels = [("method", method), ("path", route), ("status", status)];
    counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_DURATION, &labels).record(latency);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_metrics() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            record_registration();
            record_registration();
            record_confirmation("confirmed");
            record_confirmation("unknown");
            record_login("rejected");
        });

        let rendered = handle.render();
        assert!(rendered.contains("accounts_registered_total 2"));
        assert!(rendered.contains(
            r#"email_confirmations_total{outcome="confirmed"} 1"#
        ));
        assert!(rendered.contains(
            r#"email_confirmations_total{outcome="unknown"} 1"#
        ));
        assert!(rendered.contains(r#"logins_total{outcome="rejected"} 1"#));
        assert!(!rendered.contains(r#"logins_total{outcome="established"}"#));
    }

    #[test]
    fn test_http_version() {
        assert_eq!(http_version(Version::HTTP_11), "HTTP/1.1");
        assert_eq!(http_version(Version::HTTP_2), "HTTP/2");
    }
}
