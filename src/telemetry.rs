//! Tracing initialization with optional OpenTelemetry export.
//!
//! Request spans (tagged by the request-id middleware), worker job spans,
//! and provider-call events all flow through the subscriber built here.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LogFormat, TelemetryConfig};

pub fn init_telemetry(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.logging.level)));

    // Option<Layer> is itself a layer, so OTLP export stays a single
    // optional stage instead of forking the whole subscriber stack.
    let tracer = build_tracer(&config.telemetry);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_current_span(true),
                )
                .with(tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t)))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_target(false))
                .with(tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t)))
                .init();
        }
    }
}

/// Default filter when RUST_LOG is unset: the configured level for this
/// service, with the HTTP internals and the blob-store SDK held at `warn`
/// (the S3 client logs every retry negotiation at `debug`).
fn default_directives(level: &str) -> String {
    format!("{level},hyper=warn,h2=warn,aws_config=warn,aws_smithy_runtime=warn")
}

fn build_tracer(config: &TelemetryConfig) -> Option<sdktrace::Tracer> {
    let endpoint = config.otlp_endpoint.as_ref()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .ok()?;

    let resource = Resource::new([
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let provider = sdktrace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    Some(provider.tracer(concat!("recast/", env!("CARGO_PKG_VERSION"))))
}

pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse_as_a_filter() {
        let directives = default_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_no_tracer_without_endpoint() {
        let config = TelemetryConfig {
            otlp_endpoint: None,
            service_name: "test".to_string(),
        };

        assert!(build_tracer(&config).is_none());
    }
}
