//! Logging and optional OpenTelemetry export.
//!
//! Logs always go to stdout through the fmt layer. When an OTLP endpoint is
//! configured, spans and log records are exported over gRPC as well.

use std::time::Duration;

use anyhow::{Context, Result};
use chimeconf::TelemetryConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps exporters alive; call [`TelemetryGuard::shutdown`] before exit.
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    /// Flush pending spans and log records.
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to shut down tracer provider: {e}");
            }
        }
        if let Some(provider) = self.logger_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to shut down logger provider: {e}");
            }
        }
    }
}

fn otlp_url(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

fn build_providers(otlp_endpoint: &str) -> Result<(SdkTracerProvider, SdkLoggerProvider)> {
    let resource = Resource::builder_empty()
        .with_service_name("chimebox")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = otlp_url(otlp_endpoint);

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(
            opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
        )
        .with_resource(resource)
        .build();

    Ok((tracer_provider, logger_provider))
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("Invalid log level {:?}", config.log_level))?;

    let providers = if config.otlp_endpoint.is_empty() {
        None
    } else {
        Some(build_providers(&config.otlp_endpoint)?)
    };

    let trace_layer = providers.as_ref().map(|(tracer_provider, _)| {
        global::set_tracer_provider(tracer_provider.clone());
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("chimebox"))
    });
    let log_layer = providers.as_ref().map(|(_, logger_provider)| {
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(logger_provider)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    match &providers {
        Some(_) => tracing::info!(endpoint = %config.otlp_endpoint, "OpenTelemetry export enabled"),
        None => tracing::debug!("OpenTelemetry export disabled"),
    }

    let (tracer_provider, logger_provider) = providers.unzip();
    Ok(TelemetryGuard {
        tracer_provider,
        logger_provider,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otlp_url_adds_scheme() {
        assert_eq!(otlp_url("127.0.0.1:4317"), "http://127.0.0.1:4317");
        assert_eq!(otlp_url("https://otel.example.org"), "https://otel.example.org");
    }
}
