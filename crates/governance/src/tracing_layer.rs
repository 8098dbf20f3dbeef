//! Logging and distributed tracing configuration.

use agent_relay_core::config::LoggingConfig;
use agent_relay_core::{Error, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

const DEFAULT_FILTER: &str = "info,agentrelay=debug";

fn env_filter(config: &LoggingConfig) -> tracing_subscriber::EnvFilter {
    let directives = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| config.filter.clone())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    tracing_subscriber::EnvFilter::try_new(&directives)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
}

/// Configure stdout logging, plus OpenTelemetry export when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
pub fn configure_tracing(config: &LoggingConfig) -> Result<()> {
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(config));

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "agentrelay"),
            ])))
            .install_batch(runtime::Tokio)
            .map_err(|e| Error::config(format!("Failed to install OTLP pipeline: {}", e)))?;

        let tracer = provider.tracer("agentrelay");
        opentelemetry::global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .map_err(|e| Error::config(format!("Failed to install subscriber: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    } else {
        registry
            .try_init()
            .map_err(|e| Error::config(format!("Failed to install subscriber: {}", e)))?;
    }

    Ok(())
}
