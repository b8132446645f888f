//! Logging and telemetry initialization with conditional OpenTelemetry support.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::settings::LoggingConfig;

#[cfg(feature = "with-observability")]
use {
    opentelemetry::{global as otel_global, sdk::Resource},
    opentelemetry_otlp::{self as otlp, WithExportConfig},
    tracing_opentelemetry,
};

/// Initialize logging and telemetry based on configuration.
pub fn init(logging: &LoggingConfig, otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.as_str()))?;

    #[cfg(feature = "with-observability")]
    if let Some(endpoint) = otlp_endpoint {
        return init_with_otlp(endpoint, logging, filter);
    }

    #[cfg(not(feature = "with-observability"))]
    if otlp_endpoint.is_some() {
        tracing::warn!(
            "otlp_endpoint configured but built without the with-observability feature"
        );
    }

    init_console_only(logging, filter)
}

#[cfg(feature = "with-observability")]
fn init_with_otlp(endpoint: &str, logging: &LoggingConfig, filter: EnvFilter) -> Result<()> {
    let tracer = otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp::new_exporter().tonic().with_endpoint(endpoint))
        .with_trace_config(opentelemetry::sdk::trace::config().with_resource(
            Resource::new(vec![opentelemetry::KeyValue::new(
                "service.name",
                "career_concierge",
            )]),
        ))
        .install_batch(opentelemetry::runtime::Tokio)?;

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    if logging.format == "json" {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .with(telemetry);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(telemetry);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    otel_global::set_text_map_propagator(
        opentelemetry::sdk::propagation::TraceContextPropagator::new(),
    );

    tracing::info!("Telemetry initialized with OTLP endpoint: {}", endpoint);
    Ok(())
}

fn init_console_only(logging: &LoggingConfig, filter: EnvFilter) -> Result<()> {
    if logging.format == "json" {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false));
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false));
        tracing::subscriber::set_global_default(subscriber)?;
    }

    tracing::info!("Console logging initialized");
    Ok(())
}
