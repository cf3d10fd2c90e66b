//! Structured JSON logging, plus OTLP trace export when
//! `observability.otlp_endpoint` is configured.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use sa_domain::config::ObservabilityConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `RUST_LOG` wins over the configured
/// log level when set.
pub fn init(observability: &ObservabilityConfig, log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},sa_gateway=debug")));
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    match &observability.otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_sampler(Sampler::TraceIdRatioBased(observability.sample_rate))
                .with_resource(
                    Resource::builder()
                        .with_service_name(observability.service_name.clone())
                        .build(),
                )
                .build();
            let tracer = provider.tracer("sa-gateway");
            registry.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
            tracing::info!(endpoint = %endpoint, "OTLP trace export enabled");
        }
        None => registry.init(),
    }
    Ok(())
}
