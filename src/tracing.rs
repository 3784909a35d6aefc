//! Tracing (logging)

use crate::cli::CommandLineArgs;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initlialise tracing (logging)
///
/// Applies a filter based on the `RUST_LOG` environment variable, falling back to enable debug
/// logging for this crate and tower_http if not set.
///
/// If Jaeger is enabled, spans are also exported to a Jaeger agent using the default agent
/// endpoint, which may be overridden with the `OTEL_EXPORTER_JAEGER_AGENT_HOST` and
/// `OTEL_EXPORTER_JAEGER_AGENT_PORT` environment variables.
///
/// # Arguments
///
/// * `args`: Command line arguments
pub fn init_tracing(args: &CommandLineArgs) {
    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "airmetrics=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer());

    if !args.enable_jaeger {
        registry.init();
        return;
    }

    opentelemetry::global::set_text_map_propagator(opentelemetry_jaeger::Propagator::new());
    match opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name("airmetrics")
        .install_batch(opentelemetry::runtime::Tokio)
    {
        Ok(tracer) => {
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();
        }
        Err(err) => {
            registry.init();
            tracing::warn!("failed to install Jaeger pipeline, traces will not be exported: {}", err);
        }
    }
}

/// Flush and shut down the tracing pipeline.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
