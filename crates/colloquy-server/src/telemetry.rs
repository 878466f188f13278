use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::{self as sdk, Resource};
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::rate_limit::RateLimiter;

/// Guard that flushes and shuts down OTel providers on drop.
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: SdkLoggerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("failed to shut down tracer provider: {e}");
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("failed to shut down meter provider: {e}");
        }
        if let Err(e) = self.logger_provider.shutdown() {
            eprintln!("failed to shut down logger provider: {e}");
        }
    }
}

/// Where and under what name to export OpenTelemetry data.
#[derive(Debug, PartialEq, Eq)]
struct OtelSettings {
    endpoint: String,
    service_name: String,
}

impl OtelSettings {
    /// `None` when `OTEL_EXPORTER_OTLP_ENDPOINT` is unset or blank.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty())?;
        let service_name = lookup("OTEL_SERVICE_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "colloquy-server".to_string());
        Some(Self {
            endpoint,
            service_name,
        })
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_attributes([
                KeyValue::new(
                    opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
                    env!("CARGO_PKG_VERSION"),
                ),
            ])
            .build()
    }
}

/// Initialise logging, and OpenTelemetry export when configured.
///
/// Console `fmt` output is always installed, filtered by `RUST_LOG`
/// (default `info`). When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, traces,
/// metrics and logs are additionally exported over OTLP HTTP/protobuf.
///
/// The returned guard **must** be held until the end of `main` so pending
/// telemetry is flushed on shutdown.
pub fn init_telemetry() -> Result<Option<TelemetryGuard>, String> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(settings) = OtelSettings::from_lookup(|key| std::env::var(key).ok()) else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    };

    // Incoming `traceparent` headers continue the caller's trace.
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![Box::new(
        TraceContextPropagator::new(),
    )]));

    let resource = settings.resource();

    // No explicit endpoint on the builders: each exporter reads
    // OTEL_EXPORTER_OTLP_ENDPOINT and _HEADERS and appends its signal path.
    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .build()
        .map_err(|e| format!("failed to create OTLP trace exporter: {e}"))?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter)
        .with_resource(resource.clone())
        .build();

    // The rate limit decision counter and window gauge are recorded against
    // the global meter, so the provider has to be installed before any
    // limiter is built.
    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .build()
        .map_err(|e| format!("failed to create OTLP metric exporter: {e}"))?;
    let meter_provider = SdkMeterProvider::builder()
        .with_reader(
            sdk::metrics::PeriodicReader::builder(metric_exporter)
                .with_interval(std::time::Duration::from_secs(15))
                .build(),
        )
        .with_resource(resource.clone())
        .build();
    global::set_meter_provider(meter_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_http()
        .build()
        .map_err(|e| format!("failed to create OTLP log exporter: {e}"))?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource)
        .build();

    // One filter gates every layer: events dropped for the console are not
    // exported either.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(OpenTelemetryLayer::new(tracer_provider.tracer("colloquy-server")))
        .with(MetricsLayer::new(meter_provider.clone()))
        .with(OpenTelemetryTracingBridge::new(&logger_provider))
        .init();

    tracing::info!(
        endpoint = %settings.endpoint,
        service = %settings.service_name,
        "OpenTelemetry export enabled"
    );

    Ok(Some(TelemetryGuard {
        tracer_provider,
        meter_provider,
        logger_provider,
    }))
}

/// Register an observable gauge reporting how many rate limit windows each
/// limiter currently tracks.
///
/// Safe to call without OTel: with no meter provider installed the callback
/// is never invoked.
pub fn spawn_rate_limit_metrics(limiters: &[RateLimiter]) {
    let meter = global::meter("colloquy-server");
    let limiters = limiters.to_vec();

    let _windows_gauge = meter
        .u64_observable_gauge("rate_limit.tracked_windows")
        .with_description("Per-user rate limit windows held in memory")
        .with_callback(move |observer| {
            for limiter in &limiters {
                observer.observe(
                    limiter.store().len() as u64,
                    &[KeyValue::new("limiter", limiter.name())],
                );
            }
        })
        .build();
}
