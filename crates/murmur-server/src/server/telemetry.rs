//! Logging and optional OpenTelemetry export for the session service.
//!
//! Console output through `tracing-subscriber` is always installed and
//! filtered by `RUST_LOG` (default `info`). OpenTelemetry is opt-in:
//!
//! - `otel`: registration and prediction spans are exported as traces.
//! - `metrics`: admission, prediction and stream counters are exported.
//! - `stdout` / `honeycomb`: where the above are sent. Either or both, but
//!   only together with `otel` or `metrics`.
//!
//! The metric helpers at the bottom of this module are always callable and
//! do nothing unless `metrics` is enabled and [`init_telemetry`] has run.

#[cfg(all(feature = "honeycomb", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'honeycomb' feature requires at least one of 'otel' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'otel' or 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(
    all(feature = "otel", any(feature = "stdout", feature = "honeycomb")),
    all(feature = "metrics", feature = "stdout")
))]
use core::time::Duration;

const SERVICE_NAME: &str = "murmur";

#[cfg(any(
    all(feature = "otel", any(feature = "stdout", feature = "honeycomb")),
    all(feature = "metrics", feature = "stdout")
))]
const EXPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Handles kept alive for the life of the process so buffered telemetry can
/// be flushed on shutdown.
pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every enabled provider. Failures go to stderr
    /// because the subscriber may already be gone.
    pub fn shutdown(&self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(
        opentelemetry_sdk::propagation::TraceContextPropagator::new(),
    );

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "otel"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let _ = METRICS.set(Metrics::new(&opentelemetry::global::meter_with_scope(scope)));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "otel"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "otel")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batched(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "honeycomb")]
    let builder = builder.with_span_processor(batched(
        honeycomb::OtlpTarget::from_env()?.span_exporter()?,
    ));

    Ok(builder.build())
}

#[cfg(all(feature = "otel", any(feature = "stdout", feature = "honeycomb")))]
fn batched<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: sdktrace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(EXPORT_INTERVAL)
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(EXPORT_INTERVAL)
            .build(),
    );

    #[cfg(feature = "honeycomb")]
    let builder =
        builder.with_periodic_exporter(honeycomb::OtlpTarget::from_env()?.metric_exporter()?);

    Ok(builder.build())
}

#[cfg(feature = "honeycomb")]
mod honeycomb {
    use anyhow::Context;
    use core::{str::FromStr, time::Duration};
    use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
    use tonic::{metadata::MetadataMap, transport::ClientTlsConfig};

    /// Where and how OTLP data is shipped, read once at startup.
    pub(super) struct OtlpTarget {
        endpoint: String,
        compression: Compression,
        metadata: MetadataMap,
    }

    impl OtlpTarget {
        pub(super) fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        pub(super) fn from_lookup(
            lookup: impl Fn(&str) -> Option<String>,
        ) -> anyhow::Result<Self> {
            let var = |key: &'static str| lookup(key).with_context(|| format!("missing `{key}`"));

            let mut metadata = MetadataMap::new();
            metadata.insert(
                "x-honeycomb-team",
                var("HONEYCOMB_API_KEY")?
                    .parse()
                    .context("invalid API key")?,
            );
            metadata.insert(
                "x-honeycomb-dataset",
                var("HONEYCOMB_DATASET")?
                    .parse()
                    .context("invalid dataset")?,
            );
            let compression =
                Compression::from_str(&var("HONEYCOMB_COMPRESSION")?.to_ascii_lowercase())?;

            Ok(Self {
                endpoint: var("HONEYCOMB_ENDPOINT")?,
                compression,
                metadata,
            })
        }

        #[cfg(feature = "otel")]
        pub(super) fn span_exporter(&self) -> anyhow::Result<opentelemetry_otlp::SpanExporter> {
            opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_tls_config(ClientTlsConfig::new().with_native_roots())
                .with_metadata(self.metadata.clone())
                .with_timeout(Duration::from_secs(10))
                .with_compression(self.compression)
                .with_endpoint(self.endpoint.clone())
                .with_protocol(Protocol::Grpc)
                .build()
                .context("failed to build span exporter")
        }

        #[cfg(feature = "metrics")]
        pub(super) fn metric_exporter(
            &self,
        ) -> anyhow::Result<opentelemetry_otlp::MetricExporter> {
            opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_tls_config(ClientTlsConfig::new().with_native_roots())
                .with_metadata(self.metadata.clone())
                .with_timeout(Duration::from_secs(10))
                .with_compression(self.compression)
                .with_endpoint(self.endpoint.clone())
                .with_protocol(Protocol::Grpc)
                .with_temporality(opentelemetry_sdk::metrics::Temporality::Delta)
                .build()
                .context("failed to build metric exporter")
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn lookup(key: &str) -> Option<String> {
            match key {
                "HONEYCOMB_API_KEY" => Some("key".into()),
                "HONEYCOMB_DATASET" => Some("murmur".into()),
                "HONEYCOMB_ENDPOINT" => Some("https://api.honeycomb.io:443".into()),
                "HONEYCOMB_COMPRESSION" => Some("GZIP".into()),
                _ => None,
            }
        }

        #[test]
        fn target_reads_every_variable() {
            let target = OtlpTarget::from_lookup(lookup).unwrap();
            assert_eq!(target.endpoint, "https://api.honeycomb.io:443");
            assert!(matches!(target.compression, Compression::Gzip));
            assert_eq!(target.metadata.len(), 2);
        }

        #[test]
        fn missing_variable_is_named() {
            let err = OtlpTarget::from_lookup(|key| {
                (key != "HONEYCOMB_DATASET").then(|| lookup(key)).flatten()
            })
            .err()
            .unwrap();
            assert!(err.to_string().contains("HONEYCOMB_DATASET"));
        }
    }
}

/// Instruments for one process, built once the meter provider exists.
#[cfg(feature = "metrics")]
struct Metrics {
    registrations: Counter<u64>,
    admission_rejections: Counter<u64>,
    predictions: Counter<u64>,
    streams_inflight: UpDownCounter<i64>,
    stream_errors: Counter<u64>,
    stream_duration_ms: Histogram<f64>,
    fragments_sent: Counter<u64>,
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Metrics> = OnceLock::new();

#[cfg(feature = "metrics")]
impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            registrations: meter
                .u64_counter("murmur.registrations")
                .with_description("Sessions admitted")
                .build(),
            admission_rejections: meter
                .u64_counter("murmur.admission_rejections")
                .with_description("Registrations refused, by reason")
                .build(),
            predictions: meter
                .u64_counter("murmur.predictions")
                .with_description("Prediction channels accepted")
                .build(),
            streams_inflight: meter
                .i64_up_down_counter("murmur.streams_inflight")
                .with_description("Prediction streams currently running")
                .build(),
            stream_errors: meter
                .u64_counter("murmur.stream_errors")
                .with_description("Prediction streams that ended in a failure close")
                .build(),
            stream_duration_ms: meter
                .f64_histogram("murmur.stream_duration")
                .with_unit("ms")
                .with_description("Time from accepted prediction to close")
                .build(),
            fragments_sent: meter
                .u64_counter("murmur.fragments_sent")
                .with_description("Text fragments streamed to clients")
                .build(),
        }
    }
}

#[cfg(feature = "metrics")]
fn record(f: impl FnOnce(&Metrics)) {
    if let Some(metrics) = METRICS.get() {
        f(metrics);
    }
}

pub fn increment_registrations() {
    #[cfg(feature = "metrics")]
    record(|m| m.registrations.add(1, &[]));
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn increment_admission_rejections(reason: &'static str) {
    #[cfg(feature = "metrics")]
    record(|m| {
        m.admission_rejections
            .add(1, &[KeyValue::new("reason", reason)]);
    });
}

pub fn increment_predictions() {
    #[cfg(feature = "metrics")]
    record(|m| m.predictions.add(1, &[]));
}

pub fn increment_streams_inflight() {
    #[cfg(feature = "metrics")]
    record(|m| m.streams_inflight.add(1, &[]));
}

pub fn decrement_streams_inflight() {
    #[cfg(feature = "metrics")]
    record(|m| m.streams_inflight.add(-1, &[]));
}

pub fn increment_stream_errors() {
    #[cfg(feature = "metrics")]
    record(|m| m.stream_errors.add(1, &[]));
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn record_stream_duration(duration_ms: f64) {
    #[cfg(feature = "metrics")]
    record(|m| m.stream_duration_ms.record(duration_ms, &[]));
}

pub fn increment_fragments_sent() {
    #[cfg(feature = "metrics")]
    record(|m| m.fragments_sent.add(1, &[]));
}
