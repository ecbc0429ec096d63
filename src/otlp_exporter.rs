//! OTLP export (spec §4.F "Span assembler", §6 "External interfaces:
//! wire — the external exporter pipeline speaks OTLP").
//!
//! By the time a `SpanRecord` reaches this module it is already complete:
//! the Context Propagation Core minted its trace/span ids, the matching
//! `Probe` decided its name/kind/attributes, and `sampler` already decided
//! to keep it. This exporter's only job is handing that record to the
//! OpenTelemetry SDK with those ids preserved exactly — never through the
//! SDK's own `IdGenerator`, which would mint new, unrelated ones and break
//! every parent/child link the agent already computed. `SpanBuilder`'s
//! `trace_id`/`span_id` fields are always set explicitly before
//! `build_with_context`, and the tracer provider's own sampler is pinned
//! to `AlwaysOn` so it never second-guesses a decision already made.

use crate::ring_buffer::SpanBatchSink;
use crate::span::SpanRecord;

/// Protocol the OTLP exporter speaks (spec §6 `OTEL_EXPORTER_OTLP_PROTOCOL`,
/// a standard OpenTelemetry SDK environment variable; the spec calls the
/// wire format itself out of scope beyond "OTLP", but an exporter still has
/// to pick one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpProtocol {
    Grpc,
    HttpProtobuf,
}

/// Resolved OTLP exporter configuration.
#[derive(Debug, Clone)]
pub struct OtlpConfig {
    pub endpoint: String,
    pub protocol: OtlpProtocol,
}

impl OtlpConfig {
    /// Reads the standard `OTEL_EXPORTER_OTLP_*` variables (spec §6 lists
    /// only the agent's own `OTEL_GO_AUTO_*`/`OTEL_TRACES_*` family as
    /// in-scope env, but the OTLP endpoint itself is ambient OTel SDK
    /// configuration every exporter in this ecosystem reads the same way).
    pub fn from_env() -> Self {
        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")
            .or_else(|_| std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT"))
            .unwrap_or_else(|_| "http://localhost:4317".to_string());
        let protocol = match std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Ok("http/protobuf") => OtlpProtocol::HttpProtobuf,
            _ => OtlpProtocol::Grpc,
        };
        Self { endpoint, protocol }
    }
}

/// The spec §6 User-Agent string: `"<distro>/<version> <lang-runtime>/<ver>
/// (<os>/<arch>)"`.
pub fn user_agent() -> String {
    format!(
        "otel-auto-agent/{} rustc/{} ({}/{})",
        env!("CARGO_PKG_VERSION"),
        option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

#[cfg(feature = "otlp")]
mod enabled {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use anyhow::{Context as _, Result};
    use opentelemetry::{
        trace::{
            SpanBuilder, SpanContext as OtelSpanContext, SpanId, SpanKind as OtelSpanKind,
            Status as OtelStatus, TraceContextExt, TraceFlags, TraceId, TraceState, Tracer,
            TracerProvider as _,
        },
        Context as OtelContext, KeyValue,
    };
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{BatchSpanProcessor, Sampler as SdkSampler, SdkTracerProvider};
    use opentelemetry_sdk::Resource as SdkResource;
    use tonic::metadata::MetadataMap;
    use tracing::warn;

    use super::{user_agent, OtlpConfig, OtlpProtocol};
    use crate::config::Resource;
    use crate::span::{AttributeValue, SpanKind, SpanRecord, Status};

    /// Exports already-assembled span records via OTLP. Owns the tokio
    /// runtime the async OTLP client needs, the SDK's batch processor (the
    /// cold-path batching the ring buffer's sidecar thread feeds), and the
    /// tracer used purely as a `SpanBuilder` sink — never for id
    /// generation.
    pub struct OtlpSpanExporter {
        runtime: tokio::runtime::Runtime,
        provider: SdkTracerProvider,
        tracer: opentelemetry_sdk::trace::Tracer,
    }

    impl OtlpSpanExporter {
        pub fn new(config: OtlpConfig, resource: &Resource) -> Result<Self> {
            let runtime = tokio::runtime::Runtime::new()
                .context("building tokio runtime for OTLP export")?;

            let (provider, tracer) = runtime.block_on(async {
                let mut metadata = MetadataMap::new();
                metadata.insert("user-agent", user_agent().parse()?);

                let exporter = match config.protocol {
                    OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
                        .with_tonic()
                        .with_endpoint(&config.endpoint)
                        .with_metadata(metadata)
                        .build()?,
                    OtlpProtocol::HttpProtobuf => opentelemetry_otlp::SpanExporter::builder()
                        .with_http()
                        .with_endpoint(&config.endpoint)
                        .build()?,
                };

                let span_processor = BatchSpanProcessor::builder(exporter).build();

                let mut attrs: Vec<KeyValue> = resource
                    .attributes
                    .iter()
                    .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
                    .collect();
                attrs.push(KeyValue::new(
                    "telemetry.auto.version",
                    resource.telemetry_auto_version,
                ));

                let sdk_resource = SdkResource::builder()
                    .with_service_name(resource.service_name.clone())
                    .with_attributes(attrs)
                    .build();

                // Every span handed to this exporter already passed through
                // `sampler::Sampler` (spec §4.G); the SDK's own sampler must
                // never drop or re-sample on top of that decision.
                let provider = SdkTracerProvider::builder()
                    .with_span_processor(span_processor)
                    .with_resource(sdk_resource)
                    .with_sampler(SdkSampler::AlwaysOn)
                    .build();
                let tracer = provider.tracer("otel-auto-agent");

                Ok::<_, anyhow::Error>((provider, tracer))
            })?;

            Ok(Self {
                runtime,
                provider,
                tracer,
            })
        }

        fn export_one(&self, record: &SpanRecord) {
            let parent_span_id = record
                .parent_span_id
                .map(SpanId::from_bytes)
                .unwrap_or(SpanId::INVALID);
            let parent_sc = OtelSpanContext::new(
                TraceId::from_bytes(record.context.trace_id),
                parent_span_id,
                TraceFlags::new(record.context.flags),
                false,
                TraceState::default(),
            );
            let parent_cx = OtelContext::new().with_remote_span_context(parent_sc);

            let mut builder = SpanBuilder::from_name(record.name.clone())
                .with_kind(map_kind(record.kind))
                .with_start_time(unix_nano_to_system_time(record.start_unix_nano))
                .with_end_time(unix_nano_to_system_time(record.end_unix_nano))
                .with_status(map_status(&record.status));
            builder.trace_id = Some(TraceId::from_bytes(record.context.trace_id));
            builder.span_id = Some(SpanId::from_bytes(record.context.span_id));
            builder.attributes = Some(
                record
                    .attributes
                    .iter()
                    .map(|(k, v)| KeyValue::new(k.clone(), map_attribute(v)))
                    .collect(),
            );

            let span = self.tracer.build_with_context(builder, &parent_cx);
            span.end();
        }

        pub fn shutdown(&self) {
            if let Err(err) = self.provider.shutdown() {
                warn!(error = %err, "OTLP tracer provider shutdown reported an error");
            }
        }
    }

    impl super::SpanBatchSink for OtlpSpanExporter {
        fn export_batch(&self, batch: &[SpanRecord]) {
            self.runtime.block_on(async {
                for record in batch {
                    self.export_one(record);
                }
            });
        }
    }

    impl Drop for OtlpSpanExporter {
        fn drop(&mut self) {
            self.shutdown();
        }
    }

    fn map_kind(kind: SpanKind) -> OtelSpanKind {
        match kind {
            SpanKind::Internal => OtelSpanKind::Internal,
            SpanKind::Server => OtelSpanKind::Server,
            SpanKind::Client => OtelSpanKind::Client,
            SpanKind::Producer => OtelSpanKind::Producer,
            SpanKind::Consumer => OtelSpanKind::Consumer,
        }
    }

    fn map_status(status: &Status) -> OtelStatus {
        match status {
            Status::Unset => OtelStatus::Unset,
            Status::Ok => OtelStatus::Ok,
            Status::Error { message } => OtelStatus::error(message.clone()),
        }
    }

    fn map_attribute(value: &AttributeValue) -> opentelemetry::Value {
        match value {
            AttributeValue::String(s) => opentelemetry::Value::String(s.clone().into()),
            AttributeValue::Int(i) => opentelemetry::Value::I64(*i),
            AttributeValue::Bool(b) => opentelemetry::Value::Bool(*b),
            AttributeValue::Double(d) => opentelemetry::Value::F64(*d),
        }
    }

    fn unix_nano_to_system_time(nanos: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(nanos)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn user_agent_has_the_spec_shape() {
            let ua = user_agent();
            assert!(ua.starts_with("otel-auto-agent/"));
            assert!(ua.contains("rustc/"));
            assert!(ua.contains('('));
            assert!(ua.ends_with(')'));
        }

        #[test]
        fn config_from_env_defaults_to_localhost_grpc() {
            std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
            std::env::remove_var("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT");
            std::env::remove_var("OTEL_EXPORTER_OTLP_PROTOCOL");
            let config = OtlpConfig::from_env();
            assert_eq!(config.endpoint, "http://localhost:4317");
            assert_eq!(config.protocol, OtlpProtocol::Grpc);
        }
    }
}

#[cfg(feature = "otlp")]
pub use enabled::OtlpSpanExporter;

/// Stub used when the crate is built without OTLP support. Constructing
/// it always fails; it exists so `main.rs` can compile the same wiring
/// code whether the feature is on or off (spec's ambient-stack stance:
/// the exporter is the one component genuinely allowed to be absent, not
/// any of the tracing/analysis core).
#[cfg(not(feature = "otlp"))]
pub struct OtlpSpanExporter;

#[cfg(not(feature = "otlp"))]
impl OtlpSpanExporter {
    pub fn new(_config: OtlpConfig, _resource: &crate::config::Resource) -> anyhow::Result<Self> {
        anyhow::bail!("OTLP support not compiled in; rebuild with the 'otlp' feature")
    }

    pub fn shutdown(&self) {}
}

#[cfg(not(feature = "otlp"))]
impl SpanBatchSink for OtlpSpanExporter {
    fn export_batch(&self, _batch: &[SpanRecord]) {}
}
