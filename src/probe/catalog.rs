//! The static probe catalog (spec §9 "Design notes"): a tagged variant plus
//! a shared trait, replacing the source's run-time polymorphism over probes.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::error::AgentError;
use crate::probe::descriptor::{
    Attachment, ConstSpec, EventLayout, FieldLayout, ProbeDescriptor, ProbeId, SpanKindTag,
};
use crate::probe::event::{
    BaseEventProperties, DecodedEvent, HttpPayload, KafkaConsumerPayload, KafkaProducerPayload,
    Payload, RpcPayload, SqlPayload,
};
use crate::probe::object::ProbeObject;
use crate::probe::wire::{decode_base, Cursor};
use crate::sampler::{SamplingDecision, Sampler};
use crate::span::{AttributeValue, InstrumentationScope, SpanContext, SpanRecord, Status};
use crate::target::FunctionIdentity;

/// Shared behavior every probe variant implements (spec §9).
pub trait Probe {
    fn id(&self) -> &ProbeId;
    fn descriptor(&self) -> &ProbeDescriptor;
    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError>;
    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord>;

    fn instrumented_package(&self) -> &str {
        &self.id().instrumented_package
    }

    fn wanted_functions(&self) -> Vec<FunctionIdentity> {
        self.descriptor()
            .wanted_functions()
            .cloned()
            .collect()
    }
}

fn base_span(
    name: String,
    kind: SpanKindTag,
    base: &BaseEventProperties,
    attributes: HashMap<String, AttributeValue>,
    scope: &InstrumentationScope,
) -> SpanRecord {
    SpanRecord {
        name,
        kind: kind.into(),
        start_unix_nano: base.start_unix_nano,
        end_unix_nano: base.end_unix_nano,
        context: base.current,
        parent_span_id: if base.parent.is_valid() {
            Some(base.parent.span_id)
        } else {
            None
        },
        attributes,
        status: Status::Unset,
        events: Vec::new(),
        links: Vec::new(),
        scope: scope.clone(),
    }
}

fn apply_sampling(mut record: SpanRecord, sampler: &Sampler) -> Option<SpanRecord> {
    let parent = if record.parent_span_id.is_some() {
        Some(SpanContext {
            trace_id: record.context.trace_id,
            span_id: record.parent_span_id.unwrap(),
            flags: record.context.flags,
            remote: false,
        })
    } else {
        None
    };
    match sampler.should_sample(&record.context.trace_id, parent.as_ref()) {
        SamplingDecision::Drop => None,
        SamplingDecision::RecordAndSample => {
            record.context = record.context.with_sampled(true);
            Some(record)
        }
    }
}

/// HTTP server probe: spec §8 scenario 1.
pub struct HttpServerProbe {
    pub descriptor: ProbeDescriptor,
}

impl Probe for HttpServerProbe {
    fn id(&self) -> &ProbeId {
        &self.descriptor.id
    }
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        if !self.descriptor.event_layout.matches(raw.len()) {
            return Err(AgentError::AttachFailed("malformed http server event".into()));
        }
        let mut cursor = Cursor::new(raw);
        let base = decode_base(&mut cursor)?;
        let method = cursor.fixed_str(8)?;
        let route_or_path = cursor.fixed_str(64)?;
        let status_code = cursor.u16()?;
        Ok(DecodedEvent {
            base,
            payload: Payload::HttpServer(HttpPayload {
                method,
                route_or_path,
                status_code,
            }),
        })
    }

    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord> {
        let Payload::HttpServer(http) = &event.payload else {
            return Vec::new();
        };
        let mut attributes = HashMap::new();
        attributes.insert("http.request.method".into(), AttributeValue::from(http.method.clone()));
        attributes.insert("url.path".into(), AttributeValue::from(http.route_or_path.clone()));
        attributes.insert(
            "http.response.status_code".into(),
            AttributeValue::from(http.status_code as i64),
        );
        let name = if http.route_or_path.is_empty() {
            http.method.clone()
        } else {
            http.route_or_path.clone()
        };
        let mut record = base_span(name, SpanKindTag::Server, &event.base, attributes, scope);
        record.status = if (200..400).contains(&http.status_code) {
            Status::Ok
        } else {
            Status::Error {
                message: format!("status {}", http.status_code),
            }
        };
        vec![apply_sampling(record, &self.descriptor.default_sampler)].into_iter().flatten().collect()
    }
}

/// HTTP client probe: spec §8 scenario 2 (inbound header already folded
/// into `event.base.parent` by the propagation table).
pub struct HttpClientProbe {
    pub descriptor: ProbeDescriptor,
}

impl Probe for HttpClientProbe {
    fn id(&self) -> &ProbeId {
        &self.descriptor.id
    }
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        if !self.descriptor.event_layout.matches(raw.len()) {
            return Err(AgentError::AttachFailed("malformed http client event".into()));
        }
        let mut cursor = Cursor::new(raw);
        let base = decode_base(&mut cursor)?;
        let method = cursor.fixed_str(8)?;
        let route_or_path = cursor.fixed_str(128)?;
        let status_code = cursor.u16()?;
        Ok(DecodedEvent {
            base,
            payload: Payload::HttpClient(HttpPayload {
                method,
                route_or_path,
                status_code,
            }),
        })
    }

    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord> {
        let Payload::HttpClient(http) = &event.payload else {
            return Vec::new();
        };
        let mut attributes = HashMap::new();
        attributes.insert("http.request.method".into(), AttributeValue::from(http.method.clone()));
        attributes.insert("url.full".into(), AttributeValue::from(http.route_or_path.clone()));
        if http.status_code != 0 {
            attributes.insert(
                "http.response.status_code".into(),
                AttributeValue::from(http.status_code as i64),
            );
        }
        let record = base_span(http.method.clone(), SpanKindTag::Client, &event.base, attributes, scope);
        vec![apply_sampling(record, &self.descriptor.default_sampler)].into_iter().flatten().collect()
    }
}

/// RPC server/client probe (gRPC-style systems).
pub struct RpcProbe {
    pub descriptor: ProbeDescriptor,
    pub kind: SpanKindTag,
}

impl Probe for RpcProbe {
    fn id(&self) -> &ProbeId {
        &self.descriptor.id
    }
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        if !self.descriptor.event_layout.matches(raw.len()) {
            return Err(AgentError::AttachFailed("malformed rpc event".into()));
        }
        let mut cursor = Cursor::new(raw);
        let base = decode_base(&mut cursor)?;
        let system = cursor.fixed_str(16)?;
        let service = cursor.fixed_str(32)?;
        let method = cursor.fixed_str(32)?;
        let peer = cursor.fixed_str(64)?;
        Ok(DecodedEvent {
            base,
            payload: Payload::Rpc(RpcPayload {
                system,
                service,
                method,
                peer,
            }),
        })
    }

    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord> {
        let Payload::Rpc(rpc) = &event.payload else {
            return Vec::new();
        };
        let mut attributes = HashMap::new();
        attributes.insert("rpc.system".into(), AttributeValue::from(rpc.system.clone()));
        attributes.insert("rpc.service".into(), AttributeValue::from(rpc.service.clone()));
        attributes.insert("rpc.method".into(), AttributeValue::from(rpc.method.clone()));
        attributes.insert("network.peer.address".into(), AttributeValue::from(rpc.peer.clone()));
        let name = format!("{}/{}", rpc.service, rpc.method);
        let record = base_span(name, self.kind, &event.base, attributes, scope);
        vec![apply_sampling(record, &self.descriptor.default_sampler)].into_iter().flatten().collect()
    }
}

/// SQL probe: spec §8 scenario 3. Statement parsing is gated by
/// `OTEL_GO_AUTO_PARSE_DB_STATEMENT`; raw capture by
/// `OTEL_GO_AUTO_INCLUDE_DB_STATEMENT`.
pub struct SqlProbe {
    pub descriptor: ProbeDescriptor,
    pub include_statement: bool,
    pub parse_statement: bool,
}

impl SqlProbe {
    /// Splits `"SELECT * FROM foo"` into `(operation, table)`. Best-effort:
    /// looks for the first `FROM`/`INTO`/`UPDATE` keyword. Returns `None`
    /// when no recognizable table reference is found.
    fn parse(statement: &str) -> Option<(String, String)> {
        let upper = statement.to_uppercase();
        let operation = upper.split_whitespace().next()?.to_string();
        let table = ["FROM", "INTO", "UPDATE"].iter().find_map(|kw| {
            let idx = upper.find(kw)?;
            statement[idx + kw.len()..].split_whitespace().next()
        })?;
        Some((operation, table.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_string()))
    }
}

impl Probe for SqlProbe {
    fn id(&self) -> &ProbeId {
        &self.descriptor.id
    }
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        if !self.descriptor.event_layout.matches(raw.len()) {
            return Err(AgentError::AttachFailed("malformed sql event".into()));
        }
        let mut cursor = Cursor::new(raw);
        let base = decode_base(&mut cursor)?;
        let statement = cursor.fixed_str(256)?;
        Ok(DecodedEvent {
            base,
            payload: Payload::Sql(SqlPayload { statement }),
        })
    }

    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord> {
        let Payload::Sql(sql) = &event.payload else {
            return Vec::new();
        };
        let mut attributes = HashMap::new();
        if self.include_statement {
            attributes.insert("db.query.text".into(), AttributeValue::from(sql.statement.clone()));
        }
        let parsed = self.parse_statement.then(|| Self::parse(&sql.statement)).flatten();
        let name = match &parsed {
            Some((operation, table)) => {
                attributes.insert("db.operation.name".into(), AttributeValue::from(operation.clone()));
                attributes.insert("db.collection.name".into(), AttributeValue::from(table.clone()));
                format!("{operation} {table}")
            }
            None => "DB".to_string(),
        };
        let record = base_span(name, SpanKindTag::Client, &event.base, attributes, scope);
        vec![apply_sampling(record, &self.descriptor.default_sampler)].into_iter().flatten().collect()
    }
}

/// Kafka producer probe: spec §8 scenario 4. One event may encode a batch of
/// N messages; `to_spans` produces N span records sharing start/end.
pub struct KafkaProducerProbe {
    pub descriptor: ProbeDescriptor,
}

impl Probe for KafkaProducerProbe {
    fn id(&self) -> &ProbeId {
        &self.descriptor.id
    }
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        if !self.descriptor.event_layout.matches(raw.len()) {
            return Err(AgentError::AttachFailed("malformed kafka producer event".into()));
        }
        let mut cursor = Cursor::new(raw);
        let base = decode_base(&mut cursor)?;
        let topic = cursor.fixed_str(64)?;
        let keys_csv = cursor.fixed_str(128)?;
        let keys = keys_csv.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
        Ok(DecodedEvent {
            base,
            payload: Payload::KafkaProducer(KafkaProducerPayload { topic, keys }),
        })
    }

    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord> {
        let Payload::KafkaProducer(kafka) = &event.payload else {
            return Vec::new();
        };
        let batch_count = kafka.keys.len().max(1);
        kafka
            .keys
            .iter()
            .filter_map(|key| {
                let mut attributes = HashMap::new();
                attributes.insert("messaging.destination.name".into(), AttributeValue::from(kafka.topic.clone()));
                attributes.insert("messaging.operation.type".into(), AttributeValue::from("publish"));
                attributes.insert("messaging.kafka.message.key".into(), AttributeValue::from(key.clone()));
                attributes.insert("messaging.batch.message.count".into(), AttributeValue::from(batch_count as i64));
                let record = base_span(
                    kafka.topic.clone(),
                    SpanKindTag::Producer,
                    &event.base,
                    attributes,
                    scope,
                );
                apply_sampling(record, &self.descriptor.default_sampler)
            })
            .collect()
    }
}

/// Kafka consumer probe: spec §8 scenario 5.
pub struct KafkaConsumerProbe {
    pub descriptor: ProbeDescriptor,
}

impl Probe for KafkaConsumerProbe {
    fn id(&self) -> &ProbeId {
        &self.descriptor.id
    }
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        if !self.descriptor.event_layout.matches(raw.len()) {
            return Err(AgentError::AttachFailed("malformed kafka consumer event".into()));
        }
        let mut cursor = Cursor::new(raw);
        let base = decode_base(&mut cursor)?;
        let topic = cursor.fixed_str(64)?;
        let partition = cursor.i32()?;
        let offset = cursor.i64()?;
        let consumer_group = cursor.fixed_str(64)?;
        Ok(DecodedEvent {
            base,
            payload: Payload::KafkaConsumer(KafkaConsumerPayload {
                topic,
                partition,
                offset,
                consumer_group,
            }),
        })
    }

    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord> {
        let Payload::KafkaConsumer(kafka) = &event.payload else {
            return Vec::new();
        };
        let mut attributes = HashMap::new();
        attributes.insert("messaging.destination.name".into(), AttributeValue::from(kafka.topic.clone()));
        attributes.insert("messaging.operation.type".into(), AttributeValue::from("receive"));
        attributes.insert("messaging.destination.partition.id".into(), AttributeValue::from(kafka.partition as i64));
        attributes.insert("messaging.kafka.message.offset".into(), AttributeValue::from(kafka.offset));
        attributes.insert("messaging.consumer.group.name".into(), AttributeValue::from(kafka.consumer_group.clone()));
        let name = format!("{} receive", kafka.topic);
        let record = base_span(name, SpanKindTag::Consumer, &event.base, attributes, scope);
        vec![apply_sampling(record, &self.descriptor.default_sampler)].into_iter().flatten().collect()
    }
}

/// Embedded SDK sampler override: overwrites the target's should-sample
/// return register (spec §4.I). Never produces spans; the return-register
/// write happens entirely in kernel context.
pub struct EmbeddedSdkSamplerProbe {
    pub descriptor: ProbeDescriptor,
}

impl Probe for EmbeddedSdkSamplerProbe {
    fn id(&self) -> &ProbeId {
        &self.descriptor.id
    }
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        let mut cursor = Cursor::new(raw);
        let base = decode_base(&mut cursor)?;
        let sampled = cursor.u8()? != 0;
        Ok(DecodedEvent {
            base,
            payload: Payload::EmbeddedSdkSampler { sampled },
        })
    }

    fn to_spans(&self, _event: &DecodedEvent, _scope: &InstrumentationScope) -> Vec<SpanRecord> {
        Vec::new()
    }
}

/// Embedded SDK span capture: receives a fully-formed serialized span
/// record from the target's own tracing API (spec §4.I).
pub struct EmbeddedSdkSpanProbe {
    pub descriptor: ProbeDescriptor,
}

impl Probe for EmbeddedSdkSpanProbe {
    fn id(&self) -> &ProbeId {
        &self.descriptor.id
    }
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        let mut cursor = Cursor::new(raw);
        let base = decode_base(&mut cursor)?;
        Ok(DecodedEvent {
            base,
            payload: Payload::EmbeddedSdkSpan(cursor.remaining().to_vec()),
        })
    }

    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord> {
        let Payload::EmbeddedSdkSpan(bytes) = &event.payload else {
            return Vec::new();
        };
        match serde_json::from_slice::<crate::probe::embedded::SerializedSpan>(bytes) {
            Ok(span) => vec![span.into_record(scope.clone())],
            Err(_) => Vec::new(),
        }
    }
}

/// `enum ProbeKind` — every concrete probe the catalog may contain
/// (spec §9). The Manager keeps an ordered `Vec<ProbeKind>`.
pub enum ProbeKind {
    HttpServer(HttpServerProbe),
    HttpClient(HttpClientProbe),
    RpcServer(RpcProbe),
    RpcClient(RpcProbe),
    Sql(SqlProbe),
    KafkaProducer(KafkaProducerProbe),
    KafkaConsumer(KafkaConsumerProbe),
    EmbeddedSdkSampler(EmbeddedSdkSamplerProbe),
    EmbeddedSdkSpan(EmbeddedSdkSpanProbe),
}

impl ProbeKind {
    /// Stable catalog key used by `--instrumentation` filtering (spec
    /// SPEC_FULL §2 "Filter expressions") and by per-probe statistics.
    /// Distinct from `id().instrumented_package`, which names the library
    /// being instrumented rather than the probe itself.
    pub fn catalog_name(&self) -> &'static str {
        match self {
            ProbeKind::HttpServer(_) => "http_server",
            ProbeKind::HttpClient(_) => "http_client",
            ProbeKind::RpcServer(_) => "rpc_server",
            ProbeKind::RpcClient(_) => "rpc_client",
            ProbeKind::Sql(_) => "sql",
            ProbeKind::KafkaProducer(_) => "kafka_producer",
            ProbeKind::KafkaConsumer(_) => "kafka_consumer",
            ProbeKind::EmbeddedSdkSampler(_) => "embedded_sdk_sampler",
            ProbeKind::EmbeddedSdkSpan(_) => "embedded_sdk_span",
        }
    }

    /// Whether this probe exposes an `events` perf ring the demultiplexer
    /// can poll. `EmbeddedSdkSamplerProbe` only overwrites the target's
    /// return register from the shared "sampling" table (spec §4.I) and
    /// emits no records at all, so it has no ring to open.
    pub fn emits_events(&self) -> bool {
        !matches!(self, ProbeKind::EmbeddedSdkSampler(_))
    }
}

impl Probe for ProbeKind {
    fn id(&self) -> &ProbeId {
        match self {
            ProbeKind::HttpServer(p) => p.id(),
            ProbeKind::HttpClient(p) => p.id(),
            ProbeKind::RpcServer(p) => p.id(),
            ProbeKind::RpcClient(p) => p.id(),
            ProbeKind::Sql(p) => p.id(),
            ProbeKind::KafkaProducer(p) => p.id(),
            ProbeKind::KafkaConsumer(p) => p.id(),
            ProbeKind::EmbeddedSdkSampler(p) => p.id(),
            ProbeKind::EmbeddedSdkSpan(p) => p.id(),
        }
    }

    fn descriptor(&self) -> &ProbeDescriptor {
        match self {
            ProbeKind::HttpServer(p) => p.descriptor(),
            ProbeKind::HttpClient(p) => p.descriptor(),
            ProbeKind::RpcServer(p) => p.descriptor(),
            ProbeKind::RpcClient(p) => p.descriptor(),
            ProbeKind::Sql(p) => p.descriptor(),
            ProbeKind::KafkaProducer(p) => p.descriptor(),
            ProbeKind::KafkaConsumer(p) => p.descriptor(),
            ProbeKind::EmbeddedSdkSampler(p) => p.descriptor(),
            ProbeKind::EmbeddedSdkSpan(p) => p.descriptor(),
        }
    }

    fn decode_event(&self, raw: &[u8]) -> Result<DecodedEvent, AgentError> {
        match self {
            ProbeKind::HttpServer(p) => p.decode_event(raw),
            ProbeKind::HttpClient(p) => p.decode_event(raw),
            ProbeKind::RpcServer(p) => p.decode_event(raw),
            ProbeKind::RpcClient(p) => p.decode_event(raw),
            ProbeKind::Sql(p) => p.decode_event(raw),
            ProbeKind::KafkaProducer(p) => p.decode_event(raw),
            ProbeKind::KafkaConsumer(p) => p.decode_event(raw),
            ProbeKind::EmbeddedSdkSampler(p) => p.decode_event(raw),
            ProbeKind::EmbeddedSdkSpan(p) => p.decode_event(raw),
        }
    }

    fn to_spans(&self, event: &DecodedEvent, scope: &InstrumentationScope) -> Vec<SpanRecord> {
        match self {
            ProbeKind::HttpServer(p) => p.to_spans(event, scope),
            ProbeKind::HttpClient(p) => p.to_spans(event, scope),
            ProbeKind::RpcServer(p) => p.to_spans(event, scope),
            ProbeKind::RpcClient(p) => p.to_spans(event, scope),
            ProbeKind::Sql(p) => p.to_spans(event, scope),
            ProbeKind::KafkaProducer(p) => p.to_spans(event, scope),
            ProbeKind::KafkaConsumer(p) => p.to_spans(event, scope),
            ProbeKind::EmbeddedSdkSampler(p) => p.to_spans(event, scope),
            ProbeKind::EmbeddedSdkSpan(p) => p.to_spans(event, scope),
        }
    }
}

pub fn standard_event_layout(payload_len: usize) -> EventLayout {
    const BASE_LEN: usize = 8 + 8 + 16 + 8 + 1 + 8 + 1;
    EventLayout {
        total_len: BASE_LEN + payload_len,
        fields: vec![
            FieldLayout { name: "start_unix_nano", offset: 0, width: 8 },
            FieldLayout { name: "end_unix_nano", offset: 8, width: 8 },
            FieldLayout { name: "current.trace_id", offset: 16, width: 16 },
            FieldLayout { name: "current.span_id", offset: 32, width: 8 },
            FieldLayout { name: "current.flags", offset: 40, width: 1 },
            FieldLayout { name: "parent.span_id", offset: 41, width: 8 },
            FieldLayout { name: "parent.flags", offset: 49, width: 1 },
        ],
    }
}

/// One entry in the static probe catalog the Manager owns: the probe logic
/// plus the opaque compiled object it attaches (spec §3 "Probe
/// descriptor": "object", §9).
pub struct CatalogEntry {
    pub probe: ProbeKind,
    pub object: ProbeObject,
}

/// Reads a probe's compiled object from `probes_dir/<file_stem>.o`. Each
/// probe ships as a pre-compiled ELF object (spec §3: "the core treats each
/// compiled probe as an opaque object"); the source for these lives in the
/// (out-of-scope) in-kernel probe crate and is built separately. Missing
/// files are not fatal to the whole agent: the catalog entry is simply
/// left out, the same way a probe whose target functions are absent gets
/// filtered (spec §7 `LoadFailed` -> "probe filtered out; remaining
/// probes proceed").
fn load_object(
    probes_dir: &Path,
    file_stem: &str,
    program_names: &[&str],
    table_names: &[&str],
) -> Option<ProbeObject> {
    let path = probes_dir.join(format!("{file_stem}.o"));
    match std::fs::read(&path) {
        Ok(bytes) => Some(ProbeObject::from_bytes(
            bytes,
            program_names.iter().map(|s| s.to_string()).collect(),
            table_names.iter().map(|s| s.to_string()).collect(),
        )),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "probe object not found, probe unavailable");
            None
        }
    }
}

fn struct_field_offset(struct_name: &str, field: &str) -> ConstSpec {
    ConstSpec::StructFieldOffset {
        struct_name: struct_name.to_string(),
        field: field.to_string(),
    }
}

/// Builds the static probe catalog (spec §9): one entry per probe kind,
/// with its compile-time descriptor (consts/attachments/event layout) and
/// its opaque compiled object loaded from `probes_dir`. The Manager
/// filters this list further by `InstrumentationFilter` and by which
/// wanted functions the target's symbol table actually has (spec §4.B
/// step 5, §4.H `load`).
pub fn standard_catalog(
    probes_dir: &Path,
    include_db_statement: bool,
    parse_db_statement: bool,
    default_sampler: Sampler,
) -> Vec<CatalogEntry> {
    let mut catalog = Vec::new();

    if let Some(object) = load_object(
        probes_dir,
        "http_server",
        &["http_server_entry", "http_server_return"],
        &["events"],
    ) {
        catalog.push(CatalogEntry {
            probe: ProbeKind::HttpServer(HttpServerProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "net/http".into(),
                        span_kind: SpanKindTag::Server,
                    },
                    consts: vec![
                        ConstSpec::Abi,
                        ConstSpec::Allocation,
                        struct_field_offset("Request", "Header"),
                        struct_field_offset("Request", "Method"),
                        struct_field_offset("Request", "URL"),
                    ],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new("net/http", None, "HandlerFunc.ServeHTTP"),
                        entry_program: "http_server_entry".into(),
                        return_program: Some("http_server_return".into()),
                    }],
                    event_layout: standard_event_layout(8 + 64 + 2),
                    default_sampler: default_sampler.clone(),
                },
            }),
            object,
        });
    }

    if let Some(object) = load_object(
        probes_dir,
        "http_client",
        &["http_client_entry", "http_client_return"],
        &["events"],
    ) {
        catalog.push(CatalogEntry {
            probe: ProbeKind::HttpClient(HttpClientProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "net/http".into(),
                        span_kind: SpanKindTag::Client,
                    },
                    consts: vec![
                        ConstSpec::Abi,
                        ConstSpec::Allocation,
                        struct_field_offset("Request", "Header"),
                        struct_field_offset("Request", "URL"),
                    ],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new("net/http", Some("Transport".into()), "roundTrip"),
                        entry_program: "http_client_entry".into(),
                        return_program: Some("http_client_return".into()),
                    }],
                    event_layout: standard_event_layout(8 + 128 + 2),
                    default_sampler: default_sampler.clone(),
                },
            }),
            object,
        });
    }

    if let Some(object) = load_object(
        probes_dir,
        "rpc_server",
        &["rpc_server_entry", "rpc_server_return"],
        &["events"],
    ) {
        catalog.push(CatalogEntry {
            probe: ProbeKind::RpcServer(RpcProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "google.golang.org/grpc".into(),
                        span_kind: SpanKindTag::Server,
                    },
                    consts: vec![
                        ConstSpec::Abi,
                        ConstSpec::Allocation,
                        struct_field_offset("Stream", "Method"),
                    ],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new(
                            "google.golang.org/grpc",
                            Some("Server".into()),
                            "processUnaryRPC",
                        ),
                        entry_program: "rpc_server_entry".into(),
                        return_program: Some("rpc_server_return".into()),
                    }],
                    event_layout: standard_event_layout(16 + 32 + 32 + 64),
                    default_sampler: default_sampler.clone(),
                },
                kind: SpanKindTag::Server,
            }),
            object,
        });
    }

    if let Some(object) = load_object(
        probes_dir,
        "rpc_client",
        &["rpc_client_entry", "rpc_client_return"],
        &["events"],
    ) {
        catalog.push(CatalogEntry {
            probe: ProbeKind::RpcClient(RpcProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "google.golang.org/grpc".into(),
                        span_kind: SpanKindTag::Client,
                    },
                    consts: vec![
                        ConstSpec::Abi,
                        ConstSpec::Allocation,
                        struct_field_offset("ClientConn", "Target"),
                    ],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new(
                            "google.golang.org/grpc",
                            Some("ClientConn".into()),
                            "Invoke",
                        ),
                        entry_program: "rpc_client_entry".into(),
                        return_program: Some("rpc_client_return".into()),
                    }],
                    event_layout: standard_event_layout(16 + 32 + 32 + 64),
                    default_sampler: default_sampler.clone(),
                },
                kind: SpanKindTag::Client,
            }),
            object,
        });
    }

    if let Some(object) = load_object(probes_dir, "sql", &["sql_entry", "sql_return"], &["events"]) {
        catalog.push(CatalogEntry {
            probe: ProbeKind::Sql(SqlProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "database/sql".into(),
                        span_kind: SpanKindTag::Client,
                    },
                    consts: vec![
                        ConstSpec::Abi,
                        ConstSpec::Allocation,
                        ConstSpec::FeatureFlag {
                            env_var: "OTEL_GO_AUTO_INCLUDE_DB_STATEMENT".into(),
                            default: false,
                        },
                    ],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new("database/sql", Some("DB".into()), "queryDC"),
                        entry_program: "sql_entry".into(),
                        return_program: Some("sql_return".into()),
                    }],
                    event_layout: standard_event_layout(256),
                    default_sampler: default_sampler.clone(),
                },
                include_statement: include_db_statement,
                parse_statement: parse_db_statement,
            }),
            object,
        });
    }

    if let Some(object) = load_object(
        probes_dir,
        "kafka_producer",
        &["kafka_producer_entry", "kafka_producer_return"],
        &["events"],
    ) {
        catalog.push(CatalogEntry {
            probe: ProbeKind::KafkaProducer(KafkaProducerProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "github.com/segmentio/kafka-go".into(),
                        span_kind: SpanKindTag::Producer,
                    },
                    consts: vec![
                        ConstSpec::Abi,
                        ConstSpec::Allocation,
                        struct_field_offset("Writer", "Topic"),
                    ],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new(
                            "github.com/segmentio/kafka-go",
                            Some("Writer".into()),
                            "WriteMessages",
                        ),
                        entry_program: "kafka_producer_entry".into(),
                        return_program: Some("kafka_producer_return".into()),
                    }],
                    event_layout: standard_event_layout(64 + 128),
                    default_sampler: default_sampler.clone(),
                },
            }),
            object,
        });
    }

    if let Some(object) = load_object(
        probes_dir,
        "kafka_consumer",
        &["kafka_consumer_entry", "kafka_consumer_return"],
        &["events"],
    ) {
        catalog.push(CatalogEntry {
            probe: ProbeKind::KafkaConsumer(KafkaConsumerProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "github.com/segmentio/kafka-go".into(),
                        span_kind: SpanKindTag::Consumer,
                    },
                    consts: vec![
                        ConstSpec::Abi,
                        ConstSpec::Allocation,
                        struct_field_offset("Reader", "Topic"),
                    ],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new(
                            "github.com/segmentio/kafka-go",
                            Some("Reader".into()),
                            "FetchMessage",
                        ),
                        entry_program: "kafka_consumer_entry".into(),
                        return_program: Some("kafka_consumer_return".into()),
                    }],
                    event_layout: standard_event_layout(64 + 4 + 8 + 64),
                    default_sampler: default_sampler.clone(),
                },
            }),
            object,
        });
    }

    catalog
}

/// Built only when `--global-impl`/`OTEL_GO_AUTO_GLOBAL` is set (spec §4.I,
/// §6): the two embedded-SDK probes attach to exact function names the
/// target's own tracing API exposes, not to a library the analyzer detects
/// by version, so they have no struct-field-offset consts.
pub fn embedded_sdk_catalog(probes_dir: &Path, default_sampler: Sampler) -> Vec<CatalogEntry> {
    let mut catalog = Vec::new();

    if let Some(object) = load_object(
        probes_dir,
        "embedded_sdk_sampler",
        &["embedded_sdk_sampler_entry"],
        &["sampling"],
    ) {
        catalog.push(CatalogEntry {
            probe: ProbeKind::EmbeddedSdkSampler(EmbeddedSdkSamplerProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "go.opentelemetry.io/otel/sdk/trace".into(),
                        span_kind: SpanKindTag::Internal,
                    },
                    consts: vec![ConstSpec::Allocation],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new(
                            "go.opentelemetry.io/otel/sdk/trace",
                            Some("tracer".into()),
                            "shouldSample",
                        ),
                        entry_program: "embedded_sdk_sampler_entry".into(),
                        return_program: None,
                    }],
                    event_layout: standard_event_layout(1),
                    default_sampler: default_sampler.clone(),
                },
            }),
            object,
        });
    }

    if let Some(object) = load_object(
        probes_dir,
        "embedded_sdk_span",
        &["embedded_sdk_span_entry"],
        &["events"],
    ) {
        let mut layout = standard_event_layout(0);
        layout.variable_length = true;
        catalog.push(CatalogEntry {
            probe: ProbeKind::EmbeddedSdkSpan(EmbeddedSdkSpanProbe {
                descriptor: ProbeDescriptor {
                    id: ProbeId {
                        instrumented_package: "go.opentelemetry.io/otel/sdk/trace".into(),
                        span_kind: SpanKindTag::Internal,
                    },
                    consts: vec![ConstSpec::Allocation],
                    attachments: vec![Attachment {
                        function: FunctionIdentity::new(
                            "go.opentelemetry.io/otel/sdk/trace",
                            Some("recordingSpan".into()),
                            "End",
                        ),
                        entry_program: "embedded_sdk_span_entry".into(),
                        return_program: None,
                    }],
                    event_layout: layout,
                    default_sampler,
                },
            }),
            object,
        });
    }

    catalog
}
