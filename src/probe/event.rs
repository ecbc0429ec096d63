//! Raw probe event shape: the base properties every event carries plus a
//! probe-specific payload (spec §3 "Base span properties").

use crate::span::SpanContext;

/// Prefix common to every event a probe emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseEventProperties {
    pub start_unix_nano: u64,
    pub end_unix_nano: u64,
    pub current: SpanContext,
    pub parent: SpanContext,
}

/// One decoded raw event: base properties plus the probe-specific payload
/// (spec §4.E step 3: "hands to the probe's `process` function").
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub base: BaseEventProperties,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    HttpServer(HttpPayload),
    HttpClient(HttpPayload),
    Rpc(RpcPayload),
    Sql(SqlPayload),
    KafkaProducer(KafkaProducerPayload),
    KafkaConsumer(KafkaConsumerPayload),
    /// Sampling-decision override; carries no span data of its own.
    EmbeddedSdkSampler { sampled: bool },
    /// A fully-formed span record serialized by the target's own SDK,
    /// forwarded verbatim (spec §4.I).
    EmbeddedSdkSpan(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct HttpPayload {
    pub method: String,
    pub route_or_path: String,
    pub status_code: u16,
}

#[derive(Debug, Clone)]
pub struct RpcPayload {
    pub system: String,
    pub service: String,
    pub method: String,
    pub peer: String,
}

#[derive(Debug, Clone)]
pub struct SqlPayload {
    pub statement: String,
}

#[derive(Debug, Clone)]
pub struct KafkaProducerPayload {
    pub topic: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct KafkaConsumerPayload {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub consumer_group: String,
}
