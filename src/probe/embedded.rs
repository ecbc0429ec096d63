//! Embedded Trace SDK support (spec §4.I).
//!
//! The target may have linked in a minimal tracing API of its own. The
//! probe loader attaches to two exact functions: a should-sample override
//! and a span-ended capture. This module defines the wire shape of the
//! buffer the second function hands to its probe, and how it decodes into
//! a fully-formed `SpanRecord` with no further enrichment needed.

use std::collections::HashMap;

use serde::Deserialize;

use crate::span::{AttributeValue, InstrumentationScope, SpanContext, SpanRecord, Status};

#[derive(Debug, Deserialize)]
pub struct SerializedSpan {
    pub name: String,
    pub kind: String,
    pub start_unix_nano: u64,
    pub end_unix_nano: u64,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub flags: u8,
    #[serde(default)]
    pub attributes: HashMap<String, SerializedAttribute>,
    #[serde(default)]
    pub status: SerializedStatus,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SerializedAttribute {
    String(String),
    Int(i64),
    Bool(bool),
    Double(f64),
}

impl From<SerializedAttribute> for AttributeValue {
    fn from(value: SerializedAttribute) -> Self {
        match value {
            SerializedAttribute::String(s) => AttributeValue::String(s),
            SerializedAttribute::Int(i) => AttributeValue::Int(i),
            SerializedAttribute::Bool(b) => AttributeValue::Bool(b),
            SerializedAttribute::Double(d) => AttributeValue::Double(d),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerializedStatus {
    #[default]
    Unset,
    Ok,
    Error {
        message: String,
    },
}

fn hex_to_16(s: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, chunk) in s.as_bytes().chunks(2).take(16).enumerate() {
        if let Ok(hex_str) = std::str::from_utf8(chunk) {
            out[i] = u8::from_str_radix(hex_str, 16).unwrap_or(0);
        }
    }
    out
}

fn hex_to_8(s: &str) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, chunk) in s.as_bytes().chunks(2).take(8).enumerate() {
        if let Ok(hex_str) = std::str::from_utf8(chunk) {
            out[i] = u8::from_str_radix(hex_str, 16).unwrap_or(0);
        }
    }
    out
}

impl SerializedSpan {
    pub fn into_record(self, scope: InstrumentationScope) -> SpanRecord {
        let trace_id = hex_to_16(&self.trace_id);
        let kind = match self.kind.as_str() {
            "server" => crate::span::SpanKind::Server,
            "client" => crate::span::SpanKind::Client,
            "producer" => crate::span::SpanKind::Producer,
            "consumer" => crate::span::SpanKind::Consumer,
            _ => crate::span::SpanKind::Internal,
        };
        let status = match self.status {
            SerializedStatus::Unset => Status::Unset,
            SerializedStatus::Ok => Status::Ok,
            SerializedStatus::Error { message } => Status::Error { message },
        };
        SpanRecord {
            name: self.name,
            kind,
            start_unix_nano: self.start_unix_nano,
            end_unix_nano: self.end_unix_nano,
            context: SpanContext {
                trace_id,
                span_id: hex_to_8(&self.span_id),
                flags: self.flags,
                remote: false,
            },
            parent_span_id: self.parent_span_id.map(|p| hex_to_8(&p)),
            attributes: self.attributes.into_iter().map(|(k, v)| (k, v.into())).collect(),
            status,
            events: Vec::new(),
            links: Vec::new(),
            scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_serialized_span() {
        let json = br#"{
            "name": "custom-op",
            "kind": "internal",
            "start_unix_nano": 10,
            "end_unix_nano": 20,
            "trace_id": "0af7651916cd43dd8448eb211c80319c",
            "span_id": "b7ad6b7169203331",
            "parent_span_id": null,
            "flags": 1
        }"#;
        let span: SerializedSpan = serde_json::from_slice(json).unwrap();
        let scope = InstrumentationScope {
            name: "otel-auto-agent".into(),
            version: "0.1.0".into(),
            schema_url: String::new(),
        };
        let record = span.into_record(scope);
        assert_eq!(record.name, "custom-op");
        assert!(record.context.is_valid());
        assert_eq!(record.parent_span_id, None);
    }
}
