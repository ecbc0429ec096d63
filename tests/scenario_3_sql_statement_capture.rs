//! Spec §8 scenario 3: SQL query span naming and statement capture, gated
//! by the `include_statement`/`parse_statement` feature flags (spec §6
//! `OTEL_GO_AUTO_INCLUDE_DB_STATEMENT`/`OTEL_GO_AUTO_PARSE_DB_STATEMENT`).

#[path = "support/mod.rs"]
mod support;

use otel_auto_agent::probe::catalog::{standard_event_layout, Probe, SqlProbe};
use otel_auto_agent::probe::descriptor::{
    Attachment, ConstSpec, ProbeDescriptor, ProbeId, SpanKindTag,
};
use otel_auto_agent::span::{AttributeValue, InstrumentationScope};
use otel_auto_agent::target::FunctionIdentity;

fn descriptor() -> ProbeDescriptor {
    ProbeDescriptor {
        id: ProbeId {
            instrumented_package: "database/sql".into(),
            span_kind: SpanKindTag::Client,
        },
        consts: vec![ConstSpec::Abi, ConstSpec::Allocation],
        attachments: vec![Attachment {
            function: FunctionIdentity::new("database/sql", Some("DB".into()), "queryDC"),
            entry_program: "sql_entry".into(),
            return_program: Some("sql_return".into()),
        }],
        event_layout: standard_event_layout(256),
        default_sampler: support::always_on(),
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: "otel-auto-agent/sql".into(),
        version: "0.1.0".into(),
        schema_url: String::new(),
    }
}

fn raw_event(statement: &str) -> Vec<u8> {
    let mut raw = Vec::new();
    support::encode_base(&mut raw, 1, 2, support::ctx(5, true), None);
    support::fixed(&mut raw, statement, 256);
    raw
}

#[test]
fn parses_operation_and_table_when_parsing_enabled() {
    let probe = SqlProbe {
        descriptor: descriptor(),
        include_statement: false,
        parse_statement: true,
    };
    let event = probe.decode_event(&raw_event("SELECT * FROM users WHERE id = 1")).unwrap();
    let spans = probe.to_spans(&event, &scope());

    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "SELECT users");
    assert!(matches!(
        spans[0].attributes.get("db.operation.name"),
        Some(AttributeValue::String(op)) if op == "SELECT"
    ));
    assert!(matches!(
        spans[0].attributes.get("db.collection.name"),
        Some(AttributeValue::String(table)) if table == "users"
    ));
    assert!(!spans[0].attributes.contains_key("db.query.text"));
}

#[test]
fn falls_back_to_a_generic_name_when_parsing_disabled() {
    let probe = SqlProbe {
        descriptor: descriptor(),
        include_statement: true,
        parse_statement: false,
    };
    let event = probe.decode_event(&raw_event("SELECT * FROM users WHERE id = 1")).unwrap();
    let spans = probe.to_spans(&event, &scope());

    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "DB");
    assert!(!spans[0].attributes.contains_key("db.operation.name"));
    assert!(matches!(
        spans[0].attributes.get("db.query.text"),
        Some(AttributeValue::String(s)) if s == "SELECT * FROM users WHERE id = 1"
    ));
}
