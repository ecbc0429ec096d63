//! Spec §8 scenario 1: a single HTTP server request produces one server
//! span carrying method, route, and status code.

#[path = "support/mod.rs"]
mod support;

use otel_auto_agent::probe::catalog::{standard_event_layout, HttpServerProbe, Probe};
use otel_auto_agent::probe::descriptor::{
    Attachment, ConstSpec, ProbeDescriptor, ProbeId, SpanKindTag,
};
use otel_auto_agent::span::{SpanKind, Status};
use otel_auto_agent::span::InstrumentationScope;
use otel_auto_agent::target::FunctionIdentity;

fn probe() -> HttpServerProbe {
    HttpServerProbe {
        descriptor: ProbeDescriptor {
            id: ProbeId {
                instrumented_package: "net/http".into(),
                span_kind: SpanKindTag::Server,
            },
            consts: vec![ConstSpec::Abi, ConstSpec::Allocation],
            attachments: vec![Attachment {
                function: FunctionIdentity::new("net/http", None, "HandlerFunc.ServeHTTP"),
                entry_program: "http_server_entry".into(),
                return_program: Some("http_server_return".into()),
            }],
            event_layout: standard_event_layout(8 + 64 + 2),
            default_sampler: support::always_on(),
        },
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: "otel-auto-agent/http_server".into(),
        version: "0.1.0".into(),
        schema_url: String::new(),
    }
}

#[test]
fn produces_a_server_span_with_route_method_and_status() {
    let probe = probe();
    let current = support::ctx(7, true);

    let mut raw = Vec::new();
    support::encode_base(&mut raw, 1_000, 2_000, current, None);
    support::fixed(&mut raw, "GET", 8);
    support::fixed(&mut raw, "/users/{id}", 64);
    raw.extend_from_slice(&200u16.to_le_bytes());

    let event = probe.decode_event(&raw).unwrap();
    let spans = probe.to_spans(&event, &scope());

    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name, "/users/{id}");
    assert_eq!(span.kind, SpanKind::Server);
    assert_eq!(span.status, Status::Ok);
    assert_eq!(span.parent_span_id, None);
    assert_eq!(span.context.trace_id, current.trace_id);
    assert!(span.context.is_sampled());

    match span.attributes.get("http.request.method") {
        Some(otel_auto_agent::span::AttributeValue::String(s)) => assert_eq!(s, "GET"),
        other => panic!("unexpected http.request.method attribute: {other:?}"),
    }
    match span.attributes.get("http.response.status_code") {
        Some(otel_auto_agent::span::AttributeValue::Int(i)) => assert_eq!(*i, 200),
        other => panic!("unexpected http.response.status_code attribute: {other:?}"),
    }
    match span.attributes.get("url.path") {
        Some(otel_auto_agent::span::AttributeValue::String(s)) => assert_eq!(s, "/users/{id}"),
        other => panic!("unexpected url.path attribute: {other:?}"),
    }
}

#[test]
fn a_5xx_status_produces_an_error_status() {
    let probe = probe();
    let current = support::ctx(3, true);

    let mut raw = Vec::new();
    support::encode_base(&mut raw, 1_000, 2_000, current, None);
    support::fixed(&mut raw, "POST", 8);
    support::fixed(&mut raw, "/orders", 64);
    raw.extend_from_slice(&500u16.to_le_bytes());

    let event = probe.decode_event(&raw).unwrap();
    let spans = probe.to_spans(&event, &scope());

    assert_eq!(spans.len(), 1);
    assert!(matches!(spans[0].status, Status::Error { .. }));
}
