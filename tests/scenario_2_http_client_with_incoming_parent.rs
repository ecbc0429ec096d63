//! Spec §8 scenario 2: an inbound W3C traceparent
//! `00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01` becomes the
//! parent of a locally-produced HTTP client span, via
//! `TraceContext::to_span_context` and the propagation table's entry
//! protocol.

#[path = "support/mod.rs"]
mod support;

use otel_auto_agent::probe::catalog::{standard_event_layout, HttpClientProbe, Probe};
use otel_auto_agent::probe::descriptor::{
    Attachment, ConstSpec, ProbeDescriptor, ProbeId, SpanKindTag,
};
use otel_auto_agent::propagation::entry_protocol;
use otel_auto_agent::span::InstrumentationScope;
use otel_auto_agent::target::FunctionIdentity;
use otel_auto_agent::trace_context::TraceContext;

const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

fn probe() -> HttpClientProbe {
    HttpClientProbe {
        descriptor: ProbeDescriptor {
            id: ProbeId {
                instrumented_package: "net/http".into(),
                span_kind: SpanKindTag::Client,
            },
            consts: vec![ConstSpec::Abi, ConstSpec::Allocation],
            attachments: vec![Attachment {
                function: FunctionIdentity::new("net/http", Some("Transport".into()), "roundTrip"),
                entry_program: "http_client_entry".into(),
                return_program: Some("http_client_return".into()),
            }],
            event_layout: standard_event_layout(8 + 128 + 2),
            default_sampler: support::always_on(),
        },
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: "otel-auto-agent/http_client".into(),
        version: "0.1.0".into(),
        schema_url: String::new(),
    }
}

#[test]
fn traceparent_parses_into_a_remote_sampled_context() {
    let parsed = TraceContext::parse(TRACEPARENT).unwrap();
    assert!(parsed.is_sampled());

    let span_context = parsed.to_span_context();
    assert!(span_context.remote);
    assert!(span_context.is_sampled());
    assert_eq!(hex::encode(span_context.trace_id), "0af7651916cd43dd8448eb211c80319c");
}

#[test]
fn the_inbound_context_becomes_the_new_spans_parent() {
    let parsed = TraceContext::parse(TRACEPARENT).unwrap();
    let inbound = parsed.to_span_context();

    // The propagation table's entry protocol treats an inbound remote
    // context exactly like any other existing entry: the new span gets a
    // fresh id sharing the trace id, the inbound context becomes its parent.
    let existing = otel_auto_agent::propagation::Entry::root(inbound);
    let (entry, event, _gid) = entry_protocol(Some(existing), || support::ctx(9, true));

    assert_eq!(event.parent, inbound);
    assert_eq!(entry.span_context.trace_id, inbound.trace_id);
    assert_ne!(entry.span_context.span_id, inbound.span_id);

    let probe = probe();
    let mut raw = Vec::new();
    support::encode_base(&mut raw, 10, 20, entry.span_context, Some(event.parent));
    support::fixed(&mut raw, "GET", 8);
    support::fixed(&mut raw, "https://api.example.com/v1/widgets", 128);
    raw.extend_from_slice(&200u16.to_le_bytes());

    let decoded = probe.decode_event(&raw).unwrap();
    let spans = probe.to_spans(&decoded, &scope());

    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].parent_span_id, Some(inbound.span_id));
    assert_eq!(spans[0].context.trace_id, inbound.trace_id);
}
