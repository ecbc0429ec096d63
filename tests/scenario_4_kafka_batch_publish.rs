//! Spec §8 scenario 4: a single `WriteMessages` call publishing two Kafka
//! messages expands into two span records sharing one start/end timestamp,
//! each carrying the batch's total message count.

#[path = "support/mod.rs"]
mod support;

use otel_auto_agent::probe::catalog::{standard_event_layout, KafkaProducerProbe, Probe};
use otel_auto_agent::probe::descriptor::{
    Attachment, ConstSpec, ProbeDescriptor, ProbeId, SpanKindTag,
};
use otel_auto_agent::span::{AttributeValue, InstrumentationScope, SpanKind};
use otel_auto_agent::target::FunctionIdentity;

fn probe() -> KafkaProducerProbe {
    KafkaProducerProbe {
        descriptor: ProbeDescriptor {
            id: ProbeId {
                instrumented_package: "github.com/segmentio/kafka-go".into(),
                span_kind: SpanKindTag::Producer,
            },
            consts: vec![ConstSpec::Abi, ConstSpec::Allocation],
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
            default_sampler: support::always_on(),
        },
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: "otel-auto-agent/kafka_producer".into(),
        version: "0.1.0".into(),
        schema_url: String::new(),
    }
}

#[test]
fn a_batch_of_two_messages_produces_two_spans_sharing_one_timestamp() {
    let probe = probe();
    let mut raw = Vec::new();
    support::encode_base(&mut raw, 5_000, 5_100, support::ctx(11, true), None);
    support::fixed(&mut raw, "topic1", 64);
    support::fixed(&mut raw, "key1,key2", 128);

    let event = probe.decode_event(&raw).unwrap();
    let spans = probe.to_spans(&event, &scope());

    assert_eq!(spans.len(), 2);
    for span in &spans {
        assert_eq!(span.name, "topic1");
        assert_eq!(span.kind, SpanKind::Producer);
        assert_eq!(span.start_unix_nano, 5_000);
        assert_eq!(span.end_unix_nano, 5_100);
        assert!(matches!(
            span.attributes.get("messaging.batch.message.count"),
            Some(AttributeValue::Int(2))
        ));
        assert!(matches!(
            span.attributes.get("messaging.destination.name"),
            Some(AttributeValue::String(topic)) if topic == "topic1"
        ));
    }

    let keys: Vec<_> = spans
        .iter()
        .map(|s| match s.attributes.get("messaging.kafka.message.key") {
            Some(AttributeValue::String(k)) => k.clone(),
            other => panic!("unexpected key attribute: {other:?}"),
        })
        .collect();
    assert_eq!(keys, vec!["key1".to_string(), "key2".to_string()]);
}
