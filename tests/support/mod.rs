//! Shared byte-encoding helpers for the scenario tests in this directory.
//! Every scenario builds a probe directly (no compiled object, no target
//! process) and feeds it hand-encoded raw event bytes matching the wire
//! layout `probe::wire`/`probe::event` define, the same little-endian,
//! fixed-width convention the in-kernel probes use.

#![allow(dead_code)]

use otel_auto_agent::sampler::Sampler;
use otel_auto_agent::span::SpanContext;

pub fn ctx(byte: u8, sampled: bool) -> SpanContext {
    SpanContext {
        trace_id: [byte; 16],
        span_id: [byte; 8],
        flags: if sampled { 1 } else { 0 },
        remote: false,
    }
}

pub fn fixed(bytes: &mut Vec<u8>, s: &str, width: usize) {
    let mut buf = vec![0u8; width];
    let src = s.as_bytes();
    let n = src.len().min(width);
    buf[..n].copy_from_slice(&src[..n]);
    bytes.extend_from_slice(&buf);
}

/// Encodes the shared `{start, end, current, parent}` prefix every probe
/// event carries.
pub fn encode_base(bytes: &mut Vec<u8>, start: u64, end: u64, current: SpanContext, parent: Option<SpanContext>) {
    bytes.extend_from_slice(&start.to_le_bytes());
    bytes.extend_from_slice(&end.to_le_bytes());
    bytes.extend_from_slice(&current.trace_id);
    bytes.extend_from_slice(&current.span_id);
    bytes.push(current.flags);
    match parent {
        Some(p) => {
            bytes.extend_from_slice(&p.span_id);
            bytes.push(p.flags);
        }
        None => {
            bytes.extend_from_slice(&[0u8; 8]);
            bytes.push(0);
        }
    }
}

pub fn always_on() -> Sampler {
    Sampler::AlwaysOn
}
