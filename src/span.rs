//! Span context, id generation, and the OpenTelemetry-shaped span record
//! produced by the Span Assembler (spec §3 "Span context" / "Base span
//! properties" / "Span record").

use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// 16-byte trace identifier, 8-byte span identifier, 8-bit flags, optional
/// remote flag. Identifiers are non-zero when valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub flags: u8,
    pub remote: bool,
}

const SAMPLED_FLAG: u8 = 0x01;

impl SpanContext {
    /// The all-zero context: used as a sentinel "no parent" value, never a
    /// real span's identity (spec: "identifiers are non-zero when valid").
    pub const INVALID: SpanContext = SpanContext {
        trace_id: [0; 16],
        span_id: [0; 8],
        flags: 0,
        remote: false,
    };

    pub fn is_valid(&self) -> bool {
        self.trace_id != [0; 16] && self.span_id != [0; 8]
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & SAMPLED_FLAG != 0
    }

    pub fn with_sampled(mut self, sampled: bool) -> Self {
        if sampled {
            self.flags |= SAMPLED_FLAG;
        } else {
            self.flags &= !SAMPLED_FLAG;
        }
        self
    }

    pub fn trace_id_hex(&self) -> String {
        hex::encode(self.trace_id)
    }

    pub fn span_id_hex(&self) -> String {
        hex::encode(self.span_id)
    }
}

impl fmt::Display for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "00-{}-{}-{:02x}",
            self.trace_id_hex(),
            self.span_id_hex(),
            self.flags
        )
    }
}

thread_local! {
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_entropy());
}

/// Mints trace and span identifiers. A fresh trace id is 128 bits of entropy;
/// a span id reuses the owning trace's id but gets its own 64 bits.
pub struct IdGenerator;

impl IdGenerator {
    pub fn new_trace_id() -> [u8; 16] {
        CURRENT_RNG.with(|rng| rng.borrow_mut().gen::<u128>().to_be_bytes())
    }

    pub fn new_span_id() -> [u8; 8] {
        CURRENT_RNG.with(|rng| rng.borrow_mut().gen::<u64>().to_be_bytes())
    }
}

/// Span kind (OpenTelemetry semantic convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// Span status (spec §3 "Span record").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Unset,
    Ok,
    Error {
        message: String,
    },
}

/// A point-in-time annotation attached to a span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: u64,
    pub attributes: HashMap<String, AttributeValue>,
}

/// A causal reference to another span context, with its own attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanLink {
    pub context: SpanContext,
    pub attributes: HashMap<String, AttributeValue>,
}

/// Attribute values as OpenTelemetry understands them.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Bool(bool),
    Double(f64),
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}
impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}
impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}
impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}
impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

/// `name, version, schema URL` identifying the instrumentation that produced
/// a span (spec §3 "Span record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: String,
    pub schema_url: String,
}

/// Emitted by the Span Assembler (spec §3 "Span record" / §4.F).
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub name: String,
    pub kind: SpanKind,
    pub start_unix_nano: u64,
    pub end_unix_nano: u64,
    pub context: SpanContext,
    pub parent_span_id: Option<[u8; 8]>,
    pub attributes: HashMap<String, AttributeValue>,
    pub status: Status,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub scope: InstrumentationScope,
}

impl SpanRecord {
    /// `start <= end` and non-zero ids — the invariant §8 tests against.
    pub fn is_well_formed(&self) -> bool {
        self.context.is_valid() && self.start_unix_nano <= self.end_unix_nano
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_context_is_not_valid() {
        assert!(!SpanContext::INVALID.is_valid());
    }

    #[test]
    fn generated_ids_are_nonzero_and_distinct() {
        let t1 = IdGenerator::new_trace_id();
        let t2 = IdGenerator::new_trace_id();
        assert_ne!(t1, [0u8; 16]);
        assert_ne!(t1, t2);

        let s1 = IdGenerator::new_span_id();
        let s2 = IdGenerator::new_span_id();
        assert_ne!(s1, [0u8; 8]);
        assert_ne!(s1, s2);
    }

    #[test]
    fn sampled_flag_roundtrip() {
        let ctx = SpanContext {
            trace_id: [1; 16],
            span_id: [2; 8],
            flags: 0,
            remote: false,
        };
        let sampled = ctx.with_sampled(true);
        assert!(sampled.is_sampled());
        let unsampled = sampled.with_sampled(false);
        assert!(!unsampled.is_sampled());
    }

    #[test]
    fn display_matches_w3c_traceparent_shape() {
        let ctx = SpanContext {
            trace_id: [
                0x0a, 0xf7, 0x65, 0x19, 0x16, 0xcd, 0x43, 0xdd, 0x84, 0x48, 0xeb, 0x21, 0x1c, 0x80,
                0x31, 0x9c,
            ],
            span_id: [0xb7, 0xad, 0x6b, 0x71, 0x69, 0x20, 0x33, 0x31],
            flags: 1,
            remote: false,
        };
        assert_eq!(
            ctx.to_string(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        );
    }

    #[test]
    fn well_formed_requires_start_le_end_and_valid_ids() {
        let scope = InstrumentationScope {
            name: "test".into(),
            version: "0.1.0".into(),
            schema_url: String::new(),
        };
        let good = SpanRecord {
            name: "op".into(),
            kind: SpanKind::Internal,
            start_unix_nano: 10,
            end_unix_nano: 20,
            context: SpanContext {
                trace_id: [1; 16],
                span_id: [2; 8],
                flags: 0,
                remote: false,
            },
            parent_span_id: None,
            attributes: HashMap::new(),
            status: Status::Unset,
            events: Vec::new(),
            links: Vec::new(),
            scope: scope.clone(),
        };
        assert!(good.is_well_formed());

        let mut backwards = good.clone();
        backwards.end_unix_nano = 5;
        assert!(!backwards.is_well_formed());

        let mut invalid_id = good;
        invalid_id.context = SpanContext::INVALID;
        assert!(!invalid_id.is_well_formed());
    }
}
