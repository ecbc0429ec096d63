//! Probe descriptor: static, compile-time data per probe (spec §3 "Probe
//! descriptor", §9).

use crate::sampler::Sampler;
use crate::span::SpanKind;
use crate::target::{Abi, Allocation, FunctionIdentity};

/// `(instrumented package, span kind)` — identifies a probe within the
/// catalog and labels the spans it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeId {
    pub instrumented_package: String,
    pub span_kind: SpanKindTag,
}

/// Mirrors `SpanKind` but kept distinct since a probe's *declared* kind is
/// compile-time data, while a span's kind is a per-event field that may
/// occasionally diverge (e.g. the embedded-SDK probes pass through whatever
/// kind the target itself recorded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKindTag {
    Server,
    Client,
    Producer,
    Consumer,
    Internal,
}

impl From<SpanKindTag> for SpanKind {
    fn from(tag: SpanKindTag) -> Self {
        match tag {
            SpanKindTag::Server => SpanKind::Server,
            SpanKindTag::Client => SpanKind::Client,
            SpanKindTag::Producer => SpanKind::Producer,
            SpanKindTag::Consumer => SpanKind::Consumer,
            SpanKindTag::Internal => SpanKind::Internal,
        }
    }
}

/// One constant a probe's blob expects patched in before load (spec §3
/// "consts", §4.D "Constant patching").
#[derive(Debug, Clone)]
pub enum ConstSpec {
    /// Resolved to a single byte from `target.abi`.
    Abi,
    /// Resolved to `{start, length, cpu_count}` from `target.allocation`.
    Allocation,
    /// Resolved via the Offsets Database using
    /// `target.libraries[instrumented_package]` as the lookup version.
    StructFieldOffset {
        struct_name: String,
        field: String,
    },
    /// Resolved from environment, per the per-probe whitelist in §6
    /// (e.g. `OTEL_GO_AUTO_INCLUDE_DB_STATEMENT` for the SQL probe).
    FeatureFlag {
        env_var: String,
        default: bool,
    },
    /// A fixed scalar baked in at compile time (e.g. a sampler variant tag).
    FixedValue(i64),
}

/// A resolved constant value, ready to patch into the loaded object.
#[derive(Debug, Clone, Copy)]
pub enum ConstValue {
    Byte(u8),
    Allocation(Allocation),
    Offset(u64),
    Bool(bool),
    Scalar(i64),
}

/// `(target function identity, entry program name, optional return program name)`.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub function: FunctionIdentity,
    pub entry_program: String,
    pub return_program: Option<String>,
}

/// Byte layout of the records a probe emits. `total_len` is authoritative for
/// the demultiplexer's length check (spec §4.E step 2); `fields` documents
/// the layout for decoders and is informational only.
#[derive(Debug, Clone)]
pub struct EventLayout {
    pub total_len: usize,
    /// Set for probes whose tail is a variable-length blob (e.g. the
    /// embedded SDK span probe's serialized-span payload): `total_len` is
    /// then a lower bound rather than an exact size.
    pub variable_length: bool,
    pub fields: Vec<FieldLayout>,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldLayout {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
}

impl EventLayout {
    pub fn matches(&self, record_len: usize) -> bool {
        if self.variable_length {
            record_len >= self.total_len
        } else {
            record_len == self.total_len
        }
    }
}

/// Static, compile-time data per probe.
#[derive(Debug, Clone)]
pub struct ProbeDescriptor {
    pub id: ProbeId,
    pub consts: Vec<ConstSpec>,
    pub attachments: Vec<Attachment>,
    pub event_layout: EventLayout,
    /// Default sampler baked into the descriptor; overridden at runtime by
    /// the Manager's configured sampler (spec §4.H "Sampling").
    pub default_sampler: Sampler,
}

impl ProbeDescriptor {
    pub fn wanted_functions(&self) -> impl Iterator<Item = &FunctionIdentity> {
        self.attachments.iter().map(|a| &a.function)
    }
}
