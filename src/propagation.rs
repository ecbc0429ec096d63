//! Propagation table (spec §4.G): a shared in-kernel hash map keyed by the
//! target's execution-thread identifier ("GID"), holding the currently
//! active span context for that thread.
//!
//! The entry/return protocol described below executes *inside* the compiled
//! probe programs (out of scope for this crate — probes are loaded as
//! opaque objects, spec §4.D). What lives here is the user-space side: the
//! table's wire layout (so probe constants and the demultiplexer agree on
//! it), and the pinned-path convention the Probe Loader uses to share one
//! table across every probe attached to a target.

use std::path::PathBuf;

use crate::span::SpanContext;

/// Value type of the propagation table. Repr matches the in-kernel struct
/// byte-for-byte: `span_context` (16 + 8 + 1 + 1 bytes, zero-padded) then a
/// `u32` nesting depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Entry {
    pub span_context: SpanContext,
    pub depth: u32,
}

impl Entry {
    pub fn root(span_context: SpanContext) -> Self {
        Self {
            span_context,
            depth: 1,
        }
    }

    pub fn nested(parent: SpanContext, current: SpanContext, prior_depth: u32) -> Self {
        let _ = parent;
        Self {
            span_context: current,
            depth: prior_depth + 1,
        }
    }
}

/// Emitted by the return protocol: `{parent, current}` timestamps and
/// contexts, forwarded into the probe's ring alongside the raw event
/// (spec §4.G "Return protocol" step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationEvent {
    pub gid: u64,
    pub parent: SpanContext,
    pub current: SpanContext,
}

/// Entry-protocol decision a probe constant table encodes for the kernel
/// side (spec §4.G steps 3–4). Modeled here purely so the loader and tests
/// can assert on the protocol's shape without re-deriving it from prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    /// No existing entry for this GID: mint fresh ids, parent is zero.
    NewRoot,
    /// Existing entry found: mint a new span id sharing the trace id,
    /// the old stored context becomes the parent, depth increments.
    Nested { prior_depth: u32 },
}

/// Pure model of the entry protocol (spec §4.G steps 1–4), used by tests to
/// pin down expected kernel-side behavior and by the analyzer when
/// generating diagnostic traces in `--log-level debug`.
pub fn entry_protocol(existing: Option<Entry>, mint: impl FnOnce() -> SpanContext) -> (Entry, PropagationEvent, u64) {
    match existing {
        None => {
            let current = mint().with_sampled(true);
            let entry = Entry::root(current);
            let event = PropagationEvent {
                gid: 0,
                parent: SpanContext::INVALID,
                current,
            };
            (entry, event, 0)
        }
        Some(prior) => {
            let minted = mint();
            let current = SpanContext {
                trace_id: prior.span_context.trace_id,
                span_id: minted.span_id,
                flags: prior.span_context.flags,
                remote: false,
            };
            let entry = Entry::nested(prior.span_context, current, prior.depth);
            let event = PropagationEvent {
                gid: 0,
                parent: prior.span_context,
                current,
            };
            (entry, event, 0)
        }
    }
}

/// Returns `Some(remaining_depth)` to keep the entry, or `None` when depth
/// reaches zero and the entry should be deleted (spec §4.G "Return protocol"
/// steps 1–2).
pub fn return_protocol(entry: Entry) -> Option<Entry> {
    if entry.depth <= 1 {
        None
    } else {
        Some(Entry {
            depth: entry.depth - 1,
            ..entry
        })
    }
}

/// Where the propagation table (and the allocation region reference, and
/// per-probe rings) are pinned so multiple probes attached to the same
/// target share them (spec §4.D "Loading").
pub fn pinned_path(target_pid: i32) -> PathBuf {
    PathBuf::from(format!("/sys/fs/bpf/otel-auto-agent/{target_pid}/propagation"))
}
