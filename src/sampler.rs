//! Sampler configuration (spec §4.H "Sampling"), serialized into the
//! in-kernel sampling table consulted by the entry probe.
//!
//! Shape mirrors `opentelemetry_sdk::trace::Sampler`/`ShouldSample`: a small
//! enum of variants dispatched through one trait method, rather than a
//! strategy object per call site.

use crate::span::SpanContext;

/// Decision returned by a sampler: whether the span is recorded/exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingDecision {
    Drop,
    RecordAndSample,
}

/// Pure function from `(trace id, parent context)` to a sampling decision.
pub trait ShouldSample: std::fmt::Debug + Send + Sync {
    fn should_sample(&self, trace_id: &[u8; 16], parent: Option<&SpanContext>) -> SamplingDecision;
}

/// The four configurable variants from spec §4.H. `ParentBased` carries its
/// own four sub-decisions and may not nest another `ParentBased`
/// (enforced at construction, spec §8 "parent_based nesting fails
/// validation").
#[derive(Debug, Clone)]
pub enum Sampler {
    AlwaysOn,
    AlwaysOff,
    TraceIdRatio(f64),
    ParentBased {
        root: Box<LeafSampler>,
        remote_sampled: Box<LeafSampler>,
        remote_not_sampled: Box<LeafSampler>,
        local_sampled: Box<LeafSampler>,
        local_not_sampled: Box<LeafSampler>,
    },
}

/// Non-`ParentBased` samplers, usable as the five `ParentBased` sub-decisions.
/// This is how nesting is rejected at the type level: there is no
/// `LeafSampler::ParentBased` variant to construct.
#[derive(Debug, Clone)]
pub enum LeafSampler {
    AlwaysOn,
    AlwaysOff,
    TraceIdRatio(f64),
}

impl LeafSampler {
    fn should_sample(&self, trace_id: &[u8; 16]) -> SamplingDecision {
        match self {
            LeafSampler::AlwaysOn => SamplingDecision::RecordAndSample,
            LeafSampler::AlwaysOff => SamplingDecision::Drop,
            LeafSampler::TraceIdRatio(fraction) => sample_by_ratio(trace_id, *fraction),
        }
    }
}

/// Deterministic ratio-based decision: interpret the trailing 8 bytes of the
/// trace id as a u64 and compare against `fraction * u64::MAX`, the same
/// scheme `opentelemetry_sdk`'s `TraceIdRatioBased` sampler uses.
fn sample_by_ratio(trace_id: &[u8; 16], fraction: f64) -> SamplingDecision {
    let fraction = fraction.clamp(0.0, 1.0);
    if fraction >= 1.0 {
        return SamplingDecision::RecordAndSample;
    }
    if fraction <= 0.0 {
        return SamplingDecision::Drop;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&trace_id[8..16]);
    let value = u64::from_be_bytes(tail);
    let threshold = (fraction * u64::MAX as f64) as u64;
    if value < threshold {
        SamplingDecision::RecordAndSample
    } else {
        SamplingDecision::Drop
    }
}

impl Sampler {
    /// Construct a parent-based sampler. Since the sub-decisions are typed
    /// as `LeafSampler`, a nested `ParentBased` simply cannot be passed here;
    /// callers building from untrusted config (§6 `OTEL_TRACES_SAMPLER`)
    /// should reject the string `"parentbased_parentbased"`-style input
    /// before reaching this constructor.
    pub fn parent_based(
        root: LeafSampler,
        remote_sampled: LeafSampler,
        remote_not_sampled: LeafSampler,
        local_sampled: LeafSampler,
        local_not_sampled: LeafSampler,
    ) -> Self {
        Sampler::ParentBased {
            root: Box::new(root),
            remote_sampled: Box::new(remote_sampled),
            remote_not_sampled: Box::new(remote_not_sampled),
            local_sampled: Box::new(local_sampled),
            local_not_sampled: Box::new(local_not_sampled),
        }
    }
}

impl ShouldSample for Sampler {
    fn should_sample(&self, trace_id: &[u8; 16], parent: Option<&SpanContext>) -> SamplingDecision {
        match self {
            Sampler::AlwaysOn => SamplingDecision::RecordAndSample,
            Sampler::AlwaysOff => SamplingDecision::Drop,
            Sampler::TraceIdRatio(fraction) => sample_by_ratio(trace_id, *fraction),
            Sampler::ParentBased {
                root,
                remote_sampled,
                remote_not_sampled,
                local_sampled,
                local_not_sampled,
            } => match parent {
                None => root.should_sample(trace_id),
                Some(p) if p.remote && p.is_sampled() => remote_sampled.should_sample(trace_id),
                Some(p) if p.remote => remote_not_sampled.should_sample(trace_id),
                Some(p) if p.is_sampled() => local_sampled.should_sample(trace_id),
                Some(_) => local_not_sampled.should_sample(trace_id),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_id(fill: u8) -> [u8; 16] {
        [fill; 16]
    }

    #[test]
    fn always_on_samples_everything() {
        let s = Sampler::AlwaysOn;
        assert_eq!(
            s.should_sample(&trace_id(0xff), None),
            SamplingDecision::RecordAndSample
        );
        assert_eq!(
            s.should_sample(&trace_id(0x00), None),
            SamplingDecision::RecordAndSample
        );
    }

    #[test]
    fn always_off_drops_everything() {
        let s = Sampler::AlwaysOff;
        assert_eq!(s.should_sample(&trace_id(0xff), None), SamplingDecision::Drop);
        assert_eq!(s.should_sample(&trace_id(0x00), None), SamplingDecision::Drop);
    }

    #[test]
    fn ratio_boundary_zero_and_one_are_deterministic() {
        let off = Sampler::TraceIdRatio(0.0);
        let on = Sampler::TraceIdRatio(1.0);
        for fill in [0x00, 0x7f, 0xff] {
            assert_eq!(off.should_sample(&trace_id(fill), None), SamplingDecision::Drop);
            assert_eq!(
                on.should_sample(&trace_id(fill), None),
                SamplingDecision::RecordAndSample
            );
        }
    }

    #[test]
    fn parent_based_prefers_remote_sampled_branch() {
        let sampler = Sampler::parent_based(
            LeafSampler::AlwaysOff,
            LeafSampler::AlwaysOn,
            LeafSampler::AlwaysOff,
            LeafSampler::AlwaysOn,
            LeafSampler::AlwaysOff,
        );
        let remote_sampled_parent = SpanContext {
            trace_id: [1; 16],
            span_id: [2; 8],
            flags: 1,
            remote: true,
        };
        assert_eq!(
            sampler.should_sample(&trace_id(0), Some(&remote_sampled_parent)),
            SamplingDecision::RecordAndSample
        );
    }

    #[test]
    fn parent_based_with_no_parent_uses_root() {
        let sampler = Sampler::parent_based(
            LeafSampler::AlwaysOn,
            LeafSampler::AlwaysOff,
            LeafSampler::AlwaysOff,
            LeafSampler::AlwaysOff,
            LeafSampler::AlwaysOff,
        );
        assert_eq!(
            sampler.should_sample(&trace_id(0), None),
            SamplingDecision::RecordAndSample
        );
    }
}
