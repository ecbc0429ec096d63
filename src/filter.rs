//! Instrumentation filtering for `--instrumentation=...`
//!
//! Narrows the static probe catalog without recompiling. Supports:
//! - An allow list: `--instrumentation=http,sql`
//! - A deny list, every entry prefixed `-`: `--instrumentation=-kafka`
//! - Probe-family aliases that expand to multiple catalog entries (`http`
//!   covers both the server and client probes, `kafka` covers both
//!   producer and consumer, `rpc` covers both server and client).
//!
//! Absent (`None`/unset) means every probe in the catalog is attempted.

use anyhow::{bail, Result};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Allow(HashSet<String>),
    Deny(HashSet<String>),
}

/// Determines which probes from the static catalog the Manager attempts to
/// load (spec SPEC_FULL §2 "Filter expressions").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationFilter {
    mode: Option<Mode>,
}

fn expand_alias(name: &str) -> Vec<String> {
    match name {
        "http" => vec!["http_server".to_string(), "http_client".to_string()],
        "rpc" => vec!["rpc_server".to_string(), "rpc_client".to_string()],
        "kafka" => vec!["kafka_producer".to_string(), "kafka_consumer".to_string()],
        "sql" => vec!["sql".to_string()],
        "embedded" => vec!["embedded_sdk_sampler".to_string(), "embedded_sdk_span".to_string()],
        other => vec![other.to_string()],
    }
}

impl InstrumentationFilter {
    /// No filter: every probe is attempted.
    pub fn all() -> Self {
        Self { mode: None }
    }

    /// Parse a `--instrumentation` value. Entries must be consistently
    /// either all plain (allow list) or all `-`-prefixed (deny list);
    /// mixing the two is rejected.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.trim().is_empty() {
            bail!("empty --instrumentation value");
        }

        let tokens: Vec<&str> = spec.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
        let negated: Vec<bool> = tokens.iter().map(|t| t.starts_with('-')).collect();
        if negated.iter().any(|&n| n) && !negated.iter().all(|&n| n) {
            bail!("--instrumentation cannot mix allow and deny entries: {spec}");
        }
        let is_deny = negated.first().copied().unwrap_or(false);

        let mut names = HashSet::new();
        for token in &tokens {
            let name = token.strip_prefix('-').unwrap_or(token);
            for expanded in expand_alias(name) {
                names.insert(expanded.to_string());
            }
        }

        Ok(Self {
            mode: Some(if is_deny { Mode::Deny(names) } else { Mode::Allow(names) }),
        })
    }

    /// Whether the named probe (by its catalog id, e.g. `"http_server"`)
    /// should be attempted.
    pub fn should_load(&self, probe_name: &str) -> bool {
        match &self.mode {
            None => true,
            Some(Mode::Allow(set)) => set.contains(probe_name),
            Some(Mode::Deny(set)) => !set.contains(probe_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_filter_loads_everything() {
        let filter = InstrumentationFilter::all();
        assert!(filter.should_load("http_server"));
        assert!(filter.should_load("anything"));
    }

    #[test]
    fn allow_list_expands_family_aliases() {
        let filter = InstrumentationFilter::parse("http,sql").unwrap();
        assert!(filter.should_load("http_server"));
        assert!(filter.should_load("http_client"));
        assert!(filter.should_load("sql"));
        assert!(!filter.should_load("kafka_producer"));
    }

    #[test]
    fn deny_list_excludes_named_family() {
        let filter = InstrumentationFilter::parse("-kafka").unwrap();
        assert!(filter.should_load("http_server"));
        assert!(!filter.should_load("kafka_producer"));
        assert!(!filter.should_load("kafka_consumer"));
    }

    #[test]
    fn mixed_allow_and_deny_is_rejected() {
        assert!(InstrumentationFilter::parse("http,-kafka").is_err());
    }

    #[test]
    fn empty_value_is_rejected() {
        assert!(InstrumentationFilter::parse("").is_err());
    }

    #[test]
    fn plain_probe_name_passes_through_unaliased() {
        let filter = InstrumentationFilter::parse("custom_probe").unwrap();
        assert!(filter.should_load("custom_probe"));
        assert!(!filter.should_load("http_server"));
    }
}
