//! Runtime configuration (spec §6 "External interfaces"): merges CLI flags
//! over their overlapping environment variables, flag wins.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::Level;

use crate::analyzer::TargetSelector;
use crate::cli::Cli;
use crate::error::AgentError;
use crate::filter::InstrumentationFilter;
use crate::sampler::{LeafSampler, Sampler};

/// Resource identity attached to every exported span (spec §1 "Data model",
/// SPEC_FULL §3 "Resource").
#[derive(Debug, Clone)]
pub struct Resource {
    pub service_name: String,
    pub attributes: HashMap<String, String>,
    pub telemetry_auto_version: &'static str,
}

impl Resource {
    fn from_env() -> Self {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "unknown_service".to_string());
        let attributes = std::env::var("OTEL_RESOURCE_ATTRIBUTES")
            .ok()
            .map(parse_resource_attributes)
            .unwrap_or_default();
        Self {
            service_name,
            attributes,
            telemetry_auto_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Parses `OTEL_RESOURCE_ATTRIBUTES`'s `key1=value1,key2=value2` format.
fn parse_resource_attributes(raw: String) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Fully-resolved configuration for one run, after merging CLI flags over
/// environment variables (spec §6 "flag wins over env for overlapping
/// settings").
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: Level,
    pub target: TargetSelector,
    pub global_impl: bool,
    pub instrumentation_filter: InstrumentationFilter,
    pub resource: Resource,
    pub sampler: Sampler,
    pub include_db_statement: bool,
    pub parse_db_statement: bool,
    pub probes_dir: PathBuf,
    pub offsets_path: PathBuf,
}

impl Config {
    /// Build from parsed CLI args plus the process environment. Fails with
    /// `InvalidState` on malformed flag/env values (spec §6 "exit code 2 on
    /// invalid flags" — the caller maps this to that exit code).
    pub fn resolve(cli: &Cli) -> Result<Self, AgentError> {
        let log_level = resolve_log_level(cli)?;
        let target = resolve_target(cli)?;
        let global_impl = cli.global_impl || env_bool("OTEL_GO_AUTO_GLOBAL");

        let instrumentation_filter = match &cli.instrumentation {
            Some(spec) => InstrumentationFilter::parse(spec)
                .map_err(|e| AgentError::InvalidState(format!("--instrumentation: {e}")))?,
            None => InstrumentationFilter::all(),
        };

        let sampler = resolve_sampler()?;

        let include_db_statement = env_bool("OTEL_GO_AUTO_INCLUDE_DB_STATEMENT");
        let parse_db_statement = env_bool("OTEL_GO_AUTO_PARSE_DB_STATEMENT");

        let probes_dir = std::env::var("OTEL_GO_AUTO_PROBES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/lib/otel-auto-agent/probes"));
        let offsets_path = std::env::var("OTEL_GO_AUTO_OFFSETS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/share/otel-auto-agent/offsets.json"));

        Ok(Self {
            log_level,
            target,
            global_impl,
            instrumentation_filter,
            resource: Resource::from_env(),
            sampler,
            include_db_statement,
            parse_db_statement,
            probes_dir,
            offsets_path,
        })
    }
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn resolve_log_level(cli: &Cli) -> Result<Level, AgentError> {
    let raw = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("OTEL_LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    raw.parse::<Level>()
        .map_err(|_| AgentError::InvalidState(format!("invalid --log-level/OTEL_LOG_LEVEL: {raw}")))
}

/// `--target-pid` beats `--target-exe` beats `OTEL_GO_AUTO_TARGET_PID` beats
/// `OTEL_GO_AUTO_TARGET_EXE` (spec §6: "preferred over --target-exe if both
/// given"; flags as a pair win over env as a pair).
fn resolve_target(cli: &Cli) -> Result<TargetSelector, AgentError> {
    if let Some(pid) = cli.target_pid {
        return Ok(TargetSelector::Pid(pid));
    }
    if let Some(exe) = &cli.target_exe {
        return Ok(TargetSelector::Exe(exe.clone()));
    }
    if let Ok(pid) = std::env::var("OTEL_GO_AUTO_TARGET_PID") {
        let pid: i32 = pid
            .parse()
            .map_err(|_| AgentError::InvalidState(format!("invalid OTEL_GO_AUTO_TARGET_PID: {pid}")))?;
        return Ok(TargetSelector::Pid(pid));
    }
    if let Ok(exe) = std::env::var("OTEL_GO_AUTO_TARGET_EXE") {
        return Ok(TargetSelector::Exe(exe.into()));
    }
    Err(AgentError::NoTarget(
        "no --target-pid/--target-exe flag and no OTEL_GO_AUTO_TARGET_PID/OTEL_GO_AUTO_TARGET_EXE env var"
            .to_string(),
    ))
}

/// Parses `OTEL_TRACES_SAMPLER`/`OTEL_TRACES_SAMPLER_ARG` into a `Sampler`.
/// Defaults to `parentbased_always_on`, the OpenTelemetry SDK's own default.
/// Rejects any string asking for `ParentBased` nesting before it ever
/// reaches `Sampler::parent_based` (spec §8 "Open question" resolution).
fn resolve_sampler() -> Result<Sampler, AgentError> {
    let name = std::env::var("OTEL_TRACES_SAMPLER").unwrap_or_else(|_| "parentbased_always_on".to_string());
    let arg = std::env::var("OTEL_TRACES_SAMPLER_ARG").ok();

    if name.starts_with("parentbased_parentbased") {
        return Err(AgentError::InvalidState(
            "OTEL_TRACES_SAMPLER cannot nest parentbased within parentbased".to_string(),
        ));
    }

    let ratio = || -> Result<f64, AgentError> {
        arg.as_deref()
            .unwrap_or("1.0")
            .parse()
            .map_err(|_| AgentError::InvalidState(format!("invalid OTEL_TRACES_SAMPLER_ARG: {arg:?}")))
    };

    match name.as_str() {
        "always_on" => Ok(Sampler::AlwaysOn),
        "always_off" => Ok(Sampler::AlwaysOff),
        "traceidratio" => Ok(Sampler::TraceIdRatio(ratio()?)),
        "parentbased_always_on" => Ok(Sampler::parent_based(
            LeafSampler::AlwaysOn,
            LeafSampler::AlwaysOn,
            LeafSampler::AlwaysOff,
            LeafSampler::AlwaysOn,
            LeafSampler::AlwaysOff,
        )),
        "parentbased_always_off" => Ok(Sampler::parent_based(
            LeafSampler::AlwaysOff,
            LeafSampler::AlwaysOn,
            LeafSampler::AlwaysOff,
            LeafSampler::AlwaysOn,
            LeafSampler::AlwaysOff,
        )),
        "parentbased_traceidratio" => {
            let r = ratio()?;
            Ok(Sampler::parent_based(
                LeafSampler::TraceIdRatio(r),
                LeafSampler::AlwaysOn,
                LeafSampler::AlwaysOff,
                LeafSampler::AlwaysOn,
                LeafSampler::AlwaysOff,
            ))
        }
        other => Err(AgentError::InvalidState(format!(
            "unknown OTEL_TRACES_SAMPLER: {other}"
        ))),
    }
}
