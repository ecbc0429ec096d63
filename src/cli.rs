//! Command-line interface (spec §6 "External interfaces").

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "otel-auto-agent")]
#[command(version)]
#[command(
    about = "Attaches uprobes to a running binary and emits OpenTelemetry spans without modifying it",
    long_about = None
)]
pub struct Cli {
    /// Logger threshold: debug, info, warn, or error.
    #[arg(long, env = "OTEL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Target process id. Preferred over --target-exe if both are given.
    #[arg(long)]
    pub target_pid: Option<i32>,

    /// Path to the target executable; the agent waits for a matching
    /// process to appear if none is running yet.
    #[arg(long)]
    pub target_exe: Option<PathBuf>,

    /// Enables embedded SDK capture: overriding the target's own tracing
    /// API's sampling decision and capturing spans it already creates.
    #[arg(long)]
    pub global_impl: bool,

    /// Comma-separated allow list (or `-`-prefixed deny list) of probe
    /// families to load, e.g. `http,sql` or `-kafka`.
    #[arg(long)]
    pub instrumentation: Option<String>,
}
