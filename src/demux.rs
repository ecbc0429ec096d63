//! Event demultiplexer (spec §4.E): drains every loaded probe's perf ring,
//! validates and decodes each record, turns it into span records, and
//! forwards them to the export ring buffer.
//!
//! Per-ring ordering is preserved (events drain a single CPU buffer in the
//! order the kernel wrote them); there is no ordering guarantee *across*
//! rings. One tokio task polls per probe, all sharing a cancellation token
//! so `Manager::close` can stop every task without polling loops leaking.
//!
//! The demultiplexer takes the perf event array *out of* each probe's
//! loaded object (`LoadedProbe::take_perf_array`) but the Manager keeps
//! owning the `LoadedProbe` itself — its uprobe attachments must stay live
//! for the probe to keep producing records, and `unload` still needs it at
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use aya::maps::perf::PerfEventArrayBuffer;
use aya::maps::MapData;
use aya::util::online_cpus;
use bytes::BytesMut;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::probe::catalog::ProbeKind;
use crate::probe::loader::LoadedProbe;
use crate::probe::Probe;
use crate::ring_buffer::SpanRingBuffer;
use crate::span::InstrumentationScope;
use crate::stats::StatsTracker;

pub const EVENTS_MAP_NAME: &str = "events";
const PERF_BUFFER_PAGES: usize = 64;
const POLL_IDLE_SLEEP: Duration = Duration::from_millis(5);
const OUT_BUFFERS_PER_POLL: usize = 16;

/// One probe's per-CPU perf buffers plus the probe logic needed to decode
/// and convert its records.
struct ProbeRing {
    probe: Arc<ProbeKind>,
    scope: InstrumentationScope,
    buffers: Vec<PerfEventArrayBuffer<MapData>>,
}

/// Owns every probe's polling tasks and drives them to completion.
pub struct Demultiplexer {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// One probe's catalog entry and instrumentation scope, paired up before
/// the demultiplexer opens its perf buffers. `loaded` is borrowed mutably
/// just long enough to take its perf map; ownership stays with the caller.
pub struct ProbeSource<'a> {
    pub probe: Arc<ProbeKind>,
    pub scope: InstrumentationScope,
    pub loaded: &'a mut LoadedProbe,
}

impl Demultiplexer {
    /// Opens per-CPU perf buffers for every probe source and spawns one
    /// polling task each, forwarding decoded spans into `sink` and counting
    /// outcomes in `stats`.
    pub fn start(
        sources: Vec<ProbeSource<'_>>,
        sink: Arc<SpanRingBuffer>,
        stats: Arc<Mutex<StatsTracker>>,
    ) -> Result<Self, AgentError> {
        let cpus = online_cpus()
            .map_err(|e| AgentError::LoadFailed(format!("enumerating online CPUs: {e:?}")))?;
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        for source in sources {
            let mut perf_array = source.loaded.take_perf_array(EVENTS_MAP_NAME)?;
            let mut buffers = Vec::with_capacity(cpus.len());
            for cpu_id in &cpus {
                let buf = perf_array
                    .open(*cpu_id, Some(PERF_BUFFER_PAGES))
                    .map_err(|e| AgentError::LoadFailed(format!("opening perf buffer: {e}")))?;
                buffers.push(buf);
            }

            let ring = ProbeRing {
                probe: source.probe,
                scope: source.scope,
                buffers,
            };
            let probe_name = ring.probe.catalog_name().to_string();
            let sink = sink.clone();
            let stats = stats.clone();
            let cancel = cancel.clone();

            tasks.push(tokio::spawn(async move {
                poll_ring(ring, probe_name, sink, stats, cancel).await;
            }));
        }

        Ok(Self { cancel, tasks })
    }

    /// Signal every polling task to stop and wait for them to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "demultiplexer task panicked");
            }
        }
    }
}

async fn poll_ring(
    mut ring: ProbeRing,
    probe_name: String,
    sink: Arc<SpanRingBuffer>,
    stats: Arc<Mutex<StatsTracker>>,
    cancel: CancellationToken,
) {
    let mut out_bufs: [BytesMut; OUT_BUFFERS_PER_POLL] =
        std::array::from_fn(|_| BytesMut::with_capacity(512));

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut any_events = false;
        for buf in &mut ring.buffers {
            let read = match buf.read_events(&mut out_bufs) {
                Ok(read) => read,
                Err(err) => {
                    warn!(probe = %probe_name, error = %err, "perf buffer read failed");
                    continue;
                }
            };
            if read.lost > 0 {
                let mut stats = stats.lock().await;
                for _ in 0..read.lost {
                    stats.record_dropped(&probe_name);
                }
            }
            for raw in out_bufs.iter().take(read.read) {
                any_events = true;
                process_record(&ring.probe, &ring.scope, raw, &probe_name, &sink, &stats).await;
            }
        }

        if !any_events {
            tokio::select! {
                _ = tokio::time::sleep(POLL_IDLE_SLEEP) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }
    debug!(probe = %probe_name, "demultiplexer task exiting");
}

async fn process_record(
    probe: &ProbeKind,
    scope: &InstrumentationScope,
    raw: &BytesMut,
    probe_name: &str,
    sink: &Arc<SpanRingBuffer>,
    stats: &Arc<Mutex<StatsTracker>>,
) {
    if !probe.descriptor().event_layout.matches(raw.len()) {
        warn!(
            probe = %probe_name,
            expected = probe.descriptor().event_layout.total_len,
            got = raw.len(),
            "dropping record with unexpected length"
        );
        stats.lock().await.record_dropped(probe_name);
        return;
    }

    let decoded = match probe.decode_event(raw) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(probe = %probe_name, error = %err, "failed to decode probe record");
            stats.lock().await.record_dropped(probe_name);
            return;
        }
    };

    let spans = probe.to_spans(&decoded, scope);
    let mut stats = stats.lock().await;
    for span in spans {
        stats.record_processed(probe_name);
        sink.push(span);
    }
}
