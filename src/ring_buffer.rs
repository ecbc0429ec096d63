//! Lock-free ring buffer for span export (Toyota Way: Heijunka).
//!
//! Decouples the hot path (the event demultiplexer forwarding span records)
//! from the cold path (OTLP export I/O). The demultiplexer only enqueues;
//! a dedicated sidecar thread drains batches and hands them to the exporter.
//!
//! ```text
//! DEMULTIPLEXER THREAD (hot path)
//!   ring read → assemble → ring_buffer.push()
//!
//! SIDECAR THREAD (cold path)
//!   loop { batch = ring_buffer.drain(100); exporter.export_batch(batch); }
//! ```

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

use crate::span::SpanRecord;

/// Receives drained batches on the sidecar thread. Implemented by the OTLP
/// exporter; kept as a trait so tests can substitute a recording stub.
pub trait SpanBatchSink: Send + Sync + 'static {
    fn export_batch(&self, batch: &[SpanRecord]);
}

/// Lock-free ring buffer with a sidecar export thread.
pub struct SpanRingBuffer {
    queue: Arc<ArrayQueue<SpanRecord>>,
    sidecar_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    total_pushed: Arc<AtomicU64>,
    total_dropped: Arc<AtomicU64>,
}

impl SpanRingBuffer {
    /// Create a new ring buffer with the given capacity, backed by `sink`
    /// for batched export.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize, sink: Arc<dyn SpanBatchSink>) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be > 0");

        let queue = Arc::new(ArrayQueue::new(capacity));
        let shutdown = Arc::new(AtomicBool::new(false));
        let total_pushed = Arc::new(AtomicU64::new(0));
        let total_dropped = Arc::new(AtomicU64::new(0));

        let queue_clone = queue.clone();
        let shutdown_clone = shutdown.clone();
        let sidecar_handle = thread::spawn(move || {
            Self::sidecar_worker(queue_clone, shutdown_clone, sink);
        });

        Self {
            queue,
            sidecar_handle: Some(sidecar_handle),
            shutdown,
            total_pushed,
            total_dropped,
        }
    }

    /// Enqueue a span record (hot path). If the buffer is full the record
    /// is dropped rather than blocking the demultiplexer — pending records
    /// at shutdown are still drained (spec §5 "Cancellation").
    pub fn push(&self, span: SpanRecord) {
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        if let Err(_dropped) = self.queue.push(span) {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            warn!("span ring buffer full, span dropped");
        }
    }

    /// Signal shutdown and wait for the sidecar thread to drain and exit.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sidecar_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    fn sidecar_worker(queue: Arc<ArrayQueue<SpanRecord>>, shutdown: Arc<AtomicBool>, sink: Arc<dyn SpanBatchSink>) {
        const BATCH_SIZE: usize = 100;
        const IDLE_SLEEP: Duration = Duration::from_millis(10);

        let mut batch = Vec::with_capacity(BATCH_SIZE);
        loop {
            if shutdown.load(Ordering::SeqCst) {
                while let Some(span) = queue.pop() {
                    batch.push(span);
                    if batch.len() >= BATCH_SIZE {
                        sink.export_batch(&batch);
                        batch.clear();
                    }
                }
                if !batch.is_empty() {
                    sink.export_batch(&batch);
                }
                break;
            }

            while let Some(span) = queue.pop() {
                batch.push(span);
                if batch.len() >= BATCH_SIZE {
                    break;
                }
            }

            if !batch.is_empty() {
                sink.export_batch(&batch);
                batch.clear();
            } else {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
}

impl Drop for SpanRingBuffer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sidecar_handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferStats {
    pub total_pushed: u64,
    pub total_dropped: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl BufferStats {
    pub fn drop_rate(&self) -> f64 {
        if self.total_pushed == 0 {
            0.0
        } else {
            self.total_dropped as f64 / self.total_pushed as f64
        }
    }

    pub fn utilization(&self) -> f64 {
        self.current_size as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{InstrumentationScope, SpanContext, SpanKind, Status};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct RecordingSink {
        received: Mutex<Vec<SpanRecord>>,
    }

    impl SpanBatchSink for RecordingSink {
        fn export_batch(&self, batch: &[SpanRecord]) {
            self.received.lock().unwrap().extend_from_slice(batch);
        }
    }

    fn sample_span(byte: u8) -> SpanRecord {
        SpanRecord {
            name: format!("span_{byte}"),
            kind: SpanKind::Internal,
            start_unix_nano: 1000,
            end_unix_nano: 2000,
            context: SpanContext {
                trace_id: [byte; 16],
                span_id: [byte; 8],
                flags: 1,
                remote: false,
            },
            parent_span_id: None,
            attributes: HashMap::new(),
            status: Status::Ok,
            events: Vec::new(),
            links: Vec::new(),
            scope: InstrumentationScope {
                name: "otel-auto-agent".into(),
                version: "0.1.0".into(),
                schema_url: String::new(),
            },
        }
    }

    #[test]
    fn new_buffer_starts_empty() {
        let sink = Arc::new(RecordingSink { received: Mutex::new(Vec::new()) });
        let buffer = SpanRingBuffer::new(1024, sink);
        let stats = buffer.stats();
        assert_eq!(stats.capacity, 1024);
        assert_eq!(stats.total_pushed, 0);
        buffer.shutdown();
    }

    #[test]
    #[should_panic(expected = "ring buffer capacity must be > 0")]
    fn zero_capacity_panics() {
        let sink = Arc::new(RecordingSink { received: Mutex::new(Vec::new()) });
        let _ = SpanRingBuffer::new(0, sink);
    }

    #[test]
    fn pushed_spans_eventually_reach_the_sink() {
        let sink = Arc::new(RecordingSink { received: Mutex::new(Vec::new()) });
        let buffer = SpanRingBuffer::new(64, sink.clone());
        for i in 0..5u8 {
            buffer.push(sample_span(i));
        }
        buffer.shutdown();
        assert_eq!(sink.received.lock().unwrap().len(), 5);
    }

    #[test]
    fn drop_rate_and_utilization_are_computed_correctly() {
        let stats = BufferStats {
            total_pushed: 100,
            total_dropped: 5,
            current_size: 50,
            capacity: 1024,
        };
        assert_eq!(stats.drop_rate(), 0.05);
        assert_eq!(stats.utilization(), 50.0 / 1024.0);
    }
}
