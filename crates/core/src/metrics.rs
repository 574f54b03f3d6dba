// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared between the echo task and whoever supervises it.
#[derive(Debug)]
pub struct RelayMetrics {
    iterations: AtomicU64,
    idle_polls: AtomicU64,
    chunks_echoed: AtomicU64,
    chunks_dropped: AtomicU64,
    bytes_received: AtomicU64,
    bytes_transmitted: AtomicU64,
    storage_failures: AtomicU64,
    start_time: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub iterations: u64,
    pub idle_polls: u64,
    pub chunks_echoed: u64,
    pub chunks_dropped: u64,
    pub bytes_received: u64,
    pub bytes_transmitted: u64,
    pub storage_failures: u64,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            iterations: AtomicU64::new(0),
            idle_polls: AtomicU64::new(0),
            chunks_echoed: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_transmitted: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.iterations,
            &self.idle_polls,
            &self.chunks_echoed,
            &self.chunks_dropped,
            &self.bytes_received,
            &self.bytes_transmitted,
            &self.storage_failures,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    pub(crate) fn on_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_idle(&self) {
        self.idle_polls.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::SeqCst);
    }

    pub(crate) fn on_echoed(&self, transmitted: usize) {
        self.chunks_echoed.fetch_add(1, Ordering::SeqCst);
        self.bytes_transmitted
            .fetch_add(transmitted as u64, Ordering::SeqCst);
    }

    pub(crate) fn on_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_bytes_transmitted(&self) -> u64 {
        self.bytes_transmitted.load(Ordering::SeqCst)
    }

    pub fn get_chunks_echoed(&self) -> u64 {
        self.chunks_echoed.load(Ordering::SeqCst)
    }

    /// Echoed bytes per second since the metrics were created.
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_bytes_transmitted() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            iterations: self.iterations.load(Ordering::SeqCst),
            idle_polls: self.idle_polls.load(Ordering::SeqCst),
            chunks_echoed: self.chunks_echoed.load(Ordering::SeqCst),
            chunks_dropped: self.chunks_dropped.load(Ordering::SeqCst),
            bytes_received: self.bytes_received.load(Ordering::SeqCst),
            bytes_transmitted: self.bytes_transmitted.load(Ordering::SeqCst),
            storage_failures: self.storage_failures.load(Ordering::SeqCst),
        }
    }
}
