//! Load metrics aggregation and bandwidth estimation
//!
//! Aggregates are kept in-process for `MetricsCollector::snapshot` and are
//! also forwarded to the `metrics` facade, so a host that installs a
//! recorder (for example the Prometheus exporter) gets them for free.

use crate::{Clock, FetchErrorKind, LoadAttemptResult};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bandwidth measurement sample
#[derive(Debug, Clone, Copy)]
struct BandwidthSample {
    bytes: u64,
    duration: Duration,
    timestamp: Instant,
}

impl BandwidthSample {
    fn bytes_per_second(&self) -> Option<f64> {
        let secs = self.duration.as_secs_f64();
        (secs > 0.0).then(|| self.bytes as f64 / secs)
    }
}

/// Sliding-window bandwidth monitor
#[derive(Debug)]
struct BandwidthMonitor {
    samples: VecDeque<BandwidthSample>,
    sample_window: Duration,
    max_samples: usize,
}

impl BandwidthMonitor {
    fn new(sample_window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            sample_window,
            max_samples,
        }
    }

    fn record(&mut self, bytes: u64, duration: Duration, now: Instant) {
        // Remove old samples
        while self
            .samples
            .front()
            .map_or(false, |s| now.saturating_duration_since(s.timestamp) > self.sample_window)
        {
            self.samples.pop_front();
        }

        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(BandwidthSample {
            bytes,
            duration,
            timestamp: now,
        });
    }

    /// Weighted moving average (more recent samples weighted higher)
    fn current_bandwidth(&self) -> f64 {
        let mut total_weight = 0.0;
        let mut weighted_sum = 0.0;

        for (i, sample) in self.samples.iter().enumerate() {
            if let Some(bps) = sample.bytes_per_second() {
                let weight = (i + 1) as f64;
                weighted_sum += bps * weight;
                total_weight += weight;
            }
        }

        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        }
    }
}

/// Point-in-time copy of the aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Every `load` call, including hits and coalesced callers
    pub total_requests: u64,
    /// Loads answered from the cache
    pub hits: u64,
    /// Loads that joined an in-flight fetch for the same id
    pub coalesced: u64,
    /// Transport calls made
    pub attempts: u64,
    /// Successful fetches per endpoint
    pub successes_by_source: BTreeMap<String, u64>,
    /// Candidates abandoned per endpoint (after retries)
    pub failures_by_source: BTreeMap<String, u64>,
    /// Candidates abandoned per final error kind
    pub failures_by_error_kind: BTreeMap<FetchErrorKind, u64>,
    /// Loads that exhausted every candidate
    pub exhausted: u64,
    /// Mean duration of loads that went to the network
    pub average_load_time_ms: f64,
    /// Recency-weighted transfer rate (bytes/sec)
    pub estimated_bandwidth_bytes: f64,
    /// Payload bytes fetched from endpoints
    pub total_bytes: u64,
}

impl MetricsSnapshot {
    /// Share of requests answered from the cache
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug)]
struct MetricsState {
    snapshot: MetricsSnapshot,
    network_loads: u64,
    network_load_time: Duration,
    bandwidth: BandwidthMonitor,
}

/// Thread-safe metrics aggregator
pub struct MetricsCollector {
    clock: Arc<dyn Clock>,
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    /// Create an empty collector
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(MetricsState {
                snapshot: MetricsSnapshot::default(),
                network_loads: 0,
                network_load_time: Duration::ZERO,
                bandwidth: BandwidthMonitor::new(Duration::from_secs(30), 32),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A `load` call was made
    pub fn record_request(&self) {
        self.lock().snapshot.total_requests += 1;
        counter!("cadence_fetch_requests_total").increment(1);
    }

    /// A `load` call was answered from the cache
    pub fn record_hit(&self) {
        self.lock().snapshot.hits += 1;
        counter!("cadence_fetch_cache_hits_total").increment(1);
    }

    /// A `load` call joined an in-flight fetch
    pub fn record_coalesced(&self) {
        self.lock().snapshot.coalesced += 1;
        counter!("cadence_fetch_coalesced_total").increment(1);
    }

    /// One transport call finished
    pub fn record_attempt(&self, endpoint: &str, attempt: &LoadAttemptResult, size_bytes: u64) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.snapshot.attempts += 1;

        if attempt.succeeded {
            *state
                .snapshot
                .successes_by_source
                .entry(endpoint.to_string())
                .or_default() += 1;
            state.snapshot.total_bytes += size_bytes;
            state.bandwidth.record(size_bytes, attempt.elapsed, now);
            drop(state);

            counter!("cadence_fetch_success_total", "source" => endpoint.to_string()).increment(1);
            counter!("cadence_fetch_bytes_total").increment(size_bytes);
        } else {
            drop(state);
            let kind = attempt.error_kind.map_or("unknown", |k| k.as_str());
            counter!(
                "cadence_fetch_attempt_failures_total",
                "source" => endpoint.to_string(),
                "kind" => kind
            )
            .increment(1);
        }

        histogram!("cadence_fetch_attempt_duration_seconds").record(attempt.elapsed.as_secs_f64());
    }

    /// A candidate was abandoned after its final failed attempt
    pub fn record_source_failure(&self, endpoint: &str, kind: FetchErrorKind) {
        let mut state = self.lock();
        *state
            .snapshot
            .failures_by_source
            .entry(endpoint.to_string())
            .or_default() += 1;
        *state.snapshot.failures_by_error_kind.entry(kind).or_default() += 1;
    }

    /// A load that went to the network completed
    pub fn record_load(&self, elapsed: Duration, succeeded: bool) {
        let mut state = self.lock();
        state.network_loads += 1;
        state.network_load_time += elapsed;
        if !succeeded {
            state.snapshot.exhausted += 1;
        }
        drop(state);

        histogram!("cadence_fetch_load_duration_seconds").record(elapsed.as_secs_f64());
        if !succeeded {
            counter!("cadence_fetch_exhausted_total").increment(1);
        }
    }

    /// Copy of the current aggregates
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let mut snapshot = state.snapshot.clone();
        snapshot.average_load_time_ms = if state.network_loads == 0 {
            0.0
        } else {
            state.network_load_time.as_secs_f64() * 1000.0 / state.network_loads as f64
        };
        snapshot.estimated_bandwidth_bytes = state.bandwidth.current_bandwidth();
        snapshot
    }
}
