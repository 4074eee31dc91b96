//! Asset loader coordinating cache, coalescing, admission, fallback and retry

use crate::{
    AssetKind, AssetReference, CacheEntry, CacheMeta, CacheStats, CacheStore, Candidate,
    CircuitBreakerRegistry, CircuitBreakerState, ClientConfig, Clock, ConcurrencyGate, DecodeHook,
    EngineConfig, FetchError, FetchErrorKind, FetchedPayload, HttpTransport, MetricsCollector,
    MetricsSnapshot, Result, RetryPolicy, SourceResolver, SystemClock, Transport,
};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Record of a single transport call
#[derive(Debug, Clone, PartialEq)]
pub struct LoadAttemptResult {
    pub endpoint_name: String,
    pub succeeded: bool,
    pub elapsed: Duration,
    pub error_kind: Option<FetchErrorKind>,
}

/// Why a load produced no payload
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    /// Terminal error surfaced to the caller
    pub error: FetchError,
    /// Endpoints actually attempted, in order
    pub attempted_sources: Vec<String>,
    /// Endpoints skipped because their breaker was open
    pub skipped_sources: Vec<String>,
    /// Every transport call made, in order
    pub attempts: Vec<LoadAttemptResult>,
    /// Error of the final failed attempt, if any attempt was made
    pub last_error: Option<FetchError>,
}

impl LoadFailure {
    fn new(error: FetchError) -> Self {
        Self {
            error,
            attempted_sources: Vec::new(),
            skipped_sources: Vec::new(),
            attempts: Vec::new(),
            last_error: None,
        }
    }

    /// Terminal error kind
    pub fn kind(&self) -> FetchErrorKind {
        self.error.kind()
    }
}

/// Result of loading one asset
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    /// Asset id
    pub id: String,
    /// Payload on success
    pub payload: Option<Bytes>,
    /// Endpoint that served the payload
    pub source_used: Option<String>,
    /// Time from the start of the load to its completion
    pub elapsed: Duration,
    /// Answered from the cache
    pub from_cache: bool,
    /// Failure details
    pub error: Option<LoadFailure>,
}

impl LoadOutcome {
    fn failed(id: &str, elapsed: Duration, failure: LoadFailure) -> Self {
        Self {
            id: id.to_string(),
            payload: None,
            source_used: None,
            elapsed,
            from_cache: false,
            error: Some(failure),
        }
    }

    /// Check if successful
    pub fn is_success(&self) -> bool {
        self.payload.is_some()
    }

    /// Elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Builder for [`AssetLoader`]
pub struct AssetLoaderBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    decode_hook: Option<Arc<dyn DecodeHook>>,
}

impl AssetLoaderBuilder {
    /// Use a custom transport instead of the bundled HTTP client
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Transform audio payloads before caching
    pub fn decode_hook(mut self, hook: Arc<dyn DecodeHook>) -> Self {
        self.decode_hook = Some(hook);
        self
    }

    /// Validate the configuration and build the loader
    pub fn build(self) -> Result<AssetLoader> {
        let config = self.config;
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(ClientConfig::from(&config))?),
        };
        let clock = self.clock;

        let inner = LoaderInner {
            resolver: SourceResolver::new(config.sources.clone()),
            cache: CacheStore::new(config.cache.clone(), clock.clone()),
            breakers: CircuitBreakerRegistry::new(config.breaker.clone(), clock.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            gate: ConcurrencyGate::new(config.max_concurrent),
            metrics: MetricsCollector::new(clock.clone()),
            in_flight: DashMap::new(),
            transport,
            decode_hook: self.decode_hook,
            clock,
            config,
        };

        info!(
            "Asset loader ready: {} concurrent, cache {} bytes, primary {}, origin {}",
            inner.config.max_concurrent,
            inner.config.cache.max_size,
            inner.config.sources.primary_base,
            inner.config.sources.origin_base
        );

        Ok(AssetLoader {
            inner: Arc::new(inner),
        })
    }
}

struct LoaderInner {
    config: EngineConfig,
    resolver: SourceResolver,
    cache: CacheStore,
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
    gate: ConcurrencyGate,
    metrics: MetricsCollector,
    in_flight: DashMap<String, watch::Receiver<Option<LoadOutcome>>>,
    transport: Arc<dyn Transport>,
    decode_hook: Option<Arc<dyn DecodeHook>>,
    clock: Arc<dyn Clock>,
}

/// Clears the in-flight marker when the fetch task ends, even on panic
struct InFlightGuard {
    inner: Arc<LoaderInner>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.id);
    }
}

/// Resilient asset loader
///
/// Cheap to clone; clones share the same cache, breakers, gate and metrics.
#[derive(Clone)]
pub struct AssetLoader {
    inner: Arc<LoaderInner>,
}

impl AssetLoader {
    /// Start building a loader
    pub fn builder(config: EngineConfig) -> AssetLoaderBuilder {
        AssetLoaderBuilder {
            config,
            transport: None,
            clock: Arc::new(SystemClock),
            decode_hook: None,
        }
    }

    /// Create a loader with the given transport and the system clock
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::builder(config).transport(transport).build()
    }

    /// Load a single asset
    ///
    /// Dropping the returned future only discards this caller's interest;
    /// the underlying fetch runs to completion and still populates the cache.
    pub async fn load(&self, asset: &AssetReference) -> LoadOutcome {
        let inner = &self.inner;
        let start = inner.clock.now();
        inner.metrics.record_request();

        if let Some(entry) = inner.cache.get(&asset.id) {
            return inner.cache_hit(asset, entry, start);
        }

        let mut rx = match inner.in_flight.entry(asset.id.clone()) {
            Entry::Occupied(existing) => {
                debug!("Joining in-flight load for {}", asset.id);
                inner.metrics.record_coalesced();
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                // A fetch may have finished between the cache read and taking this slot
                if let Some(entry) = inner.cache.get(&asset.id) {
                    drop(slot);
                    return inner.cache_hit(asset, entry, start);
                }

                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());

                let guard = InFlightGuard {
                    inner: Arc::clone(inner),
                    id: asset.id.clone(),
                };
                let asset = asset.clone();
                tokio::spawn(async move {
                    let outcome = guard.inner.fetch_and_cache(&asset, start).await;
                    drop(guard);
                    tx.send_replace(Some(outcome));
                });
                rx
            }
        };

        let shared = rx.wait_for(Option::is_some).await.ok().and_then(|o| o.clone());
        shared.unwrap_or_else(|| {
            let elapsed = inner.clock.now().saturating_duration_since(start);
            LoadOutcome::failed(&asset.id, elapsed, LoadFailure::new(FetchError::Cancelled))
        })
    }

    /// Load many assets concurrently; outcomes are returned in input order
    ///
    /// Loads are spawned highest priority first. On a current-thread runtime
    /// that is also the order they reach the concurrency gate; on a
    /// multi-threaded runtime the order at the gate is best effort.
    pub async fn load_all(&self, assets: &[AssetReference]) -> Vec<LoadOutcome> {
        let mut order: Vec<usize> = (0..assets.len()).collect();
        order.sort_by_key(|&i| Reverse(assets[i].priority));

        let mut handles = Vec::with_capacity(assets.len());
        for i in order {
            let loader = self.clone();
            let asset = assets[i].clone();
            handles.push((i, tokio::spawn(async move { loader.load(&asset).await })));
        }

        let mut outcomes: Vec<Option<LoadOutcome>> = vec![None; assets.len()];
        for (i, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                warn!("Load task for {} failed: {}", assets[i].id, e);
                LoadOutcome::failed(&assets[i].id, Duration::ZERO, LoadFailure::new(FetchError::Cancelled))
            });
            outcomes[i] = Some(outcome);
        }

        outcomes.into_iter().flatten().collect()
    }

    /// Load assets in the background, yielding outcomes as they complete
    pub fn load_stream(&self, assets: Vec<AssetReference>, buffer: usize) -> mpsc::Receiver<LoadOutcome> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        for asset in assets {
            let loader = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = loader.load(&asset).await;
                let _ = tx.send(outcome).await;
            });
        }
        rx
    }

    /// Copy of the load metrics
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Drop every cached payload
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        info!("Cache cleared");
    }

    /// Drop one cached payload; returns whether it was cached
    pub fn invalidate(&self, id: &str) -> bool {
        self.inner.cache.invalidate(id)
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Direct read access to the cache
    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// Breaker snapshot for an endpoint
    pub fn breaker_state(&self, endpoint: &str) -> Option<CircuitBreakerState> {
        self.inner.breakers.state(endpoint)
    }

    /// Close every breaker
    pub fn reset_breakers(&self) {
        self.inner.breakers.reset_all();
    }

    /// Concurrency gate, for observing admission
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    /// Number of ids with a fetch currently running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Candidate endpoints the loader would try for `asset`
    pub fn candidates(&self, asset: &AssetReference) -> Vec<Candidate> {
        self.inner.resolver.resolve_candidates(asset)
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl LoaderInner {
    fn cache_hit(&self, asset: &AssetReference, entry: CacheEntry, start: Instant) -> LoadOutcome {
        self.metrics.record_hit();
        debug!("Cache hit for {} ({} bytes)", asset.id, entry.size_bytes);

        LoadOutcome {
            id: asset.id.clone(),
            payload: Some(entry.payload),
            source_used: Some(entry.source_used),
            elapsed: self.clock.now().saturating_duration_since(start),
            from_cache: true,
            error: None,
        }
    }

    /// Admission, candidate iteration and cache population for one id
    async fn fetch_and_cache(&self, asset: &AssetReference, start: Instant) -> LoadOutcome {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => return self.finish_failed(asset, start, LoadFailure::new(e)),
        };

        let candidates = self.resolver.resolve_candidates(asset);
        if candidates.is_empty() {
            let error = FetchError::Malformed(format!("no storage path in id {:?}", asset.id));
            return self.finish_failed(asset, start, LoadFailure::new(error));
        }

        let mut attempts = Vec::new();
        let mut attempted_sources = Vec::new();
        let mut skipped_sources = Vec::new();
        let mut last_error = None;

        for candidate in &candidates {
            let endpoint = candidate.endpoint_name.as_str();
            if !self.breakers.may_attempt(endpoint) {
                debug!("Circuit open for {}, skipping for {}", endpoint, asset.id);
                skipped_sources.push(endpoint.to_string());
                continue;
            }

            attempted_sources.push(endpoint.to_string());
            match self.try_candidate(asset, candidate, &mut attempts).await {
                Ok(fetched) => return self.finish_success(asset, endpoint, fetched, start),
                Err(e) => {
                    warn!("Endpoint {} failed for {}: {}", endpoint, asset.id, e);
                    self.metrics.record_source_failure(endpoint, e.kind());
                    last_error = Some(e);
                }
            }
        }

        let summary = last_error
            .as_ref()
            .map_or_else(|| "all endpoints suppressed by open circuits".to_string(), |e| e.to_string());
        let failure = LoadFailure {
            error: FetchError::AllSourcesExhausted {
                id: asset.id.clone(),
                last_error: summary,
            },
            attempted_sources,
            skipped_sources,
            attempts,
            last_error,
        };
        self.finish_failed(asset, start, failure)
    }

    /// Attempt one candidate, retrying per policy
    async fn try_candidate(
        &self,
        asset: &AssetReference,
        candidate: &Candidate,
        attempts: &mut Vec<LoadAttemptResult>,
    ) -> std::result::Result<FetchedPayload, FetchError> {
        let endpoint = candidate.endpoint_name.as_str();
        let mut attempt_index = 0u32;

        loop {
            let started = self.clock.now();
            let result = self.attempt(asset, candidate).await;
            let elapsed = self.clock.now().saturating_duration_since(started);

            let error = match result {
                Ok(fetched) => {
                    self.breakers.record_success(endpoint);
                    let record = LoadAttemptResult {
                        endpoint_name: endpoint.to_string(),
                        succeeded: true,
                        elapsed,
                        error_kind: None,
                    };
                    self.metrics
                        .record_attempt(endpoint, &record, fetched.data.len() as u64);
                    attempts.push(record);
                    return Ok(fetched);
                }
                Err(e) => e,
            };

            // The timeout runs on tokio's timer, which the injected clock may not follow
            let elapsed = match error {
                FetchError::Timeout(_) => elapsed.max(self.config.attempt_timeout),
                _ => elapsed,
            };

            self.breakers.record_failure(endpoint);
            let record = LoadAttemptResult {
                endpoint_name: endpoint.to_string(),
                succeeded: false,
                elapsed,
                error_kind: Some(error.kind()),
            };
            self.metrics.record_attempt(endpoint, &record, 0);
            attempts.push(record);

            let decision = self.retry.should_retry(attempt_index, &error);
            if !decision.retry {
                return Err(error);
            }

            debug!(
                "Attempt {} against {} failed for {} ({}), retrying in {:?}",
                attempt_index + 1,
                endpoint,
                asset.id,
                error,
                decision.delay
            );
            self.clock.sleep(decision.delay).await;

            // The failures above may have opened this endpoint's circuit
            if !self.breakers.may_attempt(endpoint) {
                debug!("Circuit opened for {} during retries of {}", endpoint, asset.id);
                return Err(error);
            }
            attempt_index += 1;
        }
    }

    /// One transport call bounded by the per-attempt timeout
    async fn attempt(
        &self,
        asset: &AssetReference,
        candidate: &Candidate,
    ) -> std::result::Result<FetchedPayload, FetchError> {
        let timeout = self.config.attempt_timeout;
        let fetch = self.transport.fetch(&candidate.url, asset.kind.into());

        let fetched = match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(timeout.as_millis() as u64)),
        };

        if fetched.data.is_empty() {
            return Err(FetchError::Malformed(format!(
                "empty payload from {}",
                candidate.url
            )));
        }

        Ok(fetched)
    }

    fn finish_success(
        &self,
        asset: &AssetReference,
        endpoint: &str,
        fetched: FetchedPayload,
        start: Instant,
    ) -> LoadOutcome {
        let FetchedPayload {
            data,
            mut compressed,
        } = fetched;

        let payload = match (&self.decode_hook, asset.kind) {
            (Some(hook), AssetKind::Audio) => match hook.decode(asset, data.clone()) {
                Ok(decoded) => {
                    compressed = false;
                    decoded
                }
                Err(e) => {
                    warn!("Decode failed for {}, caching raw payload: {}", asset.id, e);
                    data
                }
            },
            _ => data,
        };

        let meta = CacheMeta::new(endpoint).with_compressed(compressed);
        self.cache.put(&asset.id, payload.clone(), meta);

        let elapsed = self.clock.now().saturating_duration_since(start);
        self.metrics.record_load(elapsed, true);
        debug!(
            "Loaded {} from {} ({} bytes in {:?})",
            asset.id,
            endpoint,
            payload.len(),
            elapsed
        );

        LoadOutcome {
            id: asset.id.clone(),
            payload: Some(payload),
            source_used: Some(endpoint.to_string()),
            elapsed,
            from_cache: false,
            error: None,
        }
    }

    fn finish_failed(&self, asset: &AssetReference, start: Instant, failure: LoadFailure) -> LoadOutcome {
        let elapsed = self.clock.now().saturating_duration_since(start);
        self.metrics.record_load(elapsed, false);
        warn!(
            "Failed to load {} after trying {:?}: {}",
            asset.id, failure.attempted_sources, failure.error
        );
        LoadOutcome::failed(&asset.id, elapsed, failure)
    }
}
