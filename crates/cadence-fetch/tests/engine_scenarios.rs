//! End-to-end loader scenarios against a scripted transport.
//!
//! Covers the behaviors callers depend on:
//! - Concurrent loads of one id share a single fetch
//! - Primary failures fall back to the origin store
//! - Cached payloads are served without touching the network
//! - Open circuits skip endpoints until their cooldown elapses
//! - Slow attempts are cut off by the per-attempt timeout
//! - Abandoned loads still finish and populate the cache

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_fetch::{
    AcceptHint, AssetKind, AssetLoader, AssetReference, BreakerConfig, EngineConfig, FetchError,
    FetchErrorKind, FetchedPayload, ManualClock, Priority, RetryConfig, Transport,
};

const PRIMARY: &str = "https://cdn.cadence.audio";

type Responder = Box<dyn Fn(&str) -> Result<FetchedPayload, FetchError> + Send + Sync>;

/// Transport with one scripted responder per endpoint and a call log.
struct FakeTransport {
    primary: Responder,
    origin: Responder,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, AcceptHint)>>,
}

impl FakeTransport {
    fn new(primary: Responder, origin: Responder) -> Self {
        Self {
            primary,
            origin,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
    }

    fn primary_calls(&self) -> usize {
        self.calls().iter().filter(|url| url.starts_with(PRIMARY)).count()
    }

    fn origin_calls(&self) -> usize {
        self.calls().len() - self.primary_calls()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, url: &str, accept: AcceptHint) -> Result<FetchedPayload, FetchError> {
        self.calls.lock().unwrap().push((url.to_string(), accept));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if url.starts_with(PRIMARY) {
            (self.primary)(url)
        } else {
            (self.origin)(url)
        }
    }
}

fn serve(size: usize) -> Responder {
    Box::new(move |_| Ok(FetchedPayload::new(vec![7u8; size])))
}

fn fail(error: FetchError) -> Responder {
    Box::new(move |_| Err(error.clone()))
}

fn config() -> EngineConfig {
    EngineConfig::default().with_retry(RetryConfig {
        max_attempts: 3,
        jitter: false,
        ..Default::default()
    })
}

fn build(config: EngineConfig, transport: Arc<FakeTransport>) -> (AssetLoader, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let loader = AssetLoader::builder(config)
        .transport(transport)
        .clock(clock.clone())
        .build()
        .expect("valid config");
    (loader, clock)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_loads_share_one_fetch() {
    let transport = Arc::new(FakeTransport::new(serve(512), serve(512)).with_delay(Duration::from_millis(100)));
    let (loader, _) = build(config(), transport.clone());
    let asset = AssetReference::new("loops/groove.mid", "rhythm-track").with_kind(AssetKind::NoteSequence);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let loader = loader.clone();
            let asset = asset.clone();
            tokio::spawn(async move { loader.load(&asset).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    assert_eq!(transport.calls().len(), 1);
    let first = &outcomes[0];
    for outcome in &outcomes {
        assert_eq!(outcome.payload, first.payload);
        assert_eq!(outcome.source_used.as_deref(), Some("primary"));
        assert!(!outcome.from_cache);
    }

    let snapshot = loader.metrics_snapshot();
    assert_eq!(snapshot.total_requests, 8);
    assert_eq!(snapshot.coalesced, 7);
    assert_eq!(loader.in_flight(), 0);
    assert_eq!(transport.calls.lock().unwrap()[0].1, AcceptHint::NoteSequence);
}

#[tokio::test]
async fn test_primary_failure_falls_back_to_origin() {
    let transport = Arc::new(FakeTransport::new(
        fail(FetchError::Connection("connection reset".into())),
        serve(256),
    ));
    let (loader, clock) = build(config(), transport.clone());

    let outcome = loader.load(&AssetReference::new("amb/rain.wav", "ambience")).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.source_used.as_deref(), Some("origin"));
    assert_eq!(transport.primary_calls(), 3);
    assert_eq!(transport.origin_calls(), 1);

    // Primary is always tried before origin
    let calls = transport.calls();
    assert!(calls[..3].iter().all(|url| url.starts_with(PRIMARY)));
    assert_eq!(calls[3], "https://storage.googleapis.com/cadence-ambience/amb/rain.wav");

    // Backoff of 100ms then 200ms was spent on the injected clock
    assert_eq!(clock.elapsed(), Duration::from_millis(300));

    let snapshot = loader.metrics_snapshot();
    assert_eq!(snapshot.failures_by_source.get("primary"), Some(&1));
    assert_eq!(snapshot.successes_by_source.get("origin"), Some(&1));
    assert_eq!(
        snapshot.failures_by_error_kind.get(&FetchErrorKind::TransportFailure),
        Some(&1)
    );
    assert_eq!(snapshot.attempts, 4);
}

#[tokio::test]
async fn test_bass_sample_from_origin_then_cache() {
    let transport = Arc::new(FakeTransport::new(
        fail(FetchError::Http {
            status: 503,
            message: "unavailable".into(),
        }),
        serve(2048),
    ));
    let cfg = config().with_retry(RetryConfig {
        max_attempts: 1,
        ..Default::default()
    });
    let (loader, _) = build(cfg, transport.clone());
    let asset = AssetReference::new("bass/low-e.wav", "bass-sample");

    let first = loader.load(&asset).await;
    assert_eq!(first.source_used.as_deref(), Some("origin"));
    assert_eq!(first.payload.as_ref().map(|p| p.len()), Some(2048));
    assert!(!first.from_cache);
    assert!(transport
        .calls()
        .iter()
        .all(|url| url.contains("/cadence-bass-samples/bass/low-e.wav")));

    let second = loader.load(&asset).await;
    assert!(second.from_cache);
    assert_eq!(second.elapsed, Duration::ZERO);
    assert_eq!(second.payload, first.payload);
    assert_eq!(second.source_used.as_deref(), Some("origin"));
    assert_eq!(transport.calls().len(), 2);

    let snapshot = loader.metrics_snapshot();
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.total_bytes, 2048);
}

#[tokio::test]
async fn test_not_found_everywhere_is_exhausted() {
    let transport = Arc::new(FakeTransport::new(
        fail(FetchError::NotFound("missing".into())),
        fail(FetchError::Http {
            status: 404,
            message: String::new(),
        }),
    ));
    let (loader, _) = build(config(), transport.clone());

    let outcome = loader.load(&AssetReference::new("drums/ghost.wav", "percussion-sample")).await;

    assert!(outcome.payload.is_none());
    let failure = outcome.error.expect("failure details");
    assert_eq!(failure.kind(), FetchErrorKind::AllSourcesExhausted);
    assert_eq!(failure.attempted_sources, vec!["primary", "origin"]);
    assert!(failure.skipped_sources.is_empty());
    assert_eq!(failure.attempts.len(), 2);
    assert_eq!(failure.last_error.map(|e| e.kind()), Some(FetchErrorKind::NotFound));

    // Not found is never retried and never cached
    assert_eq!(transport.calls().len(), 2);
    assert!(!loader.cache().contains("drums/ghost.wav"));

    let snapshot = loader.metrics_snapshot();
    assert_eq!(snapshot.failures_by_error_kind.get(&FetchErrorKind::NotFound), Some(&2));
    assert_eq!(snapshot.exhausted, 1);
}

#[tokio::test]
async fn test_repeated_loads_touch_cache_once_each() {
    let transport = Arc::new(FakeTransport::new(serve(128), serve(128)));
    let (loader, _) = build(config(), transport.clone());
    let asset = AssetReference::new("amb/wind.wav", "ambience");

    loader.load(&asset).await;
    let mut previous = loader.cache().peek("amb/wind.wav").unwrap().access_count;

    for _ in 0..5 {
        let outcome = loader.load(&asset).await;
        assert!(outcome.from_cache);
        let count = loader.cache().peek("amb/wind.wav").unwrap().access_count;
        assert_eq!(count, previous + 1);
        previous = count;
    }

    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_open_breaker_skips_primary_until_cooldown() {
    let primary_up = Arc::new(AtomicBool::new(false));
    let up = primary_up.clone();
    let primary: Responder = Box::new(move |_| {
        if up.load(Ordering::SeqCst) {
            Ok(FetchedPayload::new(vec![1u8; 32]))
        } else {
            Err(FetchError::Connection("refused".into()))
        }
    });
    let transport = Arc::new(FakeTransport::new(primary, serve(32)));
    let cfg = config()
        .with_retry(RetryConfig {
            max_attempts: 1,
            ..Default::default()
        })
        .with_breaker(BreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(30),
        });
    let (loader, clock) = build(cfg, transport.clone());

    loader.load(&AssetReference::new("a.wav", "ambience")).await;
    loader.load(&AssetReference::new("b.wav", "ambience")).await;
    assert!(loader.breaker_state("primary").unwrap().is_open);
    assert_eq!(transport.primary_calls(), 2);

    // Circuit open: primary is not contacted at all
    let outcome = loader.load(&AssetReference::new("c.wav", "ambience")).await;
    assert_eq!(outcome.source_used.as_deref(), Some("origin"));
    assert_eq!(transport.primary_calls(), 2);

    // After the cooldown one probe goes through and closes the circuit
    primary_up.store(true, Ordering::SeqCst);
    clock.advance(Duration::from_secs(30));
    let outcome = loader.load(&AssetReference::new("d.wav", "ambience")).await;
    assert_eq!(outcome.source_used.as_deref(), Some("primary"));
    assert_eq!(transport.primary_calls(), 3);
    assert!(!loader.breaker_state("primary").unwrap().is_open);
}

#[tokio::test]
async fn test_skipped_sources_are_reported() {
    let origin_up = Arc::new(AtomicBool::new(true));
    let up = origin_up.clone();
    let origin: Responder = Box::new(move |_| {
        if up.load(Ordering::SeqCst) {
            Ok(FetchedPayload::new(vec![1u8; 32]))
        } else {
            Err(FetchError::NotFound("missing".into()))
        }
    });
    let transport = Arc::new(FakeTransport::new(
        fail(FetchError::Connection("refused".into())),
        origin,
    ));
    let cfg = config()
        .with_retry(RetryConfig {
            max_attempts: 1,
            ..Default::default()
        })
        .with_breaker(BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
    let (loader, _) = build(cfg, transport.clone());

    assert!(loader.load(&AssetReference::new("a.wav", "ambience")).await.is_success());
    assert!(loader.breaker_state("primary").unwrap().is_open);

    origin_up.store(false, Ordering::SeqCst);
    let outcome = loader.load(&AssetReference::new("b.wav", "ambience")).await;

    let failure = outcome.error.unwrap();
    assert_eq!(failure.skipped_sources, vec!["primary"]);
    assert_eq!(failure.attempted_sources, vec!["origin"]);
    assert_eq!(transport.primary_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_attempt_times_out() {
    let transport = Arc::new(FakeTransport::new(serve(64), serve(64)).with_delay(Duration::from_secs(60)));
    let cfg = config()
        .with_attempt_timeout(Duration::from_secs(1))
        .with_retry(RetryConfig {
            max_attempts: 1,
            ..Default::default()
        });
    let (loader, _) = build(cfg, transport.clone());

    let outcome = loader.load(&AssetReference::new("slow.wav", "ambience")).await;

    let failure = outcome.error.unwrap();
    assert_eq!(failure.attempted_sources, vec!["primary", "origin"]);
    assert!(failure
        .attempts
        .iter()
        .all(|a| a.error_kind == Some(FetchErrorKind::Timeout)));
    // Recorded at the full timeout even though the injected clock never moved
    assert!(failure
        .attempts
        .iter()
        .all(|a| a.elapsed == Duration::from_secs(1)));
    assert_eq!(failure.last_error, Some(FetchError::Timeout(1000)));
    assert_eq!(loader.in_flight(), 0);
}

#[tokio::test]
async fn test_load_all_preserves_input_order() {
    let transport = Arc::new(FakeTransport::new(serve(16), serve(16)));
    let (loader, _) = build(config().with_max_concurrent(1), transport.clone());

    let assets = vec![
        AssetReference::new("low.wav", "ambience").with_priority(Priority::Low),
        AssetReference::new("high.wav", "ambience").with_priority(Priority::High),
        AssetReference::new("", "ambience"),
    ];

    let outcomes = loader.load_all(&assets).await;

    let ids: Vec<_> = outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["low.wav", "high.wav", ""]);
    assert!(outcomes[0].is_success());
    assert!(outcomes[1].is_success());
    assert_eq!(outcomes[2].error.as_ref().map(|f| f.kind()), Some(FetchErrorKind::Malformed));

    // Only one fetch at a time, and the high-priority one went first
    assert_eq!(loader.gate().peak_in_use(), 1);
    assert!(transport.calls()[0].ends_with("/high.wav"));
}

#[tokio::test]
async fn test_load_stream_yields_every_outcome() {
    let transport = Arc::new(FakeTransport::new(serve(16), serve(16)));
    let (loader, _) = build(config(), transport);

    let assets: Vec<_> = (0..5)
        .map(|i| AssetReference::new(format!("perc/{i}.wav"), "percussion-sample"))
        .collect();
    let mut rx = loader.load_stream(assets, 2);

    let mut ids = Vec::new();
    while let Some(outcome) = rx.recv().await {
        assert!(outcome.is_success());
        ids.push(outcome.id);
    }
    ids.sort();

    assert_eq!(ids.len(), 5);
    assert_eq!(ids[0], "perc/0.wav");
    assert_eq!(loader.cache_stats().entries, 5);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let transport = Arc::new(FakeTransport::new(serve(16), serve(16)));
    let (loader, _) = build(config(), transport.clone());
    let asset = AssetReference::new("a.wav", "ambience");

    loader.load(&asset).await;
    assert!(loader.invalidate("a.wav"));
    assert!(!loader.invalidate("a.wav"));

    let outcome = loader.load(&asset).await;
    assert!(!outcome.from_cache);
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn test_breaker_opening_mid_retry_moves_to_origin() {
    let transport = Arc::new(FakeTransport::new(
        fail(FetchError::Connection("refused".into())),
        serve(64),
    ));
    let cfg = config()
        .with_retry(RetryConfig {
            max_attempts: 5,
            jitter: false,
            ..Default::default()
        })
        .with_breaker(BreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(30),
        });
    let (loader, _) = build(cfg, transport.clone());

    let outcome = loader.load(&AssetReference::new("amb/rain.wav", "ambience")).await;

    // The second failure opens the circuit, so the remaining retries are abandoned
    assert_eq!(transport.primary_calls(), 2);
    assert_eq!(transport.origin_calls(), 1);
    assert_eq!(outcome.source_used.as_deref(), Some("origin"));
    assert!(loader.breaker_state("primary").unwrap().is_open);
    assert_eq!(loader.metrics_snapshot().failures_by_source.get("primary"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_load_still_populates_cache() {
    let transport = Arc::new(FakeTransport::new(serve(64), serve(64)).with_delay(Duration::from_millis(50)));
    let (loader, _) = build(config(), transport.clone());
    let asset = AssetReference::new("x.wav", "ambience");

    let abandoned = tokio::time::timeout(Duration::from_millis(10), loader.load(&asset)).await;
    assert!(abandoned.is_err());
    assert!(!loader.cache().contains("x.wav"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(loader.cache().contains("x.wav"));
    assert_eq!(loader.in_flight(), 0);

    let outcome = loader.load(&asset).await;
    assert!(outcome.from_cache);
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_coalesced_callers_share_failure() {
    let transport = Arc::new(
        FakeTransport::new(
            fail(FetchError::NotFound("missing".into())),
            fail(FetchError::NotFound("missing".into())),
        )
        .with_delay(Duration::from_millis(100)),
    );
    let (loader, _) = build(config(), transport.clone());
    let asset = AssetReference::new("drums/ghost.wav", "percussion-sample");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let loader = loader.clone();
            let asset = asset.clone();
            tokio::spawn(async move { loader.load(&asset).await })
        })
        .collect();

    let mut failures = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.payload.is_none());
        failures.push(outcome.error.expect("failure details"));
    }

    assert_eq!(transport.calls().len(), 2);
    assert!(failures.iter().all(|f| *f == failures[0]));
    assert_eq!(failures[0].kind(), FetchErrorKind::AllSourcesExhausted);
    assert_eq!(failures[0].attempted_sources, vec!["primary", "origin"]);
    assert_eq!(loader.metrics_snapshot().coalesced, 3);
    assert_eq!(loader.in_flight(), 0);
}
