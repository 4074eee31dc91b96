//! Resilient Asset Fetch & Cache Engine
//!
//! Loads audio and note-sequence payloads identified by an
//! [`AssetReference`], trying a primary distribution endpoint (CDN) first
//! and falling back to the origin store:
//!
//! - **Caching**: size-bounded LRU cache with max-age expiry
//! - **Coalescing**: concurrent loads of one id share a single fetch
//! - **Concurrency Gate**: FIFO admission bounds simultaneous fetches
//! - **Circuit Breakers**: failing endpoints are skipped for a cooldown
//! - **Retry with Backoff**: capped exponential delays with jitter
//! - **Metrics**: hits, per-source outcomes, load time and bandwidth
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        AssetLoader                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐      │
//! │  │  CacheStore  │ -> │  In-flight   │ -> │ Concurrency  │      │
//! │  │  (LRU, TTL)  │    │  (coalesce)  │    │    Gate      │      │
//! │  └──────────────┘    └──────────────┘    └──────────────┘      │
//! │                                                 ↓               │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐      │
//! │  │   Source     │ -> │   Circuit    │ -> │  Transport   │      │
//! │  │   Resolver   │    │   Breakers   │    │  + Retry     │      │
//! │  └──────────────┘    └──────────────┘    └──────────────┘      │
//! │                                                 ↓               │
//! │                                          ┌──────────────┐      │
//! │                                          │   Metrics    │      │
//! │                                          └──────────────┘      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cadence_fetch::prelude::*;
//!
//! # async fn run() -> cadence_fetch::Result<()> {
//! let loader = AssetLoader::builder(EngineConfig::default()).build()?;
//! let outcome = loader
//!     .load(&AssetReference::new("bass/low-e.wav", "bass-sample"))
//!     .await;
//! if let Some(payload) = outcome.payload {
//!     println!("{} bytes from {:?}", payload.len(), outcome.source_used);
//! }
//! # Ok(())
//! # }
//! ```

mod asset;
mod breaker;
mod cache;
mod client;
mod clock;
mod config;
mod error;
mod gate;
mod loader;
mod metrics;
mod resolver;
mod retry;
mod transport;

pub use asset::{AssetCategory, AssetKind, AssetReference, Priority};
pub use breaker::{BreakerConfig, CircuitBreakerRegistry, CircuitBreakerState};
pub use cache::{CacheConfig, CacheEntry, CacheMeta, CacheStats, CacheStore};
pub use client::{ClientConfig, HttpTransport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, RetryConfig, SourceConfig};
pub use error::{EngineError, FetchError, FetchErrorKind, Result};
pub use gate::{ConcurrencyGate, GatePermit};
pub use loader::{AssetLoader, AssetLoaderBuilder, LoadAttemptResult, LoadFailure, LoadOutcome};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use resolver::{Candidate, SourceResolver};
pub use retry::{RetryDecision, RetryPolicy};
pub use transport::{AcceptHint, DecodeHook, FetchedPayload, Transport};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        AssetCategory, AssetKind, AssetLoader, AssetReference, EngineConfig, LoadOutcome,
        Priority, Result, Transport,
    };
}
