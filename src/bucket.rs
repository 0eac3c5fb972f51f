//! Distributed token bucket.
//!
//! A bucket is a persisted counter shared by any number of process
//! instances: a *feed* adds tokens up to the limit, a *consume* debits them,
//! and every mutation is one atomic conditional update executed by the
//! [`store::BucketStore`] backend. Callers gate rate-limited work on
//! [`TokenBucket::consume`] and replenish on a fixed cadence with
//! [`TokenBucket::feed`].
//!
//! # Architecture
//!
//! - **Front-end**: [`TokenBucket`] holds the configured parameters and the
//!   replenishment window; it contains no mutable state of its own.
//! - **Storage**: [`store::BucketStore`] owns the shared [`BucketState`] and
//!   the atomicity guarantee; [`store::MemoryBucketStore`] is the in-process
//!   reference backend.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub mod store;

use store::BucketStore;

/// The persisted bucket document, one per bucket name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Stable identifier, derived from the configured name.
    pub id: String,
    /// Configured tokens-per-second intent.
    pub rate: f64,
    /// Upper bound on stored tokens; `None` means unbounded.
    pub limit: Option<u64>,
    /// Token count seeded on first creation.
    pub initial: u64,
    /// Current balance. Never exceeds `limit`, never goes negative.
    pub count: u64,
    /// Epoch millis before which replenishment is refused. Persisted as
    /// `nextFeed`, matching the shared document schema.
    #[serde(rename = "nextFeed")]
    pub next_feed_millis: u64,
}

/// Configured parameters written by [`BucketStore::init`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketParams {
    pub id: String,
    pub rate: f64,
    pub limit: Option<u64>,
    pub initial: u64,
}

/// Bucket settings supplied at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketConfig {
    /// Bucket name; the persisted id is `"{name}.bucket"`.
    pub name: String,
    /// Tokens per second the bucket should replenish at. Must be positive.
    pub rate: f64,
    /// Maximum stored tokens; `None` means unbounded.
    pub limit: Option<u64>,
    /// Tokens seeded when the bucket document is first created.
    pub initial: u64,
    /// Minimum time between successful replenishments. When `None` the
    /// window is derived from `rate` (one token's worth of time), so the
    /// replenishment cadence tracks the configured rate no matter how often
    /// `feed()` is polled.
    pub window: Option<Duration>,
}

impl BucketConfig {
    pub fn new(name: impl Into<String>, rate: f64) -> Self {
        Self { name: name.into(), rate, limit: None, initial: 0, window: None }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn initial(mut self, initial: u64) -> Self {
        self.initial = initial;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// The throttle window actually enforced: explicit if set, otherwise
    /// `1/rate` seconds.
    pub fn effective_window(&self) -> Duration {
        self.window.unwrap_or_else(|| {
            Duration::try_from_secs_f64(1.0 / self.rate).unwrap_or(Duration::from_secs(1))
        })
    }
}

/// Outcome of a replenishment attempt.
///
/// Throttling is expected and frequent, not an error: redundant feeders may
/// poll faster than the bucket replenishes, and every attempt inside the
/// window is simply a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Tokens were added; `count` is the balance after clamping to the limit.
    Replenished { count: u64 },
    /// The throttle window has not elapsed (or the bucket does not exist).
    Throttled,
}

impl FeedOutcome {
    pub fn is_replenished(&self) -> bool {
        matches!(self, FeedOutcome::Replenished { .. })
    }

    /// Balance after a successful feed, if any.
    pub fn count(&self) -> Option<u64> {
        match self {
            FeedOutcome::Replenished { count } => Some(*count),
            FeedOutcome::Throttled => None,
        }
    }
}

/// Outcome of a debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The debit happened; the caller may proceed with one unit of work.
    Granted { remaining: u64 },
    /// Not enough tokens (or the bucket does not exist); nothing changed.
    Denied,
}

impl ConsumeOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, ConsumeOutcome::Granted { .. })
    }
}

/// Front-end over a shared, persisted token bucket.
///
/// Cheap to clone; all instances (in this process or any other) sharing one
/// backend and name operate on the same counter. Call [`TokenBucket::init`]
/// once before the first feed or consume — operations against a bucket that
/// was never initialized silently report no effect.
#[derive(Debug, Clone)]
pub struct TokenBucket<S> {
    store: Arc<S>,
    params: BucketParams,
    window: Duration,
}

impl<S> TokenBucket<S>
where
    S: BucketStore,
{
    pub fn new(store: S, config: &BucketConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    pub fn with_shared_store(store: Arc<S>, config: &BucketConfig) -> Self {
        Self {
            store,
            params: BucketParams {
                id: format!("{}.bucket", config.name),
                rate: config.rate,
                limit: config.limit,
                initial: config.initial,
            },
            window: config.effective_window(),
        }
    }

    /// The persisted document id.
    pub fn id(&self) -> &str {
        &self.params.id
    }

    /// Ensure the bucket document exists. Safe to call from every instance
    /// at startup; an existing document only has its configured parameters
    /// refreshed.
    pub async fn init(&self) -> Result<(), S::Error> {
        self.store.init(&self.params).await
    }

    /// Attempt one replenishment of `tokens`, clamped to the limit and
    /// gated by the throttle window.
    pub async fn feed(&self, tokens: u64) -> Result<FeedOutcome, S::Error> {
        self.store.feed(&self.params.id, tokens, self.window).await
    }

    /// Attempt to debit `tokens`. Grants iff the balance covers the debit
    /// at the moment of the atomic check.
    pub async fn consume(&self, tokens: u64) -> Result<ConsumeOutcome, S::Error> {
        self.store.consume(&self.params.id, tokens).await
    }

    /// Snapshot the persisted state, if the bucket exists.
    pub async fn state(&self) -> Result<Option<BucketState>, S::Error> {
        self.store.load(&self.params.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::store::MemoryBucketStore;
    use crate::clock::ManualClock;

    #[test]
    fn window_is_derived_from_rate_when_unset() {
        let config = BucketConfig::new("b", 5.0);
        assert_eq!(config.effective_window(), Duration::from_millis(200));

        let explicit = BucketConfig::new("b", 5.0).window(Duration::from_secs(2));
        assert_eq!(explicit.effective_window(), Duration::from_secs(2));
    }

    #[test]
    fn persisted_document_shape_matches_the_shared_schema() {
        let state = BucketState {
            id: "prices.bucket".into(),
            rate: 5.0,
            limit: Some(100),
            initial: 10,
            count: 7,
            next_feed_millis: 1_000_200,
        };
        let doc = serde_json::to_value(&state).unwrap();
        assert_eq!(
            doc,
            serde_json::json!({
                "id": "prices.bucket",
                "rate": 5.0,
                "limit": 100,
                "initial": 10,
                "count": 7,
                "nextFeed": 1_000_200
            })
        );
        let back: BucketState = serde_json::from_value(doc).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn id_carries_the_bucket_suffix() {
        let bucket = TokenBucket::new(MemoryBucketStore::new(), &BucketConfig::new("prices", 1.0));
        assert_eq!(bucket.id(), "prices.bucket");
    }

    #[tokio::test]
    async fn consume_before_init_is_denied() {
        let bucket =
            TokenBucket::new(MemoryBucketStore::new(), &BucketConfig::new("b", 1.0).initial(5));
        assert_eq!(bucket.consume(1).await.unwrap(), ConsumeOutcome::Denied);
        bucket.init().await.unwrap();
        assert!(bucket.consume(1).await.unwrap().is_granted());
    }

    #[tokio::test]
    async fn feed_then_consume_round() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryBucketStore::with_clock(clock.clone());
        let config = BucketConfig::new("b", 5.0).limit(5).initial(0);
        let bucket = TokenBucket::new(store, &config);
        bucket.init().await.unwrap();

        assert_eq!(bucket.feed(5).await.unwrap(), FeedOutcome::Replenished { count: 5 });
        assert_eq!(bucket.consume(3).await.unwrap(), ConsumeOutcome::Granted { remaining: 2 });
        assert_eq!(bucket.consume(3).await.unwrap(), ConsumeOutcome::Denied);
        assert_eq!(bucket.state().await.unwrap().unwrap().count, 2);
    }
}
