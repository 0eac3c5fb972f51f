use crate::bucket::{BucketParams, BucketState, ConsumeOutcome, FeedOutcome};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Abstract storage interface for shared bucket state.
///
/// Implementations must execute `feed` and `consume` as a **single atomic
/// conditional read-modify-write**: the guard predicate and the mutation
/// commit together, the way a MongoDB conditional `findOneAndUpdate` or a
/// Redis script would. That single-step check-and-set is what lets any number
/// of independent processes share one bucket without a distributed lock.
///
/// The store's own clock is authoritative for the `next_feed` guard. Callers
/// never pass in a timestamp.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Error type for storage operations (connectivity, not contention).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Idempotent upsert of the bucket document.
    ///
    /// On insert, seeds `count = initial` and `next_feed = now`. If the
    /// document already exists, only `rate`/`limit`/`initial` are refreshed;
    /// `count` and `next_feed` are left untouched so state survives restarts.
    async fn init(&self, params: &BucketParams) -> Result<(), Self::Error>;

    /// One conditional replenishment attempt.
    ///
    /// Iff the stored `next_feed` is not in the future: clamp
    /// `count + tokens` to the limit and push `next_feed` forward by
    /// `window`. Otherwise the update matches nothing and reports
    /// [`FeedOutcome::Throttled`] — also the answer for a missing bucket.
    async fn feed(&self, id: &str, tokens: u64, window: Duration)
        -> Result<FeedOutcome, Self::Error>;

    /// One conditional debit attempt.
    ///
    /// Decrements `count` by `tokens` iff `count >= tokens`; otherwise no
    /// mutation occurs and the outcome is [`ConsumeOutcome::Denied`] — also
    /// the answer for a missing bucket.
    async fn consume(&self, id: &str, tokens: u64) -> Result<ConsumeOutcome, Self::Error>;

    /// Fetch the current document, if any. Observability only; never used
    /// for read-then-write sequences.
    async fn load(&self, id: &str) -> Result<Option<BucketState>, Self::Error>;
}

/// In-process reference backend.
///
/// A mutex around the map makes each operation atomic within one process;
/// it models the conditional-update semantics a distributed backend must
/// provide, and backs the concurrency tests.
#[derive(Debug, Clone)]
pub struct MemoryBucketStore {
    data: Arc<Mutex<HashMap<String, BucketState>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Build the store around a caller-supplied clock (tests use
    /// [`crate::clock::ManualClock`] to step past throttle windows).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock }
    }
}

impl Default for MemoryBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    type Error = std::convert::Infallible;

    async fn init(&self, params: &BucketParams) -> Result<(), Self::Error> {
        let mut guard = self.data.lock().unwrap();
        match guard.get_mut(&params.id) {
            Some(existing) => {
                existing.rate = params.rate;
                existing.limit = params.limit;
                existing.initial = params.initial;
            }
            None => {
                let now = self.clock.now_millis();
                guard.insert(
                    params.id.clone(),
                    BucketState {
                        id: params.id.clone(),
                        rate: params.rate,
                        limit: params.limit,
                        initial: params.initial,
                        count: params.initial,
                        next_feed_millis: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn feed(
        &self,
        id: &str,
        tokens: u64,
        window: Duration,
    ) -> Result<FeedOutcome, Self::Error> {
        let mut guard = self.data.lock().unwrap();
        let Some(state) = guard.get_mut(id) else {
            return Ok(FeedOutcome::Throttled);
        };
        let now = self.clock.now_millis();
        if state.next_feed_millis > now {
            return Ok(FeedOutcome::Throttled);
        }
        let fed = state.count.saturating_add(tokens);
        state.count = match state.limit {
            Some(limit) => fed.min(limit),
            None => fed,
        };
        state.next_feed_millis =
            now.saturating_add(u64::try_from(window.as_millis()).unwrap_or(u64::MAX));
        Ok(FeedOutcome::Replenished { count: state.count })
    }

    async fn consume(&self, id: &str, tokens: u64) -> Result<ConsumeOutcome, Self::Error> {
        let mut guard = self.data.lock().unwrap();
        let Some(state) = guard.get_mut(id) else {
            return Ok(ConsumeOutcome::Denied);
        };
        if state.count < tokens {
            return Ok(ConsumeOutcome::Denied);
        }
        state.count -= tokens;
        Ok(ConsumeOutcome::Granted { remaining: state.count })
    }

    async fn load(&self, id: &str) -> Result<Option<BucketState>, Self::Error> {
        let guard = self.data.lock().unwrap();
        Ok(guard.get(id).cloned())
    }
}
