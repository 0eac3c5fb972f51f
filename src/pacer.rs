//! Periodic orchestration: a feed tick that replenishes the bucket and a
//! consume tick that, when granted, runs one unit of rate-limited work and
//! records a usage metric keyed by wall-clock second.
//!
//! The two tasks are independently scheduled and independently cancellable.
//! Multiple process instances may run the same pacer against one shared
//! bucket; the store's atomic guards keep them honest, so no coordination
//! happens here. Store errors are transient for a tick: logged, skipped,
//! retried on the next tick.

use crate::bucket::{store::BucketStore, ConsumeOutcome, FeedOutcome, TokenBucket};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// In-memory accumulator of granted consumes per epoch second.
///
/// Not authoritative; the mirror in a [`UsageSink`] may lag or be
/// recomputed.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    counts: Arc<Mutex<HashMap<u64, u64>>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the count for `second`, returning the new value.
    pub fn record(&self, second: u64) -> u64 {
        let mut guard = self.counts.lock().unwrap();
        let entry = guard.entry(second).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Copy of the accumulated counts.
    pub fn snapshot(&self) -> HashMap<u64, u64> {
        self.counts.lock().unwrap().clone()
    }

    /// Total granted consumes across all seconds.
    pub fn total(&self) -> u64 {
        self.counts.lock().unwrap().values().sum()
    }
}

/// Mirror for per-second usage counts (the original system upserts them
/// into a `counts` collection). Failures are observability losses, not
/// pacing failures.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(
        &self,
        second: u64,
        count: u64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// In-memory sink for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryUsageSink {
    counts: Arc<Mutex<HashMap<u64, u64>>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> HashMap<u64, u64> {
        self.counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageSink for MemoryUsageSink {
    async fn record(
        &self,
        second: u64,
        count: u64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.counts.lock().unwrap().insert(second, count);
        Ok(())
    }
}

/// Composition root: wires a [`TokenBucket`] to a feed cadence and a
/// consume cadence.
pub struct Pacer<S> {
    bucket: Arc<TokenBucket<S>>,
    feed_interval: Duration,
    consume_interval: Duration,
    clock: Arc<dyn Clock>,
    ledger: UsageLedger,
    sink: Option<Arc<dyn UsageSink>>,
}

impl<S> Pacer<S>
where
    S: BucketStore + 'static,
{
    pub fn new(bucket: TokenBucket<S>, feed_interval: Duration, consume_interval: Duration) -> Self {
        Self {
            bucket: Arc::new(bucket),
            feed_interval,
            consume_interval,
            clock: Arc::new(SystemClock),
            ledger: UsageLedger::new(),
            sink: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Handle to the usage accumulator; stays valid after [`Pacer::spawn`].
    pub fn ledger(&self) -> UsageLedger {
        self.ledger.clone()
    }

    /// Start both periodic tasks. `action` is the rate-limited work itself,
    /// run once per granted consume; what it does is the caller's business.
    pub fn spawn<A, Fut>(self, action: A) -> PacerHandle
    where
        A: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let feeder = tokio::spawn(Self::feed_loop(
            self.bucket.clone(),
            self.feed_interval,
            shutdown_rx.clone(),
        ));
        let consumer = tokio::spawn(Self::consume_loop(
            self.bucket,
            self.consume_interval,
            self.clock,
            self.ledger,
            self.sink,
            Arc::new(action),
            shutdown_rx,
        ));

        PacerHandle { shutdown: shutdown_tx, feeder, consumer }
    }

    async fn feed_loop(
        bucket: Arc<TokenBucket<S>>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticks = tokio::time::interval(interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticks.tick() => match bucket.feed(1).await {
                    Ok(FeedOutcome::Replenished { count }) => {
                        tracing::debug!(bucket = bucket.id(), count, "bucket replenished");
                    }
                    Ok(FeedOutcome::Throttled) => {
                        tracing::trace!(bucket = bucket.id(), "feed throttled");
                    }
                    Err(error) => {
                        tracing::warn!(bucket = bucket.id(), %error, "feed failed; will retry next tick");
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!(bucket = bucket.id(), "feed task stopped");
    }

    #[allow(clippy::too_many_arguments)]
    async fn consume_loop<A, Fut>(
        bucket: Arc<TokenBucket<S>>,
        interval: Duration,
        clock: Arc<dyn Clock>,
        ledger: UsageLedger,
        sink: Option<Arc<dyn UsageSink>>,
        action: Arc<A>,
        mut shutdown: watch::Receiver<bool>,
    ) where
        A: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut ticks = tokio::time::interval(interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticks.tick() => match bucket.consume(1).await {
                    Ok(ConsumeOutcome::Granted { remaining }) => {
                        tracing::debug!(bucket = bucket.id(), remaining, "consume granted");
                        action().await;
                        let second = clock.now_second();
                        let count = ledger.record(second);
                        if let Some(sink) = &sink {
                            if let Err(error) = sink.record(second, count).await {
                                tracing::warn!(%error, second, "usage mirror failed");
                            }
                        }
                    }
                    Ok(ConsumeOutcome::Denied) => {
                        tracing::trace!(bucket = bucket.id(), "consume denied");
                    }
                    Err(error) => {
                        tracing::warn!(bucket = bucket.id(), %error, "consume failed; will retry next tick");
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!(bucket = bucket.id(), "consume task stopped");
    }
}

/// Handle over the two running tasks.
///
/// The handle owns the shutdown channel: dropping it closes the channel and
/// both tasks exit after their current tick, exactly as if
/// [`PacerHandle::shutdown`] had been called — the only difference is that
/// drop does not wait for them to finish. A pacer never outlives its handle.
pub struct PacerHandle {
    shutdown: watch::Sender<bool>,
    feeder: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl PacerHandle {
    /// Stop both tasks and wait for them to finish. Each task completes (or
    /// no-ops) its in-flight tick before exiting; store operations are
    /// single-step atomic, so nothing is left half-applied.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.feeder.await;
        let _ = self.consumer.await;
    }

    /// Whether both tasks have already exited.
    pub fn is_finished(&self) -> bool {
        self.feeder.is_finished() && self.consumer.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_accumulates_per_second() {
        let ledger = UsageLedger::new();
        assert_eq!(ledger.record(100), 1);
        assert_eq!(ledger.record(100), 2);
        assert_eq!(ledger.record(101), 1);
        assert_eq!(ledger.total(), 3);
        assert_eq!(ledger.snapshot().get(&100), Some(&2));
    }

    #[tokio::test]
    async fn memory_sink_keeps_latest_count() {
        let sink = MemoryUsageSink::new();
        sink.record(7, 1).await.unwrap();
        sink.record(7, 2).await.unwrap();
        assert_eq!(sink.counts().get(&7), Some(&2));
    }
}
