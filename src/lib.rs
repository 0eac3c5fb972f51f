#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Pacer
//!
//! Pacing and prioritization for repeated fetch-and-refresh work against a
//! rate-limited upstream.
//!
//! Two coupled subsystems:
//!
//! - **Distributed token bucket** ([`bucket`]): a persisted, shared counter
//!   with bounded capacity, fixed-cadence replenishment, and atomic
//!   depletion. Any number of concurrent process instances throttle against
//!   one counter with no external lock; every mutation is a single atomic
//!   conditional update in the [`bucket::store::BucketStore`] backend.
//! - **Priority-rule scheduler** ([`scheduler`]): an immutable,
//!   precedence-ordered rulebook computing, per processed record, when it
//!   must next be refreshed. Tightest interval wins; reloads swap the whole
//!   rulebook atomically.
//!
//! The [`pacer`] module ties them together: a feed tick replenishing the
//! bucket and a consume tick that, when granted, runs one unit of
//! rate-limited work and records a per-second usage metric.
//!
//! ## Quick Start
//!
//! ```rust
//! use pacer::{BucketConfig, MemoryBucketStore, RuleSpec, Scheduler, TokenBucket};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bucket = TokenBucket::new(
//!         MemoryBucketStore::new(),
//!         &BucketConfig::new("prices", 5.0).limit(100).initial(10),
//!     );
//!     bucket.init().await.unwrap();
//!     if bucket.consume(1).await.unwrap().is_granted() {
//!         // proceed with one unit of rate-limited work
//!     }
//!
//!     let scheduler = Scheduler::new(&[
//!         RuleSpec::matching(json!({ "region": "EU" }).as_object().cloned().unwrap(), "30m"),
//!         RuleSpec::fallback("6h"),
//!     ])
//!     .unwrap();
//!     let _due = scheduler.apply(&json!({ "region": "EU" }));
//! }
//! ```

pub mod bucket;
pub mod clock;
pub mod config;
pub mod pacer;
pub mod prelude;
pub mod rules;
pub mod scheduler;

// Re-exports
pub use bucket::store::{BucketStore, MemoryBucketStore};
pub use bucket::{BucketConfig, BucketParams, BucketState, ConsumeOutcome, FeedOutcome, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PacerConfig, PacerSpec};
pub use pacer::{MemoryUsageSink, Pacer, PacerHandle, UsageLedger, UsageSink};
pub use rules::{Rule, RuleError, RuleSpec};
pub use scheduler::{NextUpdate, Rulebook, Scheduler};
