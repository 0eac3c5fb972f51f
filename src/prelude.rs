//! Convenient re-exports for common Pacer types.
pub use crate::{
    bucket::store::{BucketStore, MemoryBucketStore},
    bucket::{BucketConfig, BucketState, ConsumeOutcome, FeedOutcome, TokenBucket},
    clock::{Clock, SystemClock},
    config::{ConfigError, PacerConfig, PacerSpec},
    pacer::{Pacer, PacerHandle, UsageLedger, UsageSink},
    rules::{Rule, RuleError, RuleSpec},
    scheduler::{NextUpdate, Rulebook, Scheduler},
};
