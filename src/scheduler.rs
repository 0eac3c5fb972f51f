//! Priority-rule scheduler: computes when a record is next due for refresh.
//!
//! The scheduler owns a normalized, precedence-ordered [`Rulebook`] behind
//! an `ArcSwap`: [`Scheduler::reload`] builds a brand-new snapshot and
//! installs it with a single atomic pointer swap, so concurrent
//! [`Scheduler::apply`] calls always read one consistent rulebook and never
//! a half-built one.
//!
//! Precedence is capacity-driven, not declaration-order-driven: the tightest
//! refresh interval wins, so rule authors do not need to hand-order entries.

use crate::clock::{Clock, SystemClock};
use crate::rules::{Rule, RuleError, RuleSpec};
use arc_swap::ArcSwap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// An immutable, normalized sequence of rules.
///
/// Invariant after [`Rulebook::compile`]: all non-default rules precede the
/// default, non-default rules are ascending by interval, and exactly one
/// default sits last — the smallest-interval default supplied, or a
/// synthetic zero-interval one when none was.
#[derive(Debug, Clone)]
pub struct Rulebook {
    rules: Vec<Rule>,
}

impl Rulebook {
    pub fn compile(specs: &[RuleSpec]) -> Result<Self, RuleError> {
        let mut matchers = Vec::new();
        let mut fallback: Option<Rule> = None;
        for (index, spec) in specs.iter().enumerate() {
            let rule = Rule::compile(index, spec)?;
            if rule.default {
                // Keep only the tightest default.
                let tighter = match &fallback {
                    Some(kept) => rule.update_every < kept.update_every,
                    None => true,
                };
                if tighter {
                    fallback = Some(rule);
                }
            } else {
                matchers.push(rule);
            }
        }
        matchers.sort_by_key(|rule| rule.update_every);

        let mut rules = matchers;
        rules.push(fallback.unwrap_or_else(Rule::synthetic_default));
        Ok(Self { rules })
    }

    /// Rules in precedence order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The interval the first matching rule assigns to `record`. Always
    /// resolves via exactly one rule: the first matching non-default, or
    /// the trailing default.
    fn interval_for(&self, record: &Value) -> Duration {
        for rule in &self.rules {
            if rule.matches(record) {
                return rule.update_every;
            }
        }
        // Unreachable: the trailing default matches unconditionally.
        Duration::ZERO
    }
}

/// When a record must next be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextUpdate {
    /// No deferral; the record is eligible for refresh right away.
    Immediately,
    /// Due at the given epoch-millis timestamp.
    At(u64),
}

impl NextUpdate {
    pub fn is_immediate(&self) -> bool {
        matches!(self, NextUpdate::Immediately)
    }

    /// The due timestamp, if deferred.
    pub fn at_millis(&self) -> Option<u64> {
        match self {
            NextUpdate::At(millis) => Some(*millis),
            NextUpdate::Immediately => None,
        }
    }
}

/// Stateless-per-call scheduler over an atomically swappable rulebook.
#[derive(Debug)]
pub struct Scheduler {
    rulebook: ArcSwap<Rulebook>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(specs: &[RuleSpec]) -> Result<Self, RuleError> {
        Self::with_clock(specs, Arc::new(SystemClock))
    }

    pub fn with_clock(specs: &[RuleSpec], clock: Arc<dyn Clock>) -> Result<Self, RuleError> {
        Ok(Self { rulebook: ArcSwap::from_pointee(Rulebook::compile(specs)?), clock })
    }

    /// Replace the rulebook. Compilation failures leave the previous
    /// snapshot installed and untouched.
    pub fn reload(&self, specs: &[RuleSpec]) -> Result<(), RuleError> {
        let next = Rulebook::compile(specs)?;
        tracing::debug!(rules = next.rules.len(), "rulebook reloaded");
        self.rulebook.store(Arc::new(next));
        Ok(())
    }

    /// Snapshot the current rulebook (cheap Arc clone).
    pub fn rulebook(&self) -> Arc<Rulebook> {
        self.rulebook.load_full()
    }

    /// Compute the next-due timestamp for `record` against one consistent
    /// rulebook snapshot.
    pub fn apply(&self, record: &Value) -> NextUpdate {
        let snapshot = self.rulebook.load();
        let interval = snapshot.interval_for(record);
        tracing::trace!(interval_ms = interval.as_millis() as u64, "schedule interval selected");
        if interval.is_zero() {
            NextUpdate::Immediately
        } else {
            NextUpdate::At(
                self.clock
                    .now_millis()
                    .saturating_add(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)),
            )
        }
    }
}
