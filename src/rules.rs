//! Update rules and record matching.
//!
//! A rule pairs a match predicate with a refresh interval. Predicates are
//! documents mapping **dotted field paths** to either a literal (equality)
//! or an operator map (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`).
//! Traversal of a dotted path is tolerant: any missing or `null`
//! intermediate segment means "does not satisfy", never an error.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::time::Duration;

/// A rule as it appears in configuration, before compilation.
///
/// Wire shape (ordered list, supplied at startup and on reload):
///
/// ```json
/// [ { "match": { "region": "EU" }, "updateEvery": "30m" },
///   { "default": true, "updateEvery": "6h" } ]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSpec {
    /// Field constraints a record must satisfy. Ignored on default rules.
    #[serde(rename = "match", default)]
    pub matcher: Map<String, Value>,
    /// Human-readable interval, e.g. `"30m"`. Absent means zero.
    #[serde(rename = "updateEvery", default)]
    pub update_every: Option<String>,
    /// A default rule matches unconditionally; fallback of last resort.
    #[serde(default)]
    pub default: bool,
}

impl RuleSpec {
    /// Convenience constructor for a non-default rule.
    pub fn matching(matcher: Map<String, Value>, update_every: impl Into<String>) -> Self {
        Self { matcher, update_every: Some(update_every.into()), default: false }
    }

    /// Convenience constructor for a default rule.
    pub fn fallback(update_every: impl Into<String>) -> Self {
        Self { matcher: Map::new(), update_every: Some(update_every.into()), default: true }
    }
}

/// Errors raised while compiling a rulebook. Misconfiguration fails fast at
/// reload time, never during `apply()`.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RuleError {
    /// `updateEvery` did not parse as a duration.
    #[error("rule {index}: bad duration {value:?}: {source}")]
    BadDuration {
        index: usize,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    /// A match predicate used an unknown operator or malformed operand.
    #[error("rule {index}: bad predicate for {path:?}: {reason}")]
    BadPredicate { index: usize, path: String, reason: String },
}

/// One compiled comparison against a resolved field value.
#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
}

impl Predicate {
    fn compile(index: usize, path: &str, op: &str, operand: &Value) -> Result<Self, RuleError> {
        match op {
            "$eq" => Ok(Self::Eq(operand.clone())),
            "$ne" => Ok(Self::Ne(operand.clone())),
            "$gt" => Ok(Self::Gt(operand.clone())),
            "$gte" => Ok(Self::Gte(operand.clone())),
            "$lt" => Ok(Self::Lt(operand.clone())),
            "$lte" => Ok(Self::Lte(operand.clone())),
            "$in" => match operand {
                Value::Array(items) => Ok(Self::In(items.clone())),
                other => Err(RuleError::BadPredicate {
                    index,
                    path: path.to_string(),
                    reason: format!("$in expects an array, got {other}"),
                }),
            },
            unknown => Err(RuleError::BadPredicate {
                index,
                path: path.to_string(),
                reason: format!("unknown operator {unknown:?}"),
            }),
        }
    }

    fn satisfies(&self, resolved: Option<&Value>) -> bool {
        // A path that failed to resolve satisfies nothing, $ne included.
        let Some(value) = resolved else {
            return false;
        };
        match self {
            Self::Eq(expected) => values_equal(value, expected),
            Self::Ne(expected) => !values_equal(value, expected),
            Self::Gt(bound) => matches!(compare(value, bound), Some(Ordering::Greater)),
            Self::Gte(bound) => {
                matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            Self::Lt(bound) => matches!(compare(value, bound), Some(Ordering::Less)),
            Self::Lte(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Self::In(items) => items.iter().any(|item| values_equal(value, item)),
        }
    }
}

/// A compiled rule: every clause must be satisfied for the rule to match.
#[derive(Debug, Clone)]
pub struct Rule {
    clauses: Vec<(String, Predicate)>,
    /// Normalized refresh interval (`updateEveryMs` in the wire shape).
    pub update_every: Duration,
    /// Default rules match unconditionally.
    pub default: bool,
}

impl Rule {
    /// Compile one spec; `index` is its position in the supplied rulebook,
    /// used only for error messages.
    pub fn compile(index: usize, spec: &RuleSpec) -> Result<Self, RuleError> {
        let update_every = match &spec.update_every {
            Some(text) => humantime::parse_duration(text).map_err(|source| {
                RuleError::BadDuration { index, value: text.clone(), source }
            })?,
            None => Duration::ZERO,
        };

        let mut clauses = Vec::with_capacity(spec.matcher.len());
        for (path, predicate) in &spec.matcher {
            match predicate {
                // Any `$` key makes the object an operator map; anything
                // else is a literal compared for equality. A map mixing the
                // two is malformed and rejected here, not at match time.
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    if !ops.keys().all(|k| k.starts_with('$')) {
                        return Err(RuleError::BadPredicate {
                            index,
                            path: path.clone(),
                            reason: "operator map mixes $-operators with plain fields".into(),
                        });
                    }
                    for (op, operand) in ops {
                        clauses.push((
                            path.clone(),
                            Predicate::compile(index, path, op, operand)?,
                        ));
                    }
                }
                literal => clauses.push((path.clone(), Predicate::Eq(literal.clone()))),
            }
        }

        Ok(Self { clauses, update_every, default: spec.default })
    }

    /// A synthetic zero-interval default, appended when a rulebook supplies
    /// no default of its own.
    pub fn synthetic_default() -> Self {
        Self { clauses: Vec::new(), update_every: Duration::ZERO, default: true }
    }

    /// Whether `record` satisfies every clause. Default rules always match.
    pub fn matches(&self, record: &Value) -> bool {
        if self.default {
            return true;
        }
        self.clauses.iter().all(|(path, predicate)| predicate.satisfies(lookup(record, path)))
    }
}

/// Dotted-path traversal. Returns `None` when any segment is missing or the
/// intermediate value is not an object — the "absent" marker, never a panic.
pub fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality that treats `1` and `1.0` as the same number; everything else
/// falls back to structural equality.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordered comparison for numbers and strings; other type pairs do not
/// compare (so ordered predicates fail rather than panic).
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    None
}
