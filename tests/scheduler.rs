use pacer::{ManualClock, NextUpdate, RuleError, RuleSpec, Scheduler};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn spec(matcher: serde_json::Value, every: &str) -> RuleSpec {
    RuleSpec::matching(matcher.as_object().cloned().unwrap(), every)
}

#[test]
fn rulebook_wire_shape_deserializes() {
    let specs: Vec<RuleSpec> = serde_json::from_str(
        r#"[
            { "match": { "region": "EU" }, "updateEvery": "30m" },
            { "match": { "pricing.tier": { "$in": ["gold", "platinum"] } }, "updateEvery": "10m" },
            { "default": true, "updateEvery": "6h" }
        ]"#,
    )
    .unwrap();

    let clock = Arc::new(ManualClock::new(0));
    let scheduler = Scheduler::with_clock(&specs, clock).unwrap();
    let book = scheduler.rulebook();

    // Sorted tightest-first, single trailing default.
    let intervals: Vec<_> = book.rules().iter().map(|r| r.update_every).collect();
    assert_eq!(
        intervals,
        vec![Duration::from_secs(600), Duration::from_secs(1_800), Duration::from_secs(21_600)]
    );

    assert_eq!(
        scheduler.apply(&json!({ "region": "EU" })),
        NextUpdate::At(30 * 60 * 1_000)
    );
    assert_eq!(
        scheduler.apply(&json!({ "region": "US", "pricing": { "tier": "gold" } })),
        NextUpdate::At(10 * 60 * 1_000)
    );
    assert_eq!(
        scheduler.apply(&json!({ "region": "US" })),
        NextUpdate::At(6 * 3_600 * 1_000)
    );
}

#[test]
fn malformed_rulebook_fails_at_reload_not_apply() {
    let err = Scheduler::new(&[spec(json!({ "region": "EU" }), "half past noon")]).unwrap_err();
    assert!(matches!(err, RuleError::BadDuration { index: 0, .. }));

    let err =
        Scheduler::new(&[spec(json!({ "region": { "$within": 5 } }), "1h")]).unwrap_err();
    assert!(matches!(err, RuleError::BadPredicate { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_applies_never_observe_a_half_built_rulebook() {
    let clock = Arc::new(ManualClock::new(0));
    let scheduler =
        Arc::new(Scheduler::with_clock(&[RuleSpec::fallback("1h")], clock).unwrap());

    let mut appliers = Vec::new();
    for _ in 0..4 {
        let scheduler = scheduler.clone();
        appliers.push(tokio::spawn(async move {
            for _ in 0..1_000 {
                // Every observation must be one of the two installed
                // rulebooks, whole: either the 1h default or the 2h default.
                match scheduler.apply(&json!({ "region": "EU" })) {
                    NextUpdate::At(3_600_000) | NextUpdate::At(7_200_000) => {}
                    other => panic!("inconsistent snapshot: {other:?}"),
                }
            }
        }));
    }

    let reloader = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                let every = if i % 2 == 0 { "2h" } else { "1h" };
                scheduler.reload(&[RuleSpec::fallback(every)]).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for handle in appliers {
        handle.await.unwrap();
    }
    reloader.await.unwrap();
}

#[test]
fn apply_resolves_via_exactly_one_rule() {
    let clock = Arc::new(ManualClock::new(0));
    let scheduler = Scheduler::with_clock(
        &[
            spec(json!({ "region": "EU" }), "30m"),
            spec(json!({ "region": "EU" }), "2h"),
            RuleSpec::fallback("6h"),
        ],
        clock,
    )
    .unwrap();

    // Both EU rules match; only the first (tightest) contributes.
    assert_eq!(scheduler.apply(&json!({ "region": "EU" })), NextUpdate::At(1_800_000));
}

#[test]
fn record_matching_nothing_with_synthetic_default_is_immediately_due() {
    let scheduler = Scheduler::new(&[spec(json!({ "region": "EU" }), "30m")]).unwrap();
    assert_eq!(scheduler.apply(&json!({ "region": "APAC" })), NextUpdate::Immediately);
}
