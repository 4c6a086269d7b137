//! Persistent store invariants: fingerprints, cache, effectiveness

use std::time::Duration;
use xssprobe::cache::{CachedResult, ResultCache, TestFingerprint};
use xssprobe::config::BrowserKind;
use xssprobe::effectiveness::EffectivenessStore;

#[test]
fn fingerprint_ignores_result_irrelevant_options() {
    // Only url/selector/payload/browser/verifyExecution/submitSelector
    // feed the digest; any other option knob must not change it.
    let a = TestFingerprint::compute(
        "http://t.example/search?q=1",
        "input[name=q]",
        "<script>alert(1)</script>",
        BrowserKind::Chromium,
        true,
        Some("#go"),
    );
    let b = TestFingerprint::compute(
        "http://t.example/search?q=1",
        "input[name=q]",
        "<script>alert(1)</script>",
        BrowserKind::Chromium,
        true,
        Some("#go"),
    );
    assert_eq!(a, b, "same inputs, same digest, across invocations");
    assert_eq!(a.as_str().len(), 32, "md5 hex digest");

    let different_flag = TestFingerprint::compute(
        "http://t.example/search?q=1",
        "input[name=q]",
        "<script>alert(1)</script>",
        BrowserKind::Chromium,
        false,
        Some("#go"),
    );
    assert_ne!(a, different_flag);
}

#[tokio::test]
async fn cache_round_trip_then_expiry_prunes() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::open(dir.path()).unwrap();
    let key = TestFingerprint::compute(
        "http://t.example/",
        "#q",
        "<b>x</b>",
        BrowserKind::Chromium,
        true,
        None,
    );

    let value = CachedResult::new(true, false);
    cache.put(&key, &value).await;
    assert!(cache.exists(&key, Duration::ZERO).await, "0 max-age keeps forever");
    assert_eq!(cache.get(&key).await.unwrap().detected, value.detected);

    // Backdate the entry past a 1-second max age.
    let mut stale = value.clone();
    stale.cached_at = chrono::Utc::now() - chrono::Duration::seconds(10);
    cache.put(&key, &stale).await;
    assert!(!cache.exists(&key, Duration::from_secs(1)).await);
    assert!(cache.get(&key).await.is_none(), "expired entry was removed");
}

#[tokio::test]
async fn negative_outcomes_are_cached_too() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::open(dir.path()).unwrap();
    let key = TestFingerprint::compute(
        "http://t.example/",
        "#q",
        "harmless",
        BrowserKind::Firefox,
        true,
        None,
    );
    cache.put(&key, &CachedResult::new(false, false)).await;
    let hit = cache.get(&key).await.unwrap();
    assert!(!hit.detected && !hit.executed);
}

#[tokio::test]
async fn effectiveness_counters_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = EffectivenessStore::open(dir.path().join("eff.json"));

    // A payload may execute without detectable reflection (DOM-based
    // sinks); counters must allow executed > reflected.
    store.record("blind", false, true, BrowserKind::Chromium).await;
    store.record("blind", false, true, BrowserKind::Chromium).await;
    store.record("blind", true, false, BrowserKind::Chromium).await;

    let record = store.get("blind").await.unwrap();
    assert_eq!(record.counters.total_tests, 3);
    assert_eq!(record.counters.reflected_count, 1);
    assert_eq!(record.counters.executed_count, 2);
    assert!(record.counters.reflected_count <= record.counters.total_tests);
    assert!(record.counters.executed_count <= record.counters.total_tests);
    assert!(record.last_tested.is_some());

    let score = store.score("blind", Some(BrowserKind::Chromium)).await;
    assert!(score.execution_score > score.reflection_score);
}

#[tokio::test]
async fn scenario_reflection_only_increments_effectiveness() {
    // Mirrors the reflection-only flow: one test, reflected, not executed.
    let dir = tempfile::tempdir().unwrap();
    let store = EffectivenessStore::open(dir.path().join("eff.json"));
    store.record("<b>hi</b>", true, false, BrowserKind::Chromium).await;

    let record = store.get("<b>hi</b>").await.unwrap();
    assert_eq!(record.counters.total_tests, 1);
    assert_eq!(record.counters.reflected_count, 1);
    assert_eq!(record.counters.executed_count, 0);
    let per_browser = record.browsers.get("chromium").unwrap();
    assert_eq!(per_browser.total_tests, 1);
    assert_eq!(per_browser.reflected_count, 1);
    assert_eq!(per_browser.executed_count, 0);
}
