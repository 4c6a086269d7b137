//! Test-result cache
//!
//! Memoizes detection outcomes under a canonical fingerprint so repeat
//! runs skip the browser entirely. One JSON file per fingerprint in a
//! cache directory; writers are serialized per store, and I/O failures
//! degrade the cache to pass-through rather than failing the job.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::BrowserKind;

/// Canonical cache key for one test.
///
/// md5 hex over canonical JSON of the result-affecting inputs only:
/// target URL, input locator, payload, and the options that change the
/// outcome (browser, verify-execution, submit selector). serde_json
/// serializes object keys sorted, so the digest is stable under key
/// reordering of the source options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestFingerprint(String);

impl TestFingerprint {
    pub fn compute(
        url: &str,
        selector: &str,
        payload: &str,
        browser: BrowserKind,
        verify_execution: bool,
        submit_selector: Option<&str>,
    ) -> Self {
        let canonical = json!({
            "url": url,
            "selector": selector,
            "payload": payload,
            "options": {
                "browser": browser.as_str(),
                "verifyExecution": verify_execution,
                "submitSelector": submit_selector,
            },
        });
        let digest = md5::compute(canonical.to_string().as_bytes());
        Self(hex::encode(digest.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A memoized outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub detected: bool,
    pub executed: bool,
    pub cached_at: DateTime<Utc>,
}

impl CachedResult {
    pub fn new(detected: bool, executed: bool) -> Self {
        Self {
            detected,
            executed,
            cached_at: Utc::now(),
        }
    }

    fn expired(&self, max_age: Duration) -> bool {
        if max_age.is_zero() {
            return false; // 0 = keep forever
        }
        let age = Utc::now().signed_duration_since(self.cached_at);
        age.to_std().map(|age| age > max_age).unwrap_or(false)
    }
}

/// Cache directory statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub count: usize,
    pub total_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub average_bytes: u64,
}

/// File-backed result cache with serialized writers.
#[derive(Debug)]
pub struct ResultCache {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ResultCache {
    /// Open a cache rooted at `dir`, creating it if missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache dir {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, fingerprint: &TestFingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint.as_str()))
    }

    /// True when a non-expired entry exists. Expired entries are removed
    /// on the way out.
    pub async fn exists(&self, fingerprint: &TestFingerprint, max_age: Duration) -> bool {
        match self.read_entry(fingerprint) {
            Some(entry) if entry.expired(max_age) => {
                let _guard = self.write_lock.lock().await;
                let path = self.entry_path(fingerprint);
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("failed to prune expired cache entry {}: {e}", path.display());
                }
                debug!("pruned expired cache entry {}", fingerprint.as_str());
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub async fn get(&self, fingerprint: &TestFingerprint) -> Option<CachedResult> {
        self.read_entry(fingerprint)
    }

    /// Store an outcome, positive or negative. Failures are logged and
    /// swallowed.
    pub async fn put(&self, fingerprint: &TestFingerprint, result: &CachedResult) {
        let _guard = self.write_lock.lock().await;
        let path = self.entry_path(fingerprint);
        let write = || -> Result<()> {
            let text = serde_json::to_string(result)?;
            std::fs::write(&path, text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!("cache write failed, continuing uncached: {e:#}");
        }
    }

    /// Remove the given fingerprints, or every entry when `None`.
    pub async fn clear(&self, fingerprints: Option<&[TestFingerprint]>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        match fingerprints {
            Some(list) => {
                for fp in list {
                    let path = self.entry_path(fp);
                    if path.exists() {
                        std::fs::remove_file(&path)
                            .with_context(|| format!("failed to remove {}", path.display()))?;
                        removed += 1;
                    }
                }
            }
            None => {
                for entry in std::fs::read_dir(&self.dir)? {
                    let path = entry?.path();
                    if path.extension().is_some_and(|ext| ext == "json") {
                        std::fs::remove_file(&path)
                            .with_context(|| format!("failed to remove {}", path.display()))?;
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let mut count = 0usize;
        let mut total_bytes = 0u64;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(cached) = serde_json::from_str::<CachedResult>(&text) else {
                continue;
            };
            count += 1;
            total_bytes += text.len() as u64;
            oldest = Some(oldest.map_or(cached.cached_at, |o| o.min(cached.cached_at)));
            newest = Some(newest.map_or(cached.cached_at, |n| n.max(cached.cached_at)));
        }

        Ok(CacheStats {
            count,
            total_bytes,
            oldest,
            newest,
            average_bytes: if count == 0 {
                0
            } else {
                total_bytes / count as u64
            },
        })
    }

    fn read_entry(&self, fingerprint: &TestFingerprint) -> Option<CachedResult> {
        let path = self.entry_path(fingerprint);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("unreadable cache entry {}: {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(payload: &str) -> TestFingerprint {
        TestFingerprint::compute(
            "http://t.example/search",
            "input[name=q]",
            payload,
            BrowserKind::Chromium,
            true,
            None,
        )
    }

    #[test]
    fn fingerprint_is_stable_and_input_sensitive() {
        assert_eq!(fp("<b>x</b>"), fp("<b>x</b>"));
        assert_ne!(fp("<b>x</b>"), fp("<b>y</b>"));

        let with_submit = TestFingerprint::compute(
            "http://t.example/search",
            "input[name=q]",
            "<b>x</b>",
            BrowserKind::Chromium,
            true,
            Some("#go"),
        );
        assert_ne!(fp("<b>x</b>"), with_submit);

        let other_browser = TestFingerprint::compute(
            "http://t.example/search",
            "input[name=q]",
            "<b>x</b>",
            BrowserKind::Firefox,
            true,
            None,
        );
        assert_ne!(fp("<b>x</b>"), other_browser);
    }

    #[tokio::test]
    async fn round_trip_and_forever_age() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let key = fp("<script>alert(1)</script>");

        let result = CachedResult::new(true, true);
        cache.put(&key, &result).await;

        assert!(cache.exists(&key, Duration::ZERO).await);
        let fetched = cache.get(&key).await.unwrap();
        assert!(fetched.detected);
        assert!(fetched.executed);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let key = fp("<svg onload=alert(1)>");

        let mut stale = CachedResult::new(true, false);
        stale.cached_at = Utc::now() - chrono::Duration::hours(2);
        cache.put(&key, &stale).await;

        assert!(!cache.exists(&key, Duration::from_secs(3600)).await);
        // The prune removed the file entirely.
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn clear_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();

        for i in 0..3 {
            cache
                .put(&fp(&format!("payload-{i}")), &CachedResult::new(false, false))
                .await;
        }
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.count, 3);
        assert!(stats.total_bytes > 0);
        assert!(stats.oldest.is_some() && stats.newest.is_some());
        assert_eq!(stats.average_bytes, stats.total_bytes / 3);

        let removed = cache.clear(Some(&[fp("payload-0")])).await.unwrap();
        assert_eq!(removed, 1);
        let removed = cache.clear(None).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().await.unwrap().count, 0);
    }
}
