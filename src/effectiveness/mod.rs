//! Payload effectiveness store
//!
//! A single JSON document tracking, per payload string, how often it was
//! tested, reflected, and executed, globally and per browser engine.
//! Updates are read-modify-write under one async lock and flushed with a
//! temp-file rename so a crash never leaves a torn document. Store I/O
//! failures are logged and swallowed: losing an update must not fail a
//! detection job.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::BrowserKind;
use crate::payloads::selector::ScoreIndex;

/// Counter triple shared by the global and per-browser scopes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Counters {
    pub total_tests: u64,
    pub reflected_count: u64,
    pub executed_count: u64,
}

impl Counters {
    fn record(&mut self, reflected: bool, executed: bool) {
        self.total_tests += 1;
        if reflected {
            self.reflected_count += 1;
        }
        if executed {
            self.executed_count += 1;
        }
    }

    pub fn reflection_score(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.reflected_count as f64 / self.total_tests as f64
        }
    }

    pub fn execution_score(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.executed_count as f64 / self.total_tests as f64
        }
    }
}

/// Aggregated history for one payload string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectivenessRecord {
    #[serde(flatten)]
    pub counters: Counters,
    pub last_tested: Option<DateTime<Utc>>,
    /// Same counters, namespaced by browser id.
    pub browsers: BTreeMap<String, Counters>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Metadata {
    last_updated: Option<DateTime<Utc>>,
    total_tests: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Document {
    metadata: Metadata,
    payloads: BTreeMap<String, EffectivenessRecord>,
}

/// Derived scores returned by [`EffectivenessStore::score`].
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadScore {
    pub reflection_score: f64,
    pub execution_score: f64,
    pub total_tests: u64,
}

/// A ranked entry from [`EffectivenessStore::top_k`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPayload {
    pub payload: String,
    pub score: PayloadScore,
}

/// Process-wide effectiveness store with an explicit lifecycle:
/// [`open`](Self::open) loads the document, every `record` flushes it.
#[derive(Debug)]
pub struct EffectivenessStore {
    path: PathBuf,
    document: Mutex<Document>,
}

impl EffectivenessStore {
    /// Load the document at `path`, or start empty when missing or
    /// unreadable (a corrupt store loses history, not jobs).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("effectiveness document at {} is invalid: {e}", path.display());
                Document::default()
            }),
            Err(_) => Document::default(),
        };
        Self {
            path,
            document: Mutex::new(document),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one test outcome. Counters only ever increase; concurrent
    /// callers are linearized by the document lock.
    pub async fn record(
        &self,
        payload: &str,
        reflected: bool,
        executed: bool,
        browser: BrowserKind,
    ) {
        let mut doc = self.document.lock().await;
        let now = Utc::now();

        let record = doc.payloads.entry(payload.to_string()).or_default();
        record.counters.record(reflected, executed);
        record.last_tested = Some(now);
        record
            .browsers
            .entry(browser.as_str().to_string())
            .or_default()
            .record(reflected, executed);

        doc.metadata.total_tests += 1;
        doc.metadata.last_updated = Some(now);

        if let Err(e) = flush(&self.path, &doc) {
            warn!("failed to persist effectiveness update: {e:#}");
        }
    }

    /// Scores for one payload, from the per-browser scope when requested.
    pub async fn score(&self, payload: &str, browser: Option<BrowserKind>) -> PayloadScore {
        let doc = self.document.lock().await;
        let counters = doc
            .payloads
            .get(payload)
            .map(|record| match browser {
                Some(b) => record.browsers.get(b.as_str()).copied().unwrap_or_default(),
                None => record.counters,
            })
            .unwrap_or_default();
        PayloadScore {
            reflection_score: counters.reflection_score(),
            execution_score: counters.execution_score(),
            total_tests: counters.total_tests,
        }
    }

    /// Best-performing payloads, ordered by execution score then
    /// reflection score, both descending.
    pub async fn top_k(&self, limit: usize, browser: Option<BrowserKind>) -> Vec<RankedPayload> {
        let doc = self.document.lock().await;
        let mut ranked: Vec<RankedPayload> = doc
            .payloads
            .iter()
            .map(|(payload, record)| {
                let counters = match browser {
                    Some(b) => record.browsers.get(b.as_str()).copied().unwrap_or_default(),
                    None => record.counters,
                };
                RankedPayload {
                    payload: payload.clone(),
                    score: PayloadScore {
                        reflection_score: counters.reflection_score(),
                        execution_score: counters.execution_score(),
                        total_tests: counters.total_tests,
                    },
                }
            })
            .filter(|entry| entry.score.total_tests > 0)
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .execution_score
                .partial_cmp(&a.score.execution_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.score
                        .reflection_score
                        .partial_cmp(&a.score.reflection_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        ranked.truncate(limit);
        ranked
    }

    /// Snapshot of `(execution, reflection)` scores for the selector.
    /// Readers rank from this copy without blocking writers.
    pub async fn score_index(&self, browser: BrowserKind) -> ScoreIndex {
        let doc = self.document.lock().await;
        doc.payloads
            .iter()
            .map(|(payload, record)| {
                let counters = record
                    .browsers
                    .get(browser.as_str())
                    .copied()
                    .unwrap_or_default();
                (
                    payload.clone(),
                    (counters.execution_score(), counters.reflection_score()),
                )
            })
            .collect()
    }

    /// Raw record access (CLI `payloads --effective` display).
    pub async fn get(&self, payload: &str) -> Option<EffectivenessRecord> {
        self.document.lock().await.payloads.get(payload).cloned()
    }
}

fn flush(path: &Path, doc: &Document) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(doc)?;
    std::fs::write(&tmp, text).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", tmp.display()))?;
    debug!("effectiveness document flushed to {}", path.display());
    Ok(())
}
