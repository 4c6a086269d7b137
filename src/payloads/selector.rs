//! Context- and history-aware payload selection
//!
//! Ranks the corpus for one test run: context match first, then
//! engine-exclusive vectors and caller extras, ranked by recorded
//! effectiveness, with a diversity pass so structurally different
//! payloads land early in the tested sequence.

use std::collections::HashMap;
use tracing::debug;

use crate::config::BrowserKind;
use crate::context::ContextAnalysis;

use super::{PayloadCategory, PayloadInput};

/// Per-payload `(execution_score, reflection_score)` used for ranking.
pub type ScoreIndex = HashMap<String, (f64, f64)>;

/// Everything the selector needs for one run.
pub struct SelectionInput<'a> {
    pub analysis: ContextAnalysis,
    pub browser: BrowserKind,
    /// The categorized corpus (built-in bank or a loaded file).
    pub categories: &'a [PayloadCategory],
    /// Caller-supplied extras appended after the corpus.
    pub custom: Option<&'a PayloadInput>,
    /// When present, payloads are stable-sorted by these scores.
    pub scores: Option<&'a ScoreIndex>,
    pub limit: usize,
}

/// Structural buckets the diversity pass guarantees early coverage of.
const DIVERSITY_BUCKETS: &[fn(&str) -> bool] = &[
    |p| p.contains("<script"),
    |p| p.contains("<img"),
    |p| p.contains("<svg"),
    |p| p.contains("<iframe"),
    |p| {
        ["onload", "onerror", "onclick", "onmouseover"]
            .iter()
            .any(|h| p.contains(h))
    },
    |p| p.contains('"') || p.contains('\''),
    |p| p.contains("javascript:") || p.contains("data:"),
];

fn category_matches(category: &PayloadCategory, analysis: &ContextAnalysis) -> bool {
    if category.context != analysis.context {
        return false;
    }
    match analysis.attribute_kind {
        Some(kind) => category.attribute_kind == Some(kind),
        None => true,
    }
}

fn push_unique(seen: &mut Vec<String>, payload: &str) {
    if !seen.iter().any(|existing| existing == payload) {
        seen.push(payload.to_string());
    }
}

/// Select at most `limit` payloads for a test run.
pub fn select_payloads(input: &SelectionInput<'_>) -> Vec<String> {
    let SelectionInput {
        analysis,
        browser,
        categories,
        custom,
        scores,
        limit,
    } = input;
    let limit = *limit;
    if limit == 0 {
        return Vec::new();
    }

    // 1. Context-matching, browser-compatible corpus payloads.
    let mut candidates: Vec<String> = Vec::new();
    for category in categories
        .iter()
        .filter(|c| category_matches(c, analysis) && c.supports(*browser))
    {
        for payload in &category.payloads {
            push_unique(&mut candidates, payload);
        }
    }

    // 2. Engine-exclusive categories regardless of context.
    for category in categories.iter().filter(|c| c.exclusive_to(*browser)) {
        for payload in &category.payloads {
            push_unique(&mut candidates, payload);
        }
    }

    // 3. Caller extras: flat lists as-is, categorized filtered by engine.
    if let Some(extra) = custom {
        for payload in extra.flatten_for(*browser) {
            push_unique(&mut candidates, &payload);
        }
    }

    // 4/5. De-dup happened on insert; rank by recorded effectiveness.
    if let Some(index) = scores {
        candidates.sort_by(|a, b| {
            let (exec_a, refl_a) = index.get(a).copied().unwrap_or((0.0, 0.0));
            let (exec_b, refl_b) = index.get(b).copied().unwrap_or((0.0, 0.0));
            exec_b
                .partial_cmp(&exec_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(refl_b.partial_cmp(&refl_a).unwrap_or(std::cmp::Ordering::Equal))
        });
    }

    // 6. Diversity pass: one representative per structural bucket first.
    let mut selected: Vec<String> = Vec::new();
    for bucket in DIVERSITY_BUCKETS {
        if selected.len() >= limit {
            break;
        }
        if let Some(payload) = candidates
            .iter()
            .find(|p| bucket(p.as_str()) && !selected.contains(*p))
        {
            selected.push(payload.clone());
        }
    }
    for payload in &candidates {
        if selected.len() >= limit {
            break;
        }
        if !selected.contains(payload) {
            selected.push(payload.clone());
        }
    }

    // 7. Top up from other contexts' generic payloads when short.
    if selected.len() < limit {
        for category in categories
            .iter()
            .filter(|c| !category_matches(c, analysis) && c.supports(*browser))
        {
            for payload in &category.payloads {
                if selected.len() >= limit {
                    break;
                }
                if !selected.contains(payload) {
                    selected.push(payload.clone());
                }
            }
        }
    }

    selected.truncate(limit);
    debug!(
        "selected {} payloads for {:?}/{}",
        selected.len(),
        analysis.context,
        browser
    );
    selected
}
