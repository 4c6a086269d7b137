//! Detection job options
//!
//! The full option tree accepted by the orchestrator, the CLI, and the
//! HTTP endpoint. Serialized camelCase so the persisted config document
//! and HTTP bodies share one shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Browser engine identifier.
///
/// Selects the engine to drive and namespaces payload compatibility and
/// effectiveness scores. Only Chromium can currently be launched (the
/// engine protocol is CDP); Firefox and WebKit remain first-class values
/// so categorized payload banks and recorded scores stay portable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Firefox => "firefox",
            Self::Webkit => "webkit",
        }
    }

    pub const ALL: [BrowserKind; 3] = [Self::Chromium, Self::Firefox, Self::Webkit];
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Self::Chromium),
            "firefox" => Ok(Self::Firefox),
            "webkit" | "safari" => Ok(Self::Webkit),
            other => Err(format!(
                "unknown browser '{other}' (expected chromium, firefox or webkit)"
            )),
        }
    }
}

/// Operation classes covered by the retry policy allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryOperation {
    Navigation,
    Submission,
    Input,
}

/// Retry policy knobs. See [`crate::detect::retry::RetryPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    pub enabled: bool,
    pub max_attempts: u32,
    /// Base delay between attempts, milliseconds.
    pub delay_ms: u64,
    /// When true the delay doubles each attempt (D, 2D, 4D, ...).
    pub exponential_backoff: bool,
    /// Which operation classes are retried at all.
    pub operations: Vec<RetryOperation>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            delay_ms: 500,
            exponential_backoff: true,
            operations: vec![
                RetryOperation::Navigation,
                RetryOperation::Submission,
                RetryOperation::Input,
            ],
        }
    }
}

/// Per-phase timeouts, milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutOptions {
    pub navigation: u64,
    /// Individual page actions: fill, click, press.
    pub action: u64,
    pub wait_for: u64,
    /// Post-submit window in which the monitor collects execution evidence.
    pub execution: u64,
    /// Ceiling for the whole job; exceeding it cancels the job.
    pub global: u64,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            navigation: 30_000,
            action: 10_000,
            wait_for: 5_000,
            execution: 2_000,
            global: 300_000,
        }
    }
}

impl TimeoutOptions {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation)
    }
    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action)
    }
    pub fn wait_for(&self) -> Duration {
        Duration::from_millis(self.wait_for)
    }
    pub fn execution(&self) -> Duration {
        Duration::from_millis(self.execution)
    }
    pub fn global(&self) -> Duration {
        Duration::from_millis(self.global)
    }
}

/// Declarative login recipe executed before testing starts.
///
/// Authentication is best-effort: a failed login is logged and testing
/// continues unauthenticated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOptions {
    pub url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub username: String,
    pub password: String,
    /// Optional JS expression evaluated in-page after login; a truthy
    /// result confirms the session is authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_logged_in_check: Option<String>,
}

/// Named-session controls. See [`crate::session::SessionManager`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    /// Session name; when unset the job uses a one-shot browser.
    pub id: Option<String>,
    /// Restore the persisted storage-state snapshot on acquire.
    pub reuse: bool,
    /// Persist the storage-state snapshot at teardown.
    pub save: bool,
    /// Close the session (and its browser) when the job finishes.
    pub close_after: bool,
}

/// Result-cache controls. See [`crate::cache::ResultCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    pub enabled: bool,
    /// Maximum entry age in milliseconds; 0 means entries never expire.
    pub max_age_ms: u64,
    pub verbose: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_ms: 3_600_000,
            verbose: false,
        }
    }
}

/// Effectiveness-tracking controls. See
/// [`crate::effectiveness::EffectivenessStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectivenessOptions {
    /// Record each test's outcome into the store.
    pub track: bool,
    /// Pull the top-K historically effective payloads instead of the
    /// default bank.
    pub use_effective_payloads: bool,
    pub limit: usize,
}

impl Default for EffectivenessOptions {
    fn default() -> Self {
        Self {
            track: true,
            use_effective_payloads: false,
            limit: 10,
        }
    }
}

/// Context-aware payload selection controls. See
/// [`crate::payloads::selector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmartSelectionOptions {
    pub enabled: bool,
    pub limit: usize,
}

impl Default for SmartSelectionOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 15,
        }
    }
}

/// Report destination, passed opaquely to the external reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportOptions {
    pub format: String,
    pub output_dir: PathBuf,
    /// Per-run filename; timestamped values are stripped before the
    /// options are persisted back as defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            output_dir: PathBuf::from("./reports"),
            filename: None,
        }
    }
}

/// Progress stream controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingOptions {
    pub verbose: bool,
    pub show_progress: bool,
    /// Emit a progress event every N payloads.
    pub progress_update_interval: usize,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            show_progress: true,
            progress_update_interval: 1,
        }
    }
}

/// Full option tree for one detection job.
///
/// Every field has a default so partial JSON documents (persisted config,
/// HTTP bodies, `config --update` files) deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectOptions {
    pub browser: BrowserKind,
    /// First strategy in the submission fallback chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_selector: Option<String>,
    /// When false, `executed` is reported false unconditionally.
    pub verify_execution: bool,
    /// When true (with `verify_execution`), reflection-only results are
    /// dropped from the output.
    pub require_execution: bool,
    pub timeouts: TimeoutOptions,
    pub retry: RetryOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthOptions>,
    pub session: SessionOptions,
    pub cache: CacheOptions,
    pub effectiveness: EffectivenessOptions,
    pub smart_payload_selection: SmartSelectionOptions,
    pub report: ReportOptions,
    pub logging: LoggingOptions,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            browser: BrowserKind::default(),
            submit_selector: None,
            verify_execution: true,
            require_execution: false,
            timeouts: TimeoutOptions::default(),
            retry: RetryOptions::default(),
            auth: None,
            session: SessionOptions::default(),
            cache: CacheOptions::default(),
            effectiveness: EffectivenessOptions::default(),
            smart_payload_selection: SmartSelectionOptions::default(),
            report: ReportOptions::default(),
            logging: LoggingOptions::default(),
        }
    }
}

impl DetectOptions {
    /// Copy suitable for persisting as defaults: per-run timestamped
    /// filenames are dropped so they don't leak into the next run.
    pub fn for_persistence(&self) -> Self {
        let mut opts = self.clone();
        opts.report.filename = None;
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_kind_parses_aliases() {
        assert_eq!("chrome".parse::<BrowserKind>().unwrap(), BrowserKind::Chromium);
        assert_eq!("WEBKIT".parse::<BrowserKind>().unwrap(), BrowserKind::Webkit);
        assert!("opera".parse::<BrowserKind>().is_err());
    }

    #[test]
    fn options_round_trip_camel_case() {
        let opts = DetectOptions::default();
        let json = serde_json::to_value(&opts).unwrap();
        assert!(json.get("verifyExecution").is_some());
        assert!(json["timeouts"].get("waitFor").is_some());
        assert!(json["smartPayloadSelection"].get("enabled").is_some());
        let back: DetectOptions = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeouts.navigation, opts.timeouts.navigation);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let opts: DetectOptions =
            serde_json::from_str(r#"{"browser":"firefox","cache":{"enabled":true}}"#).unwrap();
        assert_eq!(opts.browser, BrowserKind::Firefox);
        assert!(opts.cache.enabled);
        assert_eq!(opts.cache.max_age_ms, 3_600_000);
        assert_eq!(opts.retry.max_attempts, 3);
    }

    #[test]
    fn persistence_copy_strips_filename() {
        let mut opts = DetectOptions::default();
        opts.report.filename = Some("scan-20250801-120000.json".into());
        assert!(opts.for_persistence().report.filename.is_none());
    }
}
