//! Error taxonomy for detection jobs
//!
//! Splits failures by how they propagate: configuration and environment
//! problems are fatal at entry, navigation/action failures go through the
//! retry policy, and store I/O never fails a job.

use thiserror::Error;

/// Errors produced by a detection job.
///
/// Per-payload failures are recorded and logged, never surfaced through
/// this type; a `DetectError` returned from the orchestrator means the
/// whole job aborted.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Invalid user input: malformed URL, empty selector, unknown browser.
    #[error("configuration error: {0}")]
    Config(String),

    /// The browser engine is missing or cannot start. Carries a
    /// remediation hint (install command) for the CLI to print.
    #[error("environment error: {message}")]
    Environment { message: String, hint: String },

    /// Navigation to the target failed after retries were exhausted.
    #[error("navigation failed for {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// Page action (fill/click/press) failed after retries.
    #[error("page action '{action}' failed: {source}")]
    Action {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    /// The monitor agent could not be installed into the page.
    #[error("failed to install monitor agent: {0}")]
    MonitorInstall(#[source] anyhow::Error),

    /// The job was cancelled or exceeded its global deadline.
    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DetectError {
    /// Remediation hint for environment errors, if any.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Environment { hint, .. } => Some(hint),
            _ => None,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn environment(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
            hint: hint.into(),
        }
    }
}

/// Classify an error message as retryable under the default predicate.
///
/// Retries only cover transient browser conditions: timeouts, navigation
/// and network hiccups, and elements that are not yet visible, stable, or
/// attached. Everything else (bad selector syntax, protocol errors,
/// closed targets) fails fast.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    const RETRYABLE: &[&str] = &[
        "timeout",
        "timed out",
        "navigation",
        "network",
        "not visible",
        "not stable",
        "not found",
        "no node found",
    ];
    RETRYABLE.iter().any(|needle| lower.contains(needle))
}
