//! Progress reporting abstraction for detection jobs
//!
//! Implementations can send updates to channels, log to console, update
//! a UI. The orchestrator calls these at lifecycle points; `NoOpProgress`
//! keeps the simple API zero-overhead.

use tracing::info;

use super::TestResult;

/// Lifecycle hooks a detection job reports through.
pub trait ProgressReporter: Send + Sync {
    /// Browser acquisition has started.
    fn report_initializing(&self);

    /// A page is ready for testing.
    fn report_page_ready(&self);

    /// Navigation to the target has started.
    fn report_navigation_started(&self, url: &str);

    /// A payload test is starting.
    fn report_payload_started(&self, index: usize, total: usize, payload: &str);

    /// Running totals, emitted every `progress_update_interval` payloads.
    fn report_progress(&self, tested: usize, total: usize, found: usize);

    /// A payload produced a positive result.
    fn report_finding(&self, result: &TestResult);

    /// The job finished.
    fn report_completed(&self, tested: usize, found: usize);

    /// A non-fatal error occurred.
    fn report_error(&self, error: &str);
}

/// Progress reporter that does nothing. All methods are no-ops and will
/// be inlined away by the compiler.
#[derive(Debug, Clone, Copy)]
pub struct NoOpProgress;

impl ProgressReporter for NoOpProgress {
    #[inline(always)]
    fn report_initializing(&self) {}

    #[inline(always)]
    fn report_page_ready(&self) {}

    #[inline(always)]
    fn report_navigation_started(&self, _url: &str) {}

    #[inline(always)]
    fn report_payload_started(&self, _index: usize, _total: usize, _payload: &str) {}

    #[inline(always)]
    fn report_progress(&self, _tested: usize, _total: usize, _found: usize) {}

    #[inline(always)]
    fn report_finding(&self, _result: &TestResult) {}

    #[inline(always)]
    fn report_completed(&self, _tested: usize, _found: usize) {}

    #[inline(always)]
    fn report_error(&self, _error: &str) {}
}

/// Progress reporter that logs through tracing, used by the CLI.
#[derive(Debug, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report_initializing(&self) {
        info!("acquiring browser...");
    }

    fn report_page_ready(&self) {
        info!("page ready");
    }

    fn report_navigation_started(&self, url: &str) {
        info!("navigating to {url}");
    }

    fn report_payload_started(&self, index: usize, total: usize, payload: &str) {
        info!("[{}/{}] testing {payload:?}", index + 1, total);
    }

    fn report_progress(&self, tested: usize, total: usize, found: usize) {
        info!("progress: {tested}/{total} tested, {found} findings");
    }

    fn report_finding(&self, result: &TestResult) {
        info!(
            "VULNERABLE payload={:?} reflected={} executed={}{}",
            result.payload,
            result.reflected,
            result.executed,
            if result.from_cache { " (cached)" } else { "" }
        );
    }

    fn report_completed(&self, tested: usize, found: usize) {
        info!("done: {tested} payloads tested, {found} findings");
    }

    fn report_error(&self, error: &str) {
        info!("non-fatal: {error}");
    }
}
