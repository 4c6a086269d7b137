//! xssprobe — browser-driven XSS detection engine
//!
//! Injects attack payloads into a target page through a real Chromium
//! instance, watches for reflection in the rendered document and for
//! actual JavaScript execution via an in-page monitor agent, and keeps
//! persistent records of payload effectiveness and memoized results.

pub mod browser_setup;
pub mod cache;
pub mod config;
pub mod context;
pub mod detect;
pub mod driver;
pub mod effectiveness;
pub mod error;
pub mod monitor;
pub mod payloads;
pub mod scheduler;
pub mod server;
pub mod session;

pub use browser_setup::{download_managed_browser, find_browser_executable, launch_browser};
pub use cache::{CacheStats, CachedResult, ResultCache, TestFingerprint};
pub use config::{BrowserKind, ConfigStore, DetectOptions};
pub use context::{AttributeKind, ContextAnalysis, InjectionContext};
pub use detect::{
    CancelHandle, CancelToken, DetectOutcome, DetectRequest, Detector, LogProgress, NoOpProgress,
    ProgressReporter, RetryPolicy, TestResult,
};
pub use driver::{CdpPage, PageDriver};
pub use effectiveness::{EffectivenessStore, PayloadScore, RankedPayload};
pub use error::DetectError;
pub use monitor::MonitorState;
pub use payloads::{GeneratorOptions, PayloadCategory, PayloadInput, builtin_categories, default_bank};
pub use scheduler::{DetectorRunner, JobReport, JobRunner, ScanJob, SchedulerOptions, run_batch};
pub use session::{PageLease, SessionManager, StorageState};
