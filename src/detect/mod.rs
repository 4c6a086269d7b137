//! Detection orchestrator
//!
//! Executes one `(target URL, input locator, payloads, options)` job:
//! acquires a page, installs the monitor agent, iterates payloads
//! through fill/submit/observe, and produces the list of test results.
//! Per-payload failures are isolated; only launch, target navigation,
//! and monitor installation are fatal.

pub mod auth;
pub mod cancel;
pub mod progress;
pub mod retry;
pub mod submit;

pub use cancel::{CancelHandle, CancelToken};
pub use progress::{LogProgress, NoOpProgress, ProgressReporter};
pub use retry::RetryPolicy;
pub use submit::SubmitMethod;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser_setup::{cleanup_profile_dir, launch_browser};
use crate::cache::{CachedResult, ResultCache, TestFingerprint};
use crate::config::{ConfigStore, DetectOptions, RetryOperation};
use crate::context;
use crate::driver::{CdpPage, PageDriver};
use crate::effectiveness::EffectivenessStore;
use crate::error::DetectError;
use crate::monitor;
use crate::payloads::selector::{ScoreIndex, SelectionInput, select_payloads};
use crate::payloads::{PayloadInput, builtin_categories, default_bank};
use crate::session::{PageLease, SessionManager, storage_state};

/// Outcome of testing one payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub payload: String,
    pub reflected: bool,
    pub executed: bool,
    pub url: String,
    pub tested_at: DateTime<Utc>,
    pub from_cache: bool,
}

/// A detection job request. `options` is a partial document merged over
/// the persisted defaults (persisted < provided).
#[derive(Debug, Clone)]
pub struct DetectRequest {
    pub url: String,
    pub input_selector: String,
    pub payloads: Option<PayloadInput>,
    pub options: serde_json::Value,
}

impl DetectRequest {
    pub fn new(url: impl Into<String>, input_selector: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            input_selector: input_selector.into(),
            payloads: None,
            options: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_payloads(mut self, payloads: PayloadInput) -> Self {
        self.payloads = Some(payloads);
        self
    }

    /// Provide a full typed option tree (every field counts as provided).
    pub fn with_options(mut self, options: &DetectOptions) -> Self {
        self.options = serde_json::to_value(options).unwrap_or_default();
        self
    }

    /// Provide a partial overrides document.
    pub fn with_overrides(mut self, overrides: serde_json::Value) -> Self {
        self.options = overrides;
        self
    }
}

/// What a job hands back: results plus the report file, when written.
#[derive(Debug, Clone)]
pub struct DetectOutcome {
    pub results: Vec<TestResult>,
    pub report: Option<PathBuf>,
}

/// The detection engine. Stores are optional collaborators with their
/// own lifecycles; a missing store simply disables its feature.
pub struct Detector {
    sessions: Arc<SessionManager>,
    config_store: Option<Arc<ConfigStore>>,
    cache: Option<Arc<ResultCache>>,
    effectiveness: Option<Arc<EffectivenessStore>>,
}

impl Detector {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            config_store: None,
            cache: None,
            effectiveness: None,
        }
    }

    /// Engine wired to the default on-disk stores under the user data
    /// directory.
    pub fn with_default_stores(sessions: Arc<SessionManager>) -> Result<Self> {
        let data = crate::config::data_dir()?;
        Ok(Self::new(sessions)
            .config_store(Arc::new(ConfigStore::default_location()?))
            .cache(Arc::new(ResultCache::open(data.join("cache"))?))
            .effectiveness(Arc::new(EffectivenessStore::open(
                data.join("effectiveness.json"),
            ))))
    }

    pub fn config_store(mut self, store: Arc<ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn effectiveness(mut self, store: Arc<EffectivenessStore>) -> Self {
        self.effectiveness = Some(store);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn effectiveness_store(&self) -> Option<&Arc<EffectivenessStore>> {
        self.effectiveness.as_ref()
    }

    pub fn cache_store(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// Run one detection job. On cancellation (external token or the
    /// global deadline) the partial result list collected so far is
    /// returned, after normal teardown.
    pub async fn detect_xss(
        &self,
        request: DetectRequest,
        progress: &dyn ProgressReporter,
        cancel: CancelToken,
    ) -> Result<DetectOutcome, DetectError> {
        // Input validation is the single fatal-at-entry gate.
        let target = Url::parse(&request.url)
            .map_err(|e| DetectError::config(format!("invalid URL '{}': {e}", request.url)))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(DetectError::config(format!(
                "unsupported URL scheme '{}'",
                target.scheme()
            )));
        }
        if request.input_selector.trim().is_empty() {
            return Err(DetectError::config("input selector must not be empty"));
        }

        // Merge configuration: persisted < provided, then persist the
        // provided options back as the new defaults.
        let options: DetectOptions = match &self.config_store {
            Some(store) => store
                .resolve(&request.options)
                .map_err(|e| DetectError::config(e.to_string()))?,
            None => {
                let mut base = serde_json::to_value(DetectOptions::default())
                    .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
                crate::config::deep_merge(&mut base, &request.options);
                serde_json::from_value(base).map_err(|e| DetectError::config(e.to_string()))?
            }
        };
        if let Some(store) = &self.config_store
            && let Err(e) = store.persist(&options)
        {
            warn!("could not persist config defaults: {e:#}");
        }

        // The global ceiling and the caller's token share one signal.
        let (deadline_handle, job_cancel) = CancelToken::new();
        let global = options.timeouts.global();
        let outer_cancel = cancel.clone();
        let deadline_task = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(global) => {
                    warn!("global job ceiling of {global:?} reached, cancelling");
                }
                () = outer_cancel.cancelled() => {}
            }
            deadline_handle.cancel();
        });

        progress.report_initializing();
        let mut job_page = match self.acquire_page(&options).await {
            Ok(page) => page,
            Err(e) => {
                deadline_task.abort();
                return Err(e);
            }
        };
        progress.report_page_ready();

        let run = self
            .run_job(&request, &options, &mut job_page, progress, &job_cancel)
            .await;

        self.teardown(job_page, &options).await;
        deadline_task.abort();

        let mut results = run?;

        // requireExecution: with execution verification on, drop results
        // that only reflected.
        if options.verify_execution && options.require_execution {
            results.retain(|r| r.executed);
        }

        let report = match write_report(&request.url, &results, &options) {
            Ok(path) => path,
            Err(e) => {
                warn!("report write failed: {e:#}");
                None
            }
        };

        Ok(DetectOutcome { results, report })
    }

    async fn acquire_page(&self, options: &DetectOptions) -> Result<JobPage, DetectError> {
        match &options.session.id {
            Some(name) => {
                let handle = self.sessions.get_session(name, options.browser).await?;
                let lease = handle
                    .session
                    .acquire_page()
                    .await
                    .map_err(DetectError::Other)?;

                if options.session.reuse
                    && let Ok(Some(state)) = self.sessions.load_storage_state(name)
                {
                    if let Err(e) = storage_state::apply_cookies(lease.raw(), &state).await {
                        warn!("could not restore session cookies: {e:#}");
                    }
                    return Ok(JobPage {
                        driver: lease.driver(),
                        lease: Some(lease),
                        session_name: Some(name.clone()),
                        restored_state: Some(state),
                        one_shot: None,
                    });
                }

                Ok(JobPage {
                    driver: lease.driver(),
                    lease: Some(lease),
                    session_name: Some(name.clone()),
                    restored_state: None,
                    one_shot: None,
                })
            }
            None => {
                let (browser, handler, profile_dir) = launch_browser(options.browser, None).await?;
                let page = browser
                    .new_page("about:blank")
                    .await
                    .context("failed to open page")
                    .map_err(DetectError::Other)?;
                Ok(JobPage {
                    driver: CdpPage::new(page),
                    lease: None,
                    session_name: None,
                    restored_state: None,
                    one_shot: Some(OneShot {
                        browser,
                        handler,
                        profile_dir,
                    }),
                })
            }
        }
    }

    async fn run_job(
        &self,
        request: &DetectRequest,
        options: &DetectOptions,
        job_page: &mut JobPage,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<Vec<TestResult>, DetectError> {
        let retry = RetryPolicy::from(&options.retry);

        // Best-effort authentication; failure never stops the job.
        if let Some(auth_options) = &options.auth {
            match auth::authenticate(&job_page.driver, auth_options, options.timeouts.wait_for())
                .await
            {
                Ok(true) => debug!("authenticated"),
                Ok(false) => warn!("login probe failed, continuing unauthenticated"),
                Err(e) => warn!("authentication failed, continuing unauthenticated: {e:#}"),
            }
        }

        progress.report_navigation_started(&request.url);
        self.navigate_to_target(&job_page.driver, &request.url, options, &retry, cancel)
            .await?;
        job_page.restore_origin_storage(&request.url).await;

        monitor::install(&job_page.driver)
            .await
            .map_err(DetectError::MonitorInstall)?;

        let payloads = self.choose_payloads(request, options, &job_page.driver).await;
        info!("testing {} payloads against {}", payloads.len(), request.url);

        let mut results = Vec::new();
        let mut tested = 0usize;

        for (index, payload) in payloads.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("cancelled after {tested} payloads, returning partial results");
                break;
            }
            progress.report_payload_started(index, payloads.len(), payload);

            match self
                .test_one_payload(request, options, job_page, payload, &retry, cancel)
                .await
            {
                Ok(Some(result)) => {
                    progress.report_finding(&result);
                    results.push(result);
                }
                Ok(None) => {}
                Err(e) => {
                    // Isolated: recorded, never fatal for the job.
                    debug!("payload {payload:?} failed: {e:#}");
                    progress.report_error(&format!("payload {payload:?}: {e}"));
                    if !job_page.driver.is_valid().await
                        && !self
                            .recover_page(request, options, job_page, cancel, &retry)
                            .await
                    {
                        warn!("page lost and not recoverable, stopping early");
                        break;
                    }
                }
            }

            tested += 1;
            let interval = options.logging.progress_update_interval.max(1);
            if options.logging.show_progress && tested % interval == 0 {
                progress.report_progress(tested, payloads.len(), results.len());
            }
        }

        progress.report_completed(tested, results.len());
        Ok(results)
    }

    async fn navigate_to_target(
        &self,
        page: &CdpPage,
        url: &str,
        options: &DetectOptions,
        retry: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<(), DetectError> {
        let timeout = options.timeouts.navigation();
        retry
            .run(RetryOperation::Navigation, "navigate", cancel, move || async move {
                match tokio::time::timeout(timeout, page.navigate(url)).await {
                    Ok(result) => result,
                    Err(_) => anyhow::bail!("navigation timeout after {timeout:?}"),
                }
            })
            .await
            .map_err(|source| DetectError::Navigation {
                url: url.to_string(),
                source,
            })
    }

    /// Payload source precedence: smart selection, then effectiveness
    /// top-K, then caller categories, then caller flat list, then the
    /// built-in default set.
    async fn choose_payloads(
        &self,
        request: &DetectRequest,
        options: &DetectOptions,
        page: &CdpPage,
    ) -> Vec<String> {
        if options.smart_payload_selection.enabled {
            let analysis = match context::analyze(page, &request.url, &request.input_selector).await
            {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!("context analysis failed, assuming HTML: {e:#}");
                    context::analyze_url(&request.url)
                }
            };
            let scores: Option<ScoreIndex> = match (&self.effectiveness, options.effectiveness.use_effective_payloads)
            {
                (Some(store), true) => Some(store.score_index(options.browser).await),
                _ => None,
            };
            let categories = builtin_categories();
            return select_payloads(&SelectionInput {
                analysis,
                browser: options.browser,
                categories: &categories,
                custom: request.payloads.as_ref(),
                scores: scores.as_ref(),
                limit: options.smart_payload_selection.limit,
            });
        }

        if options.effectiveness.use_effective_payloads
            && let Some(store) = &self.effectiveness
        {
            let ranked = store
                .top_k(options.effectiveness.limit, Some(options.browser))
                .await;
            if !ranked.is_empty() {
                return ranked.into_iter().map(|entry| entry.payload).collect();
            }
            debug!("no effectiveness history yet, falling back");
        }

        match &request.payloads {
            Some(input @ PayloadInput::Categorized(_)) => input.flatten_for(options.browser),
            Some(PayloadInput::Flat(list)) => list.clone(),
            None => default_bank(),
        }
    }

    /// Steps (a)-(g) for one payload. `Ok(Some)` is a positive result,
    /// `Ok(None)` a clean test.
    async fn test_one_payload(
        &self,
        request: &DetectRequest,
        options: &DetectOptions,
        job_page: &JobPage,
        payload: &str,
        retry: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<Option<TestResult>> {
        let page = &job_page.driver;
        let fingerprint = TestFingerprint::compute(
            &request.url,
            &request.input_selector,
            payload,
            options.browser,
            options.verify_execution,
            options.submit_selector.as_deref(),
        );

        // (a) cache check
        if options.cache.enabled
            && let Some(cache) = &self.cache
        {
            let max_age = Duration::from_millis(options.cache.max_age_ms);
            if cache.exists(&fingerprint, max_age).await
                && let Some(hit) = cache.get(&fingerprint).await
            {
                if options.cache.verbose {
                    info!("cache hit for {payload:?} ({})", fingerprint.as_str());
                }
                if hit.detected || hit.executed {
                    return Ok(Some(TestResult {
                        payload: payload.to_string(),
                        reflected: hit.detected,
                        executed: hit.executed,
                        url: request.url.clone(),
                        tested_at: Utc::now(),
                        from_cache: true,
                    }));
                }
                return Ok(None);
            }
        }

        // (b) fresh monitor slate for this payload
        monitor::reset(page).await?;

        // (c) fill the input
        let action_timeout = options.timeouts.action();
        let input_selector = request.input_selector.as_str();
        retry
            .run(RetryOperation::Input, "fill input", cancel, move || async move {
                match tokio::time::timeout(action_timeout, page.fill(input_selector, payload)).await
                {
                    Ok(result) => result,
                    Err(_) => anyhow::bail!("fill timeout after {action_timeout:?}"),
                }
            })
            .await?;

        // (d) submit through the fallback chain
        let method = submit::submit(
            page,
            &request.input_selector,
            options.submit_selector.as_deref(),
            retry,
            cancel,
        )
        .await?;
        debug!("submitted via {method:?}");

        // (e) bounded post-submit wait; staying in-page is expected
        tokio::select! {
            _ = tokio::time::timeout(options.timeouts.wait_for(), page.wait_for_navigation()) => {}
            () = cancel.cancelled() => {}
        }

        // (f) observe
        let content = page.content().await.unwrap_or_default();
        let reflected = content.contains(payload);
        let executed = if options.verify_execution {
            cancel.sleep(options.timeouts.execution()).await;
            monitor::executed_verdict(page).await.unwrap_or(false)
        } else {
            false
        };

        // (g) record
        if options.effectiveness.track
            && let Some(store) = &self.effectiveness
        {
            store
                .record(payload, reflected, executed, options.browser)
                .await;
        }
        if options.cache.enabled
            && let Some(cache) = &self.cache
        {
            cache
                .put(&fingerprint, &CachedResult::new(reflected, executed))
                .await;
        }

        if reflected || executed {
            Ok(Some(TestResult {
                payload: payload.to_string(),
                reflected,
                executed,
                url: request.url.clone(),
                tested_at: Utc::now(),
                from_cache: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Replace a dead page mid-job. Only possible in session mode; the
    /// fresh page is re-navigated and re-instrumented.
    async fn recover_page(
        &self,
        request: &DetectRequest,
        options: &DetectOptions,
        job_page: &mut JobPage,
        cancel: &CancelToken,
        retry: &RetryPolicy,
    ) -> bool {
        let Some(name) = job_page.session_name.clone() else {
            return false;
        };
        info!("replacing lost page from session '{name}'");

        if let Some(lease) = job_page.lease.take() {
            lease.discard().await;
        }
        let fresh = async {
            let handle = self.sessions.get_session(&name, options.browser).await?;
            let lease = handle.session.acquire_page().await?;
            let driver = lease.driver();
            self.navigate_to_target(&driver, &request.url, options, retry, cancel)
                .await?;
            monitor::install(&driver).await.map_err(DetectError::MonitorInstall)?;
            Ok::<_, DetectError>((lease, driver))
        };
        match fresh.await {
            Ok((lease, driver)) => {
                job_page.driver = driver;
                job_page.lease = Some(lease);
                job_page.restore_origin_storage(&request.url).await;
                true
            }
            Err(e) => {
                warn!("page recovery failed: {e}");
                false
            }
        }
    }

    async fn teardown(&self, job_page: JobPage, options: &DetectOptions) {
        let JobPage {
            driver,
            lease,
            session_name,
            one_shot,
            ..
        } = job_page;

        if let Some(name) = session_name {
            if options.session.save {
                if let Some(lease) = &lease {
                    match self.sessions.save_storage_state(&name, lease.raw()).await {
                        Ok(path) => debug!("storage state saved to {}", path.display()),
                        Err(e) => warn!("storage state save failed: {e:#}"),
                    }
                }
            }
            if let Some(lease) = lease {
                lease.release().await;
            }
            if options.session.close_after {
                self.sessions.close_session(&name).await;
            }
            return;
        }

        if let Err(e) = driver.close().await {
            debug!("page close during teardown: {e:#}");
        }
        if let Some(mut one_shot) = one_shot {
            one_shot.handler.abort();
            if let Err(e) = one_shot.browser.close().await {
                warn!("browser close failed: {e}");
            }
            let _ = one_shot.browser.wait().await;
            cleanup_profile_dir(&one_shot.profile_dir);
        }
    }
}

struct OneShot {
    browser: chromiumoxide::browser::Browser,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

/// The page a job is currently driving, with enough bookkeeping to
/// release or recover it.
struct JobPage {
    driver: CdpPage,
    lease: Option<PageLease>,
    session_name: Option<String>,
    restored_state: Option<storage_state::StorageState>,
    one_shot: Option<OneShot>,
}

impl JobPage {
    /// Origin storage can only be applied from a document on the origin,
    /// so this runs after target navigation.
    async fn restore_origin_storage(&self, url: &str) {
        let Some(state) = &self.restored_state else {
            return;
        };
        let Ok(parsed) = Url::parse(url) else {
            return;
        };
        let origin = parsed.origin().ascii_serialization();
        if let Some(lease) = &self.lease
            && let Err(e) = storage_state::apply_origin_storage(lease.raw(), state, &origin).await
        {
            warn!("origin storage restore failed: {e:#}");
        }
    }
}

/// Serialize the result list for the external reporter. Only the JSON
/// shape is produced here; other formats are a collaborator's problem.
fn write_report(
    url: &str,
    results: &[TestResult],
    options: &DetectOptions,
) -> Result<Option<PathBuf>> {
    if !options.report.format.eq_ignore_ascii_case("json") {
        debug!("report format {:?} is handled externally", options.report.format);
        return Ok(None);
    }
    std::fs::create_dir_all(&options.report.output_dir).with_context(|| {
        format!("failed to create {}", options.report.output_dir.display())
    })?;
    let filename = options
        .report
        .filename
        .clone()
        .unwrap_or_else(|| format!("xssprobe-{}.json", Utc::now().format("%Y%m%d-%H%M%S")));
    let path = options.report.output_dir.join(filename);
    let document = serde_json::json!({
        "url": url,
        "generatedAt": Utc::now(),
        "findings": results,
    });
    std::fs::write(&path, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("report written to {}", path.display());
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_inputs_before_touching_a_browser() {
        let detector = Detector::new(Arc::new(SessionManager::new()));

        let bad_url = detector
            .detect_xss(
                DetectRequest::new("not-a-url", "input[name=q]"),
                &NoOpProgress,
                CancelToken::never(),
            )
            .await;
        assert!(matches!(bad_url, Err(DetectError::Config(_))));

        let bad_scheme = detector
            .detect_xss(
                DetectRequest::new("ftp://t.example/x", "input[name=q]"),
                &NoOpProgress,
                CancelToken::never(),
            )
            .await;
        assert!(matches!(bad_scheme, Err(DetectError::Config(_))));

        let empty_selector = detector
            .detect_xss(
                DetectRequest::new("http://t.example/x", "  "),
                &NoOpProgress,
                CancelToken::never(),
            )
            .await;
        assert!(matches!(empty_selector, Err(DetectError::Config(_))));
    }

    #[test]
    fn report_writer_honors_format_and_filename() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = DetectOptions::default();
        options.report.output_dir = dir.path().to_path_buf();
        options.report.filename = Some("out.json".into());

        let results = vec![TestResult {
            payload: "<b>x</b>".into(),
            reflected: true,
            executed: false,
            url: "http://t.example/".into(),
            tested_at: Utc::now(),
            from_cache: false,
        }];
        let path = write_report("http://t.example/", &results, &options)
            .unwrap()
            .unwrap();
        assert!(path.ends_with("out.json"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"reflected\": true"));

        options.report.format = "html".into();
        assert!(write_report("http://t.example/", &results, &options).unwrap().is_none());
    }
}
