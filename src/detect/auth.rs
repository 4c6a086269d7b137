//! Declarative login
//!
//! Runs the configured login recipe before testing: navigate, fill
//! credentials, click submit, wait for the dust to settle, optionally
//! confirm with a user-supplied probe. Best-effort throughout — a failed
//! login is logged and the job continues unauthenticated.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AuthOptions;
use crate::driver::PageDriver;

/// Execute the login recipe. `Ok(true)` means authenticated (or no probe
/// configured and every step succeeded), `Ok(false)` means the probe
/// said no. Errors from individual steps are returned for the caller to
/// log; they never abort the job.
pub async fn authenticate(
    page: &dyn PageDriver,
    auth: &AuthOptions,
    settle_timeout: Duration,
) -> Result<bool> {
    info!("authenticating at {}", auth.url);

    page.navigate(&auth.url)
        .await
        .context("login page navigation failed")?;

    page.fill(&auth.username_selector, &auth.username)
        .await
        .context("username fill failed")?;
    page.fill(&auth.password_selector, &auth.password)
        .await
        .context("password fill failed")?;
    page.click(&auth.submit_selector)
        .await
        .context("login submit failed")?;

    // Wait for the post-login load; a quiet page is not a failure.
    if tokio::time::timeout(settle_timeout, page.wait_for_navigation())
        .await
        .is_err()
    {
        warn!("login navigation did not settle within {settle_timeout:?}, continuing");
    }

    if let Some(check) = &auth.is_logged_in_check {
        let value = page
            .evaluate(check)
            .await
            .context("is-logged-in probe failed")?;
        let logged_in = match &value {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.is_empty(),
            serde_json::Value::Number(n) => n.as_f64() != Some(0.0),
            _ => true,
        };
        if !logged_in {
            warn!("is-logged-in probe returned falsy, continuing unauthenticated");
        }
        return Ok(logged_in);
    }

    Ok(true)
}
