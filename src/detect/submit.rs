//! Form submission fallback chain
//!
//! Pages submit search forms in wildly different ways; the chain tries
//! each strategy in a fixed order until one sticks. Every step goes
//! through the retry policy under the 'submission' operation class, and
//! a step's exhausted retries simply advance the chain.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::config::RetryOperation;
use crate::driver::PageDriver;

use super::cancel::CancelToken;
use super::retry::RetryPolicy;

/// Which strategy ended up submitting the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitMethod {
    SubmitClick,
    EnterKey,
    FormSubmit,
    ChangeEvent,
}

fn form_submit_script(input_selector: &str) -> Result<String> {
    Ok(format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) {{ throw new Error('no node found'); }} \
         const form = el.closest('form'); \
         if (!form) {{ throw new Error('no enclosing form found'); }} \
         form.submit(); return true; }})()",
        sel = serde_json::to_string(input_selector)?
    ))
}

fn change_event_script(input_selector: &str) -> Result<String> {
    Ok(format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) {{ throw new Error('no node found'); }} \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
        sel = serde_json::to_string(input_selector)?
    ))
}

/// Submit the form holding `input_selector`.
///
/// Order: configured submit-selector click, ENTER on the input, the
/// enclosing form's `submit()`, then a bubbling change event. Fails only
/// when every strategy failed.
pub async fn submit(
    page: &dyn PageDriver,
    input_selector: &str,
    submit_selector: Option<&str>,
    retry: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<SubmitMethod> {
    let mut failures: Vec<String> = Vec::new();

    if let Some(selector) = submit_selector {
        let attempt = retry
            .run(RetryOperation::Submission, "submit click", cancel, move || async move {
                page.click(selector).await
            })
            .await;
        match attempt {
            Ok(()) => return Ok(SubmitMethod::SubmitClick),
            Err(e) => {
                debug!("submit click failed, falling through: {e:#}");
                failures.push(format!("click {selector}: {e}"));
            }
        }
    }

    let attempt = retry
        .run(RetryOperation::Submission, "submit enter", cancel, move || async move {
            page.press_enter(input_selector).await
        })
        .await;
    match attempt {
        Ok(()) => return Ok(SubmitMethod::EnterKey),
        Err(e) => {
            debug!("ENTER submit failed, falling through: {e:#}");
            failures.push(format!("enter: {e}"));
        }
    }

    let script = form_submit_script(input_selector)?;
    let attempt = retry
        .run(RetryOperation::Submission, "form.submit", cancel, move || {
            let script = script.clone();
            async move {
                let value = page.evaluate(&script).await?;
                anyhow::ensure!(value.as_bool() == Some(true), "form.submit() returned nothing");
                Ok(())
            }
        })
        .await;
    match attempt {
        Ok(()) => return Ok(SubmitMethod::FormSubmit),
        Err(e) => {
            debug!("form.submit failed, falling through: {e:#}");
            failures.push(format!("form.submit: {e}"));
        }
    }

    let script = change_event_script(input_selector)?;
    let attempt = retry
        .run(RetryOperation::Submission, "change event", cancel, move || {
            let script = script.clone();
            async move {
                let value = page.evaluate(&script).await?;
                anyhow::ensure!(value.as_bool() == Some(true), "change dispatch returned nothing");
                Ok(())
            }
        })
        .await;
    match attempt {
        Ok(()) => Ok(SubmitMethod::ChangeEvent),
        Err(e) => {
            failures.push(format!("change: {e}"));
            anyhow::bail!("all submission strategies failed: {}", failures.join("; "))
        }
    }
}
