//! chromiumoxide-backed [`PageDriver`]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use serde_json::Value;

use super::PageDriver;

/// A CDP page handle.
///
/// `Page` is an `Arc`-style handle internally, so this wrapper is cheap
/// to clone and the underlying target survives until closed explicitly.
#[derive(Debug, Clone)]
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// The raw chromiumoxide page, for callers that need engine-specific
    /// operations (cookies, storage state).
    pub fn inner(&self) -> &Page {
        &self.page
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigation to {url} failed"))?;
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<()> {
        self.page
            .wait_for_navigation()
            .await
            .context("wait for navigation failed")?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no node found for selector {selector}"))?;
        element
            .click()
            .await
            .with_context(|| format!("focusing {selector} failed"))?;
        // Clear any previous payload so fills don't accumulate across tests.
        self.page
            .evaluate(format!(
                "(() => {{ const el = document.querySelector({sel}); if (el) {{ el.value = ''; }} }})()",
                sel = serde_json::to_string(selector)?
            ))
            .await
            .context("clearing input failed")?;
        element
            .type_str(value)
            .await
            .with_context(|| format!("typing into {selector} failed"))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page
            .find_element(selector)
            .await
            .with_context(|| format!("no node found for selector {selector}"))?
            .click()
            .await
            .with_context(|| format!("click on {selector} failed"))?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<()> {
        self.page
            .find_element(selector)
            .await
            .with_context(|| format!("no node found for selector {selector}"))?
            .press_key("Enter")
            .await
            .with_context(|| format!("pressing ENTER on {selector} failed"))?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .context("evaluate failed")?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.context("content read failed")
    }

    async fn add_init_script(&self, source: &str) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams {
                source: source.to_string(),
                include_command_line_api: None,
                world_name: None,
                run_immediately: None,
            })
            .await
            .context("failed to register init script")?;
        Ok(())
    }

    async fn set_content(&self, html: &str) -> Result<()> {
        self.page
            .set_content(html)
            .await
            .context("set_content failed")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .context("page close failed")?;
        Ok(())
    }
}
