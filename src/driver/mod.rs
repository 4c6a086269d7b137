//! Page capability abstraction
//!
//! The orchestrator, monitor host, context analyzer and submission chain
//! depend on this narrow capability set rather than on chromiumoxide
//! directly, so the browser engine stays swappable and tests can run
//! against fakes.

pub mod cdp;

pub use cdp::CdpPage;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// The capability set a detection job needs from a browser page.
///
/// Everything beyond these calls (form submit, change dispatch, storage
/// clearing) is expressed as `evaluate` scripts by the callers.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to an absolute URL and wait for the load to commit.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Wait for the next navigation to settle (post-submit).
    async fn wait_for_navigation(&self) -> Result<()>;

    /// Clear the matched input and type the value into it.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Click the first element matching the selector.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Press ENTER with the matched element focused.
    async fn press_enter(&self, selector: &str) -> Result<()>;

    /// Evaluate a JS expression, returning its JSON value (Null when the
    /// expression produces none).
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Current serialized HTML of the document.
    async fn content(&self) -> Result<String>;

    /// Register a script evaluated in every frame before document load.
    async fn add_init_script(&self, source: &str) -> Result<()>;

    /// Replace the document content (used by the HTTP endpoint analysis).
    async fn set_content(&self, html: &str) -> Result<()>;

    /// Close the page.
    async fn close(&self) -> Result<()>;

    /// Validity probe: true when the page still answers trivial queries.
    async fn is_valid(&self) -> bool {
        matches!(
            self.evaluate("1 + 1").await,
            Ok(value) if value.as_i64() == Some(2)
        )
    }
}
