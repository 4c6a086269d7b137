//! Named browser sessions with page pooling
//!
//! A session is one launched browser plus a small pool of recycleable
//! pages, registered under a name so consecutive jobs (and jobs sharing
//! a scheduler run) amortize the launch cost and keep authentication
//! state. The registry is process-wide; per-name entries coalesce
//! concurrent acquisitions so an engine never launches twice for one
//! name.

pub mod storage_state;

pub use storage_state::{StorageState, apply_cookies, apply_origin_storage};

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser_setup::{cleanup_profile_dir, launch_browser};
use crate::config::BrowserKind;
use crate::driver::CdpPage;
use crate::error::DetectError;

/// Maximum pages kept for reuse per session.
pub const PAGE_POOL_CAP: usize = 5;

/// One live session: a browser, its CDP handler task, and the page pool.
#[derive(Debug)]
pub struct SessionInner {
    pub name: String,
    pub kind: BrowserKind,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    profile_dir: PathBuf,
    pool: Mutex<Vec<Page>>,
}

impl SessionInner {
    /// Pop a pooled page or open a fresh blank one.
    pub async fn acquire_page(self: &Arc<Self>) -> Result<PageLease> {
        let pooled = self.pool.lock().await.pop();
        let page = match pooled {
            Some(page) => {
                debug!("session '{}': reusing pooled page", self.name);
                page
            }
            None => {
                let guard = self.browser.lock().await;
                let browser = guard
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("session '{}' already closed", self.name))?;
                browser
                    .new_page("about:blank")
                    .await
                    .context("failed to open page")?
            }
        };
        Ok(PageLease {
            page: Some(page),
            session: Arc::clone(self),
        })
    }

    /// Return a page to the pool after probing and resetting it. Invalid
    /// pages, reset failures, and a full pool all close the page instead.
    pub async fn release_page(&self, page: Page) {
        let valid = matches!(
            page.evaluate("1 + 1").await,
            Ok(result) if result.value().and_then(|v| v.as_i64()) == Some(2)
        );
        if !valid {
            debug!("session '{}': discarding invalid page", self.name);
            close_page(page).await;
            return;
        }

        // Reset: wipe origin storage while still on it, then park on blank.
        let reset = async {
            page.evaluate(
                "(() => { try { localStorage.clear(); sessionStorage.clear(); } catch (e) { } })()",
            )
            .await?;
            page.goto("about:blank").await?;
            anyhow::Ok(())
        };
        if let Err(e) = reset.await {
            warn!("session '{}': page reset failed, closing: {e}", self.name);
            close_page(page).await;
            return;
        }

        let mut pool = self.pool.lock().await;
        if pool.len() < PAGE_POOL_CAP {
            pool.push(page);
            debug!("session '{}': page pooled ({} held)", self.name, pool.len());
        } else {
            drop(pool);
            debug!("session '{}': pool full, closing page", self.name);
            close_page(page).await;
        }
    }

    pub async fn pooled_pages(&self) -> usize {
        self.pool.lock().await.len()
    }

    async fn shutdown(&self) {
        for page in self.pool.lock().await.drain(..) {
            close_page(page).await;
        }
        if let Some(handle) = self.handler.lock().await.take() {
            handle.abort();
        }
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!("session '{}': browser close failed: {e}", self.name);
            }
            let _ = browser.wait().await;
        }
        cleanup_profile_dir(&self.profile_dir);
        info!("session '{}' closed", self.name);
    }
}

async fn close_page(page: Page) {
    if let Err(e) = page.close().await {
        debug!("page close failed (already gone?): {e}");
    }
}

/// Exclusive lend of one page. Dropping the lease returns the page to
/// its session's pool in the background; call [`release`](Self::release)
/// to do it inline, or [`discard`](Self::discard) for a dirty page.
pub struct PageLease {
    page: Option<Page>,
    session: Arc<SessionInner>,
}

impl PageLease {
    pub fn driver(&self) -> CdpPage {
        CdpPage::new(self.page.clone().expect("lease already released"))
    }

    pub fn raw(&self) -> &Page {
        self.page.as_ref().expect("lease already released")
    }

    /// Release back to the pool, probing and resetting first.
    pub async fn release(mut self) {
        if let Some(page) = self.page.take() {
            self.session.release_page(page).await;
        }
    }

    /// Close the page instead of pooling it.
    pub async fn discard(mut self) {
        if let Some(page) = self.page.take() {
            close_page(page).await;
        }
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(page) = self.page.take()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let session = Arc::clone(&self.session);
            handle.spawn(async move {
                session.release_page(page).await;
            });
        }
    }
}

/// What `get_session` hands back.
pub struct SessionHandle {
    pub session: Arc<SessionInner>,
    /// True when the name was already live (no launch happened).
    pub is_existing: bool,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Arc<Mutex<Option<Arc<SessionInner>>>>>,
}

/// Process-wide session registry.
///
/// Names map to slots; the slot lock is held across health check and
/// launch, so two concurrent `get_session("a", ...)` calls coalesce into
/// one engine launch while `get_session("b", ...)` proceeds untouched.
#[derive(Default)]
pub struct SessionManager {
    registry: Mutex<Registry>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or launch the named session.
    ///
    /// A live session under the same name but a different engine is
    /// closed first; the name always denotes at most one engine.
    pub async fn get_session(
        &self,
        name: &str,
        kind: BrowserKind,
    ) -> Result<SessionHandle, DetectError> {
        let slot = {
            let mut registry = self.registry.lock().await;
            Arc::clone(
                registry
                    .entries
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };

        let mut guard = slot.lock().await;

        if let Some(session) = guard.as_ref() {
            if session.kind != kind {
                info!(
                    "session '{name}': engine switch {} -> {kind}, relaunching",
                    session.kind
                );
                session.shutdown().await;
                *guard = None;
            } else {
                // Health check; a dead browser is replaced transparently.
                let healthy = {
                    let browser = session.browser.lock().await;
                    match browser.as_ref() {
                        Some(b) => b.version().await.is_ok(),
                        None => false,
                    }
                };
                if healthy {
                    return Ok(SessionHandle {
                        session: Arc::clone(session),
                        is_existing: true,
                    });
                }
                warn!("session '{name}': browser failed health check, relaunching");
                session.shutdown().await;
                *guard = None;
            }
        }

        let (browser, handler, profile_dir) = launch_browser(kind, None).await?;
        let session = Arc::new(SessionInner {
            name: name.to_string(),
            kind,
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler)),
            profile_dir,
            pool: Mutex::new(Vec::new()),
        });
        *guard = Some(Arc::clone(&session));
        info!("session '{name}' launched ({kind})");
        Ok(SessionHandle {
            session,
            is_existing: false,
        })
    }

    /// Close and forget the named session. Returns false when unknown.
    pub async fn close_session(&self, name: &str) -> bool {
        let slot = {
            let mut registry = self.registry.lock().await;
            registry.entries.remove(name)
        };
        match slot {
            Some(slot) => {
                let mut guard = slot.lock().await;
                if let Some(session) = guard.take() {
                    session.shutdown().await;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    pub async fn session_exists(&self, name: &str) -> bool {
        let registry = self.registry.lock().await;
        match registry.entries.get(name) {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut names = Vec::new();
        for (name, slot) in &registry.entries {
            if slot.lock().await.is_some() {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    /// Close every live session (process shutdown).
    pub async fn shutdown(&self) {
        let names = self.list_sessions().await;
        for name in names {
            self.close_session(&name).await;
        }
    }

    /// Serialize the page's cookies and storage under the session name.
    pub async fn save_storage_state(&self, name: &str, page: &Page) -> Result<PathBuf> {
        let state = storage_state::capture(page).await?;
        storage_state::save(name, &state)
    }

    /// Load the persisted snapshot for a session name, if any.
    pub fn load_storage_state(&self, name: &str) -> Result<Option<StorageState>> {
        storage_state::load(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_session_close_and_exists() {
        let manager = SessionManager::new();
        assert!(!manager.session_exists("nope").await);
        assert!(!manager.close_session("nope").await);
        assert!(manager.list_sessions().await.is_empty());
    }
}
