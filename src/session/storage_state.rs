//! Storage-state snapshots
//!
//! Serializes a session's cookies plus local/session storage to one JSON
//! file per session name, and re-applies a snapshot to a live page.
//! Cookies travel through CDP and apply at any time; origin storage can
//! only be written from a document on that origin, so the orchestrator
//! re-applies it after navigating.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageItem {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OriginStorage {
    pub origin: String,
    pub local_storage: Vec<StorageItem>,
    pub session_storage: Vec<StorageItem>,
}

/// One session's persisted browser state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageState {
    /// Raw CDP cookie objects; kept as JSON so snapshot files survive
    /// protocol field additions.
    pub cookies: Vec<serde_json::Value>,
    pub origins: Vec<OriginStorage>,
}

/// Directory holding one snapshot file per session name.
pub fn sessions_dir() -> Result<PathBuf> {
    let dir = crate::config::data_dir()?.join("sessions");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn snapshot_path(name: &str) -> Result<PathBuf> {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    Ok(sessions_dir()?.join(format!("{safe}.json")))
}

const CAPTURE_STORAGE_JS: &str = r#"
JSON.stringify((() => {
    const entries = store => {
        const out = [];
        try {
            for (let i = 0; i < store.length; i++) {
                const name = store.key(i);
                out.push({ name, value: store.getItem(name) || '' });
            }
        } catch (e) { }
        return out;
    };
    return {
        origin: location.origin,
        localStorage: entries(window.localStorage),
        sessionStorage: entries(window.sessionStorage)
    };
})())
"#;

/// Capture the page's cookies and the current origin's storage.
pub async fn capture(page: &Page) -> Result<StorageState> {
    let cookies = page
        .get_cookies()
        .await
        .context("failed to read cookies")?
        .into_iter()
        .filter_map(|cookie| serde_json::to_value(cookie).ok())
        .collect();

    let mut origins = Vec::new();
    match page.evaluate(CAPTURE_STORAGE_JS).await {
        Ok(result) => {
            if let Some(text) = result.value().and_then(|v| v.as_str())
                && let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text)
            {
                let origin = parsed["origin"].as_str().unwrap_or_default().to_string();
                let items = |key: &str| -> Vec<StorageItem> {
                    serde_json::from_value(parsed[key].clone()).unwrap_or_default()
                };
                if !origin.is_empty() && origin != "null" {
                    origins.push(OriginStorage {
                        origin,
                        local_storage: items("localStorage"),
                        session_storage: items("sessionStorage"),
                    });
                }
            }
        }
        Err(e) => warn!("storage capture skipped: {e}"),
    }

    Ok(StorageState { cookies, origins })
}

/// Re-apply snapshot cookies to a page. Malformed entries are skipped so
/// an old snapshot never blocks a session.
pub async fn apply_cookies(page: &Page, state: &StorageState) -> Result<()> {
    let params: Vec<CookieParam> = state
        .cookies
        .iter()
        .filter_map(|value| serde_json::from_value(value.clone()).ok())
        .collect();
    if params.is_empty() {
        return Ok(());
    }
    let count = params.len();
    page.execute(SetCookiesParams::new(params))
        .await
        .context("failed to set session cookies")?;
    debug!("restored {count} cookies");
    Ok(())
}

/// Re-apply local/session storage for the origin the page currently sits
/// on. Call after navigation; other origins in the snapshot are ignored.
pub async fn apply_origin_storage(page: &Page, state: &StorageState, origin: &str) -> Result<()> {
    let Some(entry) = state.origins.iter().find(|o| o.origin == origin) else {
        return Ok(());
    };
    let script = format!(
        r#"(() => {{
            const apply = (store, items) => {{
                try {{ for (const item of items) {{ store.setItem(item.name, item.value); }} }} catch (e) {{ }}
            }};
            apply(window.localStorage, {local});
            apply(window.sessionStorage, {session});
        }})()"#,
        local = serde_json::to_string(&entry.local_storage)?,
        session = serde_json::to_string(&entry.session_storage)?,
    );
    page.evaluate(script).await.context("failed to restore origin storage")?;
    debug!("restored storage for {origin}");
    Ok(())
}

/// Persist a snapshot for a session name, returning the file path.
pub fn save(name: &str, state: &StorageState) -> Result<PathBuf> {
    let path = snapshot_path(name)?;
    let text = serde_json::to_string_pretty(state)?;
    std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    debug!("saved storage state for session '{name}' to {}", path.display());
    Ok(path)
}

/// Load a snapshot, or None when the session has never been saved.
pub fn load(name: &str) -> Result<Option<StorageState>> {
    let path = snapshot_path(name)?;
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let state = serde_json::from_str(&text)
        .with_context(|| format!("snapshot {} is not valid JSON", path.display()))?;
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_json() {
        let state = StorageState {
            cookies: vec![serde_json::json!({"name": "sid", "value": "abc", "domain": "t.example"})],
            origins: vec![OriginStorage {
                origin: "http://t.example".into(),
                local_storage: vec![StorageItem {
                    name: "token".into(),
                    value: "v1".into(),
                }],
                session_storage: vec![],
            }],
        };
        let text = serde_json::to_string(&state).unwrap();
        let back: StorageState = serde_json::from_str(&text).unwrap();
        assert_eq!(back.cookies.len(), 1);
        assert_eq!(back.origins[0].local_storage[0].name, "token");
    }

    #[test]
    fn snapshot_names_are_filesystem_safe() {
        let path = snapshot_path("job http://evil/../x").unwrap();
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(!file.contains('/'));
        assert!(!file.contains(".."));
        assert!(file.ends_with(".json"));
    }
}
