//! Persisted default options
//!
//! A single JSON document under the user's home config directory holds
//! the defaults applied to every job. Merge order is fixed: persisted
//! values lose to anything the caller provides for the same key.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::types::DetectOptions;

/// On-disk config document manager.
///
/// The document is partial by design: only keys the user has set are
/// stored, everything else falls back to [`DetectOptions::default`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the default user-home location
    /// (`~/.config/xssprobe/config.json` on Linux).
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("xssprobe");
        Ok(Self {
            path: dir.join("config.json"),
        })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted document, or an empty object when missing or
    /// unreadable. Store problems never fail a job.
    pub fn load_raw(&self) -> Value {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    warn!("persisted config at {} is invalid: {e}", self.path.display());
                    Value::Object(Default::default())
                }
            },
            Err(_) => Value::Object(Default::default()),
        }
    }

    /// Load persisted defaults as typed options.
    pub fn load(&self) -> DetectOptions {
        serde_json::from_value(self.load_raw()).unwrap_or_default()
    }

    /// Merge `provided` (a partial document) over the persisted defaults
    /// and return the resolved options. Persisted < provided: any key
    /// present in `provided` wins, recursively.
    pub fn resolve(&self, provided: &Value) -> Result<DetectOptions> {
        let mut merged = self.load_raw();
        deep_merge(&mut merged, provided);
        serde_json::from_value(merged).context("merged options document is invalid")
    }

    /// Persist the given options back as the new defaults, sans per-run
    /// filenames. Creates the config directory if missing.
    pub fn persist(&self, options: &DetectOptions) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let doc = serde_json::to_string_pretty(&options.for_persistence())?;
        std::fs::write(&self.path, doc)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        debug!("persisted config to {}", self.path.display());
        Ok(())
    }

    /// Remove the persisted document, restoring built-in defaults.
    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// Recursive object merge: keys in `overlay` replace keys in `base`;
/// nested objects merge key by key, everything else is replaced wholesale.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) if base_value.is_object() && overlay_value.is_object() => {
                        deep_merge(base_value, overlay_value);
                    }
                    _ => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_overlay_wins_recursively() {
        let mut base = json!({"cache": {"enabled": false, "maxAgeMs": 100}, "browser": "chromium"});
        let overlay = json!({"cache": {"enabled": true}});
        deep_merge(&mut base, &overlay);
        assert_eq!(base["cache"]["enabled"], json!(true));
        assert_eq!(base["cache"]["maxAgeMs"], json!(100));
        assert_eq!(base["browser"], json!("chromium"));
    }

    #[test]
    fn resolve_applies_persisted_then_provided() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("config.json"));

        let mut persisted = DetectOptions::default();
        persisted.cache.enabled = true;
        persisted.cache.max_age_ms = 42;
        store.persist(&persisted).unwrap();

        let provided = json!({"cache": {"maxAgeMs": 7}});
        let resolved = store.resolve(&provided).unwrap();
        assert!(resolved.cache.enabled, "persisted value survives");
        assert_eq!(resolved.cache.max_age_ms, 7, "provided value wins");
    }

    #[test]
    fn missing_document_resolves_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("missing.json"));
        let resolved = store.resolve(&json!({})).unwrap();
        assert_eq!(resolved.retry.max_attempts, 3);
    }

    #[test]
    fn reset_removes_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("config.json"));
        store.persist(&DetectOptions::default()).unwrap();
        assert!(store.path().exists());
        store.reset().unwrap();
        assert!(!store.path().exists());
    }
}
