//! Configuration: the option tree and its persisted defaults.

pub mod store;
pub mod types;

pub use store::{ConfigStore, deep_merge};
pub use types::{
    AuthOptions, BrowserKind, CacheOptions, DetectOptions, EffectivenessOptions, LoggingOptions,
    ReportOptions, RetryOperation, RetryOptions, SessionOptions, SmartSelectionOptions,
    TimeoutOptions,
};

use std::path::PathBuf;

/// Application data directory (`~/.local/share/xssprobe` on Linux),
/// created on demand. Holds the effectiveness document, the cache
/// directory, and session snapshots.
pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("could not determine user data directory"))?
        .join("xssprobe");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
