//! Browser engine discovery and launch
//!
//! Finds an engine executable on the system (env override, well-known
//! install paths, then `which`) or downloads a managed Chromium, and
//! launches it headless with the flag set that keeps per-instance RAM
//! and GPU overhead down. Chromium is driven over CDP; Firefox and
//! WebKit are recognized engines but cannot be launched here, so they
//! fail with an environment error carrying an install hint.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, trace, warn};

use crate::config::BrowserKind;
use crate::error::DetectError;

/// Environment variable overriding executable discovery, per engine.
fn env_override(kind: BrowserKind) -> &'static str {
    match kind {
        BrowserKind::Chromium => "CHROMIUM_PATH",
        BrowserKind::Firefox => "FIREFOX_PATH",
        BrowserKind::Webkit => "WEBKIT_PATH",
    }
}

fn candidate_paths(kind: BrowserKind) -> Vec<&'static str> {
    match kind {
        BrowserKind::Chromium => {
            if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                    "/opt/homebrew/bin/chromium",
                ]
            } else {
                vec![
                    "/usr/bin/google-chrome",
                    "/usr/bin/google-chrome-stable",
                    "/usr/bin/chromium",
                    "/usr/bin/chromium-browser",
                    "/snap/bin/chromium",
                    "/usr/local/bin/chromium",
                    "/opt/google/chrome/chrome",
                ]
            }
        }
        BrowserKind::Firefox => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Firefox.app/Contents/MacOS/firefox"]
            } else {
                vec!["/usr/bin/firefox", "/snap/bin/firefox"]
            }
        }
        BrowserKind::Webkit => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Safari.app/Contents/MacOS/Safari"]
            } else {
                vec!["/usr/bin/MiniBrowser"]
            }
        }
    }
}

fn which_names(kind: BrowserKind) -> &'static [&'static str] {
    match kind {
        BrowserKind::Chromium => &["chromium", "chromium-browser", "google-chrome", "chrome"],
        BrowserKind::Firefox => &["firefox"],
        BrowserKind::Webkit => &["MiniBrowser"],
    }
}

/// Find an engine executable on the system.
pub async fn find_browser_executable(kind: BrowserKind) -> Result<PathBuf> {
    // Environment variable overrides all other methods.
    if let Ok(path) = std::env::var(env_override(kind)) {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("using {kind} from {}: {}", env_override(kind), path.display());
            return Ok(path);
        }
        warn!(
            "{} points to non-existent file: {}",
            env_override(kind),
            path.display()
        );
    }

    for path_str in candidate_paths(kind) {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("found {kind} at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in which_names(kind) {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path_str.is_empty() {
                    let path = PathBuf::from(path_str);
                    info!("found {kind} using 'which': {}", path.display());
                    return Ok(path);
                }
            }
        }
    }

    Err(anyhow::anyhow!("{kind} executable not found"))
}

/// Download a managed Chromium and return the executable path.
pub async fn download_managed_browser() -> Result<PathBuf> {
    info!("downloading managed Chromium browser...");

    let cache_dir = crate::config::data_dir()
        .unwrap_or_else(|_| {
            let fallback = std::env::temp_dir().join("xssprobe_browser_cache");
            warn!(
                "could not determine data directory, using temp fallback: {}",
                fallback.display()
            );
            fallback
        })
        .join("chromium");

    std::fs::create_dir_all(&cache_dir).context("failed to create browser cache directory")?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .context("failed to build fetcher options")?,
    );

    let revision_info = fetcher.fetch().await.context("failed to fetch browser")?;
    info!("downloaded Chromium to: {}", revision_info.folder_path.display());
    Ok(revision_info.executable_path)
}

/// Launch a browser for detection work.
///
/// Returns the browser, the spawned CDP handler task (abort it when the
/// browser is done), and the profile directory in use. The profile dir
/// is unique per instance so concurrent sessions never contend on a
/// Chromium singleton lock.
pub async fn launch_browser(
    kind: BrowserKind,
    user_data_dir: Option<PathBuf>,
) -> Result<(Browser, JoinHandle<()>, PathBuf), DetectError> {
    let executable = resolve_executable(kind).await?;

    let user_data_dir = user_data_dir.unwrap_or_else(|| {
        std::env::temp_dir().join(format!(
            "xssprobe_{}_{}_{:08x}",
            kind,
            std::process::id(),
            rand::random::<u32>()
        ))
    });
    std::fs::create_dir_all(&user_data_dir)
        .context("failed to create user data directory")
        .map_err(DetectError::Other)?;

    let browser_config = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(1280, 800)
        .user_data_dir(user_data_dir.clone())
        .chrome_executable(executable)
        .headless_mode(HeadlessMode::default())
        // Trim per-instance resource footprint: no sandbox helpers, no
        // GPU, no background services the tests never touch.
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--no-zygote")
        .arg("--disable-gpu")
        .arg("--disable-accelerated-2d-canvas")
        .arg("--disable-extensions")
        .arg("--disable-component-extensions-with-background-pages")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-features=TranslateUI")
        .arg("--disable-default-apps")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-breakpad")
        .arg("--disable-hang-monitor")
        .arg("--disable-prompt-on-repost")
        .arg("--metrics-recording-only")
        .arg("--mute-audio")
        .arg("--hide-scrollbars")
        // JS heap ceiling so a hostile page cannot balloon the engine.
        .arg("--js-flags=--max-old-space-size=512")
        .build()
        .map_err(|e| DetectError::Other(anyhow::anyhow!("failed to build browser config: {e}")))?;

    info!("launching {kind} (profile {})", user_data_dir.display());
    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| DetectError::environment(
            format!("failed to launch {kind}: {e}"),
            "verify the browser executable works, or unset the *_PATH override",
        ))?;

    let handler_task = task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                // Chrome emits CDP events chromiumoxide does not model;
                // those deserialization misses are noise, not failures.
                let benign = message
                    .contains("data did not match any variant of untagged enum Message")
                    || message.contains("Failed to deserialize WS response");
                if benign {
                    trace!("suppressed benign CDP serialization error: {message}");
                } else {
                    error!("browser handler error: {e:?}");
                }
            }
        }
        info!("browser handler task completed");
    });

    Ok((browser, handler_task, user_data_dir))
}

async fn resolve_executable(kind: BrowserKind) -> Result<PathBuf, DetectError> {
    match kind {
        BrowserKind::Chromium => match find_browser_executable(kind).await {
            Ok(path) => Ok(path),
            Err(_) => download_managed_browser().await.map_err(|e| {
                DetectError::environment(
                    format!("no Chromium executable found and download failed: {e}"),
                    "install Chromium (e.g. `apt install chromium`) or set CHROMIUM_PATH",
                )
            }),
        },
        BrowserKind::Firefox | BrowserKind::Webkit => {
            // Found or not, these engines do not speak the protocol this
            // engine drives; keep the distinction in the hint.
            let found = find_browser_executable(kind).await.is_ok();
            let message = if found {
                format!("{kind} is installed but cannot be driven over CDP")
            } else {
                format!("{kind} executable not found")
            };
            Err(DetectError::environment(
                message,
                format!("use --browser chromium, or record {kind} results via the HTTP endpoint"),
            ))
        }
    }
}

/// Remove a per-instance profile directory. Best-effort; must run after
/// the engine process has exited so file handles are released.
pub fn cleanup_profile_dir(path: &PathBuf) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!("failed to clean up profile directory {}: {e}", path.display());
    }
}
