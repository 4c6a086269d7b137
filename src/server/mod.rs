//! HTTP submission endpoint
//!
//! Lets third-party scanners submit captured responses for analysis:
//! `POST /` with base64 byte fields, `GET /health`, `GET /metrics`.
//! Status codes: 200 XSS found, 201 clean, 400 validation, 429 rate
//! limited (with retryAfter), 500 internal, 503 capacity exceeded.

pub mod analysis;

pub use analysis::{EnhancedResult, Severity, analyze_response};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::browser_setup::find_browser_executable;
use crate::config::BrowserKind;
use crate::session::SessionManager;

/// Requests accepted per fixed one-minute window.
const RATE_LIMIT_PER_MINUTE: u32 = 120;
/// Concurrent submissions before the server sheds load.
const MAX_CONCURRENT_REQUESTS: usize = 20;

#[derive(Default)]
struct Metrics {
    total_requests: AtomicU64,
    found: AtomicU64,
    clean: AtomicU64,
    validation_errors: AtomicU64,
    rate_limited: AtomicU64,
}

impl Metrics {
    fn snapshot(&self) -> Value {
        let total = self.total_requests.load(Ordering::Relaxed);
        let found = self.found.load(Ordering::Relaxed);
        let clean = self.clean.load(Ordering::Relaxed);
        let success = found + clean;
        json!({
            "totalRequests": total,
            "found": found,
            "clean": clean,
            "validationErrors": self.validation_errors.load(Ordering::Relaxed),
            "rateLimited": self.rate_limited.load(Ordering::Relaxed),
            "successRate": if total == 0 { 1.0 } else { success as f64 / total as f64 },
        })
    }
}

struct RateWindow {
    window_start: Instant,
    count: u32,
}

struct AppState {
    started: Instant,
    active_requests: AtomicUsize,
    metrics: Metrics,
    rate: Mutex<RateWindow>,
    sessions: Arc<SessionManager>,
}

/// `POST /` body; byte-carrying fields are base64-encoded.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    http_response: String,
    http_url: String,
    #[serde(default)]
    http_headers: Option<String>,
    payload: String,
    #[serde(default)]
    browser: Option<String>,
    #[serde(default)]
    options: Option<Value>,
}

fn decode_field(name: &str, value: &str) -> Result<String, String> {
    let bytes = BASE64
        .decode(value)
        .map_err(|e| format!("field '{name}' is not valid base64: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("field '{name}' is not valid UTF-8: {e}"))
}

/// Build the router; exposed separately so tests can drive it without a
/// socket.
pub fn app(sessions: Arc<SessionManager>) -> axum::Router {
    let state = Arc::new(AppState {
        started: Instant::now(),
        active_requests: AtomicUsize::new(0),
        metrics: Metrics::default(),
        rate: Mutex::new(RateWindow {
            window_start: Instant::now(),
            count: 0,
        }),
        sessions,
    });

    axum::Router::new()
        .route("/", post(submit))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the process exits.
pub async fn serve(addr: SocketAddr, sessions: Arc<SessionManager>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("submission endpoint listening on {addr}");
    axum::serve(listener, app(sessions)).await?;
    Ok(())
}

async fn submit(
    State(state): State<Arc<AppState>>,
    body: Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

    // Load shedding before anything else.
    let active = state.active_requests.fetch_add(1, Ordering::SeqCst) + 1;
    let _guard = scopeguard(&state);
    if active > MAX_CONCURRENT_REQUESTS {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "value": 0, "msg": "capacity exceeded, retry later" })),
        );
    }

    // Fixed-window rate limit.
    {
        let mut rate = state.rate.lock();
        if rate.window_start.elapsed().as_secs() >= 60 {
            rate.window_start = Instant::now();
            rate.count = 0;
        }
        rate.count += 1;
        if rate.count > RATE_LIMIT_PER_MINUTE {
            let retry_after = 60u64.saturating_sub(rate.window_start.elapsed().as_secs());
            state.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "value": 0,
                    "msg": "rate limit exceeded",
                    "retryAfter": retry_after.max(1),
                })),
            );
        }
    }

    let request: SubmitRequest = match serde_json::from_value(body.0) {
        Ok(r) => r,
        Err(e) => {
            state.metrics.validation_errors.fetch_add(1, Ordering::Relaxed);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "value": 0, "msg": format!("invalid request body: {e}") })),
            );
        }
    };

    let decoded = (|| -> Result<(String, String, String), String> {
        let response = decode_field("httpResponse", &request.http_response)?;
        let url = decode_field("httpUrl", &request.http_url)?;
        let payload = decode_field("payload", &request.payload)?;
        if let Some(headers) = &request.http_headers {
            decode_field("httpHeaders", headers)?;
        }
        if payload.is_empty() {
            return Err("payload must not be empty".to_string());
        }
        Ok((response, url, payload))
    })();

    let (response_body, url, payload) = match decoded {
        Ok(parts) => parts,
        Err(msg) => {
            state.metrics.validation_errors.fetch_add(1, Ordering::Relaxed);
            return (StatusCode::BAD_REQUEST, Json(json!({ "value": 0, "msg": msg })));
        }
    };

    if let Some(browser) = &request.browser
        && browser.parse::<BrowserKind>().is_err()
    {
        state.metrics.validation_errors.fetch_add(1, Ordering::Relaxed);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "value": 0, "msg": format!("unknown browser '{browser}'") })),
        );
    }
    // `options` is accepted for forward compatibility; analysis of a
    // captured response has no knobs yet.
    let _ = request.options;

    let start = Instant::now();
    let enhanced = analyze_response(&response_body, &url, &payload, start.elapsed().as_millis() as u64);

    let (status, value, msg) = if enhanced.detected || enhanced.executed {
        state.metrics.found.fetch_add(1, Ordering::Relaxed);
        (StatusCode::OK, 1, "XSS detected")
    } else {
        state.metrics.clean.fetch_add(1, Ordering::Relaxed);
        (StatusCode::CREATED, 0, "no XSS detected")
    };

    match serde_json::to_value(&enhanced) {
        Ok(enhanced_json) => (
            status,
            Json(json!({ "value": value, "msg": msg, "enhanced": enhanced_json })),
        ),
        Err(e) => {
            warn!("failed to serialize analysis: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "value": 0, "msg": "internal error" })),
            )
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut available = Vec::new();
    for kind in BrowserKind::ALL {
        if find_browser_executable(kind).await.is_ok() {
            available.push(kind.as_str());
        }
    }

    let sessions = state.sessions.list_sessions().await;
    let mut pool = serde_json::Map::new();
    for kind in BrowserKind::ALL {
        pool.insert(kind.as_str().to_string(), json!({ "contexts": 0 }));
    }
    pool.insert("sessions".to_string(), json!(sessions));

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": state.started.elapsed().as_secs(),
        "memory": { "residentBytes": resident_bytes() },
        "activeRequests": state.active_requests.load(Ordering::Relaxed),
        "maxConcurrentPages": MAX_CONCURRENT_REQUESTS,
        "availableBrowsers": available,
        "metrics": state.metrics.snapshot(),
        "browserPool": Value::Object(pool),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.metrics.snapshot())
}

/// Resident set size, best-effort (0 where /proc is unavailable).
fn resident_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|text| {
            let pages: u64 = text.split_whitespace().nth(1)?.parse().ok()?;
            Some(pages * 4096)
        })
        .unwrap_or(0)
}

struct ActiveGuard<'a>(&'a AppState);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

fn scopeguard(state: &AppState) -> ActiveGuard<'_> {
    ActiveGuard(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_field_rejects_bad_base64() {
        assert!(decode_field("payload", "aGVsbG8=").is_ok());
        assert_eq!(decode_field("payload", "aGVsbG8=").unwrap(), "hello");
        assert!(decode_field("payload", "!!not-base64!!").is_err());
    }

    #[test]
    fn metrics_success_rate() {
        let metrics = Metrics::default();
        assert_eq!(metrics.snapshot()["successRate"], json!(1.0));
        metrics.total_requests.store(4, Ordering::Relaxed);
        metrics.found.store(1, Ordering::Relaxed);
        metrics.clean.store(2, Ordering::Relaxed);
        assert_eq!(metrics.snapshot()["successRate"], json!(0.75));
    }
}
