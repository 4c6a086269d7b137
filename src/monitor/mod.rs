//! In-page execution monitor host
//!
//! The agent (`agent.js`) is a source-text blob the engine compiles into
//! every frame before the page's own script runs. It maintains a state
//! bag on `window.__xssprobe`; this module reads it back with short
//! evaluate queries. The bag's shape is a versioned protocol — the host
//! never re-parses the blob.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::PageDriver;

/// The injected instrumentation source.
pub const AGENT_SOURCE: &str = include_str!("agent.js");

const STATE_EXPR: &str = "JSON.stringify(window.__xssprobe || null)";

/// The executed-verdict contract: dialogs, suspicious console use,
/// injected scripts, or injected event handlers. Network egress and CSP
/// violations feed the richer report but not the boolean.
const VERDICT_EXPR: &str = "(() => { const s = window.__xssprobe; \
    return !!s && (s.dialogs.length > 0 || s.consoleCalls.length > 0 \
    || s.scriptInjections.length > 0 || s.eventHandlerInjections.length > 0); })()";

const RESET_EXPR: &str = "(() => { const s = window.__xssprobe; if (!s) { return false; } \
    s.detected = false; \
    for (const key of ['dialogs','consoleCalls','scriptInjections','eventHandlerInjections',\
'networkRequests','errors','cspViolations']) { s[key].length = 0; } return true; })()";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub time: f64,
    pub stack: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsoleRecord {
    pub args: Vec<String>,
    pub time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptInjection {
    pub content: String,
    pub src: String,
    pub time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventHandlerInjection {
    pub tag: String,
    pub attribute: String,
    pub value: String,
    pub time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    pub time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeError {
    pub message: String,
    pub filename: String,
    pub lineno: u64,
    pub colno: u64,
    pub stack: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CspViolation {
    pub violated_directive: String,
    pub blocked_uri: String,
    pub time: f64,
}

/// Everything the agent observed since the last reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorState {
    pub version: u32,
    pub detected: bool,
    pub dialogs: Vec<DialogRecord>,
    pub console_calls: Vec<ConsoleRecord>,
    pub script_injections: Vec<ScriptInjection>,
    pub event_handler_injections: Vec<EventHandlerInjection>,
    pub network_requests: Vec<NetworkRequest>,
    pub errors: Vec<RuntimeError>,
    pub csp_violations: Vec<CspViolation>,
}

impl MonitorState {
    /// The verdict contract, computed host-side from a captured state.
    pub fn executed(&self) -> bool {
        !self.dialogs.is_empty()
            || !self.console_calls.is_empty()
            || !self.script_injections.is_empty()
            || !self.event_handler_injections.is_empty()
    }

    /// DOM-level evidence short of proven execution.
    pub fn dom_mutated(&self) -> bool {
        !self.script_injections.is_empty() || !self.event_handler_injections.is_empty()
    }

    /// Human-readable evidence lines for reports.
    pub fn evidence(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for d in &self.dialogs {
            lines.push(format!("{} dialog with message {:?}", d.kind, d.message));
        }
        for c in &self.console_calls {
            lines.push(format!("suspicious console.log({})", c.args.join(", ")));
        }
        for s in &self.script_injections {
            if s.src.is_empty() {
                lines.push(format!("injected inline <script>: {:.60}", s.content));
            } else {
                lines.push(format!("injected <script src={}>", s.src));
            }
        }
        for h in &self.event_handler_injections {
            lines.push(format!("<{} {}={:?}> injected", h.tag, h.attribute, h.value));
        }
        for v in &self.csp_violations {
            lines.push(format!(
                "CSP violation: {} blocked {}",
                v.violated_directive, v.blocked_uri
            ));
        }
        lines
    }
}

/// Install the agent: registered as an init script for every future
/// document, and evaluated immediately so same-document injections on
/// the current page are observed too. The blob is idempotent.
pub async fn install(page: &dyn PageDriver) -> Result<()> {
    page.add_init_script(AGENT_SOURCE)
        .await
        .context("failed to register monitor init script")?;
    page.evaluate(AGENT_SOURCE)
        .await
        .context("failed to evaluate monitor agent in current document")?;
    debug!("monitor agent installed");
    Ok(())
}

/// Clear the detection flag and every observation list. Must run before
/// each payload so observations never bleed across tests.
pub async fn reset(page: &dyn PageDriver) -> Result<()> {
    let ok = page.evaluate(RESET_EXPR).await?;
    if ok.as_bool() != Some(true) {
        // The bag vanishes when the page navigated to a fresh document
        // before the init script existed there; reinstall covers it.
        install(page).await?;
    }
    Ok(())
}

/// Read the executed verdict for the current payload.
pub async fn executed_verdict(page: &dyn PageDriver) -> Result<bool> {
    Ok(page.evaluate(VERDICT_EXPR).await?.as_bool().unwrap_or(false))
}

/// Capture the full state bag. Returns an empty state when the agent is
/// not present (e.g. navigation to a document that predates install).
pub async fn read_state(page: &dyn PageDriver) -> Result<MonitorState> {
    let raw = page.evaluate(STATE_EXPR).await?;
    let Some(text) = raw.as_str() else {
        return Ok(MonitorState::default());
    };
    if text == "null" {
        return Ok(MonitorState::default());
    }
    serde_json::from_str(text).context("monitor state bag did not match protocol shape")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(dialogs: usize, scripts: usize) -> MonitorState {
        MonitorState {
            dialogs: (0..dialogs)
                .map(|i| DialogRecord {
                    kind: "alert".into(),
                    message: i.to_string(),
                    ..Default::default()
                })
                .collect(),
            script_injections: (0..scripts)
                .map(|_| ScriptInjection::default())
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn verdict_requires_execution_evidence() {
        assert!(!MonitorState::default().executed());
        assert!(state_with(1, 0).executed());
        assert!(state_with(0, 1).executed());

        let network_only = MonitorState {
            network_requests: vec![NetworkRequest {
                url: "https://exfil.example/".into(),
                method: "GET".into(),
                time: 1.0,
            }],
            ..Default::default()
        };
        assert!(!network_only.executed(), "network egress alone is not the boolean verdict");
    }

    #[test]
    fn state_parses_agent_shape() {
        let text = r#"{
            "version": 1,
            "detected": true,
            "dialogs": [{"type":"alert","message":"1","time":12.5,"stack":"Error"}],
            "consoleCalls": [],
            "scriptInjections": [],
            "eventHandlerInjections": [{"tag":"img","attribute":"onerror","value":"alert(1)","time":13.0}],
            "networkRequests": [],
            "errors": [],
            "cspViolations": []
        }"#;
        let state: MonitorState = serde_json::from_str(text).unwrap();
        assert!(state.executed());
        assert!(state.dom_mutated());
        assert_eq!(state.dialogs[0].message, "1");
        assert_eq!(state.event_handler_injections[0].attribute, "onerror");
    }

    #[test]
    fn evidence_lines_cover_each_method() {
        let mut state = state_with(1, 1);
        state.csp_violations.push(CspViolation {
            violated_directive: "script-src".into(),
            blocked_uri: "inline".into(),
            time: 0.0,
        });
        let evidence = state.evidence();
        assert!(evidence.iter().any(|l| l.contains("alert dialog")));
        assert!(evidence.iter().any(|l| l.contains("injected inline <script>")));
        assert!(evidence.iter().any(|l| l.contains("CSP violation")));
    }

    #[test]
    fn agent_blob_mentions_protocol_pieces() {
        // The blob is the other half of the protocol; keep the pieces the
        // host queries present in the source.
        assert!(AGENT_SOURCE.contains("window.__xssprobe"));
        for key in [
            "dialogs",
            "consoleCalls",
            "scriptInjections",
            "eventHandlerInjections",
            "networkRequests",
            "cspViolations",
        ] {
            assert!(AGENT_SOURCE.contains(key), "agent missing {key}");
        }
    }
}
