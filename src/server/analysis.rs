//! Static response analysis for the HTTP endpoint
//!
//! Third-party integrators submit a captured HTTP response plus the
//! payload they injected; this module decides whether the payload lands
//! in the response in an executable position, without driving a browser
//! per request. Evidence tiers map to severity and confidence: proven
//! execution capability is high/>=0.9, DOM-level injection medium/0.8,
//! bare reflection low/0.6.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::context::{ContextAnalysis, analyze_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
    None,
}

/// The `enhanced` object in the endpoint's response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedResult {
    pub detected: bool,
    pub executed: bool,
    pub severity: Severity,
    pub confidence: f64,
    pub messages: Vec<String>,
    pub detection_methods: Vec<String>,
    pub context: ContextAnalysis,
    pub timing: BTreeMap<String, u64>,
    pub metadata: BTreeMap<String, String>,
}

/// Markers whose unescaped presence makes a reflection executable.
const EXECUTION_MARKERS: &[&str] = &[
    "<script",
    "javascript:",
    "onerror=",
    "onload=",
    "onclick=",
    "onmouseover=",
    "onfocus=",
    "ontoggle=",
    "onstart=",
];

fn html_escaped(body: &str, payload: &str) -> bool {
    // The payload is present only with its metacharacters entity-encoded.
    let escaped = payload
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");
    escaped != payload && body.contains(&escaped)
}

/// Analyze one captured response for one payload.
pub fn analyze_response(
    body: &str,
    url: &str,
    payload: &str,
    analysis_ms: u64,
) -> EnhancedResult {
    let context = analyze_url(url);
    let mut messages = Vec::new();
    let mut methods = Vec::new();

    let reflected = body.contains(payload);
    let escaped_only = !reflected && html_escaped(body, payload);

    let mut confidence: f64 = 0.0;
    let mut executed = false;
    let mut dom_injection = false;

    if reflected {
        methods.push("reflection".to_string());
        messages.push(format!("payload reflected verbatim in response from {url}"));
        confidence = confidence.max(0.6);

        let lower = payload.to_lowercase();
        if EXECUTION_MARKERS.iter().any(|m| lower.contains(m)) {
            dom_injection = true;
            methods.push("dom-analysis".to_string());
            messages.push("payload carries an executable construct".to_string());
            confidence = confidence.max(0.8);

            // Unescaped reflection of an executable construct means the
            // engine will run it on render.
            executed = true;
            methods.push("execution-analysis".to_string());
            messages.push("construct is reflected unescaped and will execute".to_string());
            confidence = confidence.max(0.9);
        }
    } else if escaped_only {
        messages.push("payload reflected entity-encoded only; output encoding in place".to_string());
    } else {
        messages.push("payload not found in response".to_string());
    }

    let severity = if executed {
        Severity::High
    } else if dom_injection {
        Severity::Medium
    } else if reflected {
        Severity::Low
    } else {
        Severity::None
    };

    let mut timing = BTreeMap::new();
    timing.insert("analysisMs".to_string(), analysis_ms);

    let mut metadata = BTreeMap::new();
    metadata.insert("engine".to_string(), env!("CARGO_PKG_NAME").to_string());
    metadata.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

    EnhancedResult {
        detected: reflected,
        executed,
        severity,
        confidence: confidence.clamp(0.0, 1.0),
        messages,
        detection_methods: methods,
        context,
        timing,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_reflection_is_high_severity() {
        let body = "<html><p><script>alert(1)</script></p></html>";
        let result = analyze_response(body, "http://t.example/?q=x", "<script>alert(1)</script>", 1);
        assert!(result.detected);
        assert!(result.executed);
        assert_eq!(result.severity, Severity::High);
        assert!(result.confidence >= 0.9);
        assert!(result.detection_methods.contains(&"reflection".to_string()));
    }

    #[test]
    fn benign_reflection_is_low_severity() {
        let body = "<html><p><b>hi</b></p></html>";
        let result = analyze_response(body, "http://t.example/?q=x", "<b>hi</b>", 1);
        assert!(result.detected);
        assert!(!result.executed);
        assert_eq!(result.severity, Severity::Low);
        assert!((result.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn encoded_reflection_is_clean() {
        let body = "<p>&lt;script&gt;alert(1)&lt;/script&gt;</p>";
        let result = analyze_response(body, "http://t.example/", "<script>alert(1)</script>", 1);
        assert!(!result.detected);
        assert_eq!(result.severity, Severity::None);
        assert_eq!(result.confidence, 0.0);
        assert!(result.messages.iter().any(|m| m.contains("entity-encoded")));
    }

    #[test]
    fn missing_payload_is_clean() {
        let result = analyze_response("<p>nothing here</p>", "http://t.example/", "<svg onload=alert(1)>", 1);
        assert!(!result.detected);
        assert_eq!(result.severity, Severity::None);
    }

    #[test]
    fn confidence_is_clamped() {
        let body = "<script>alert(1)</script>";
        let result = analyze_response(body, "http://t.example/", "<script>alert(1)</script>", 1);
        assert!(result.confidence <= 1.0);
    }
}
