//! Monitor host and context analyzer against a scripted page

mod common;

use common::FakePage;
use serde_json::json;
use xssprobe::context::{self, AttributeKind, InjectionContext};
use xssprobe::monitor;

#[tokio::test]
async fn install_registers_init_script_and_evaluates_inline() {
    let page = FakePage::new();
    monitor::install(&page).await.unwrap();
    let calls = page.calls();
    assert!(calls.iter().any(|c| c == "add_init_script"));
    assert!(calls.iter().any(|c| c.starts_with("evaluate:")));
}

#[tokio::test]
async fn reset_reinstalls_when_the_bag_is_missing() {
    let page = FakePage::new();
    // Reset script answers false (no bag on a fresh document).
    page.stub_eval("s.detected = false", json!(false));
    monitor::reset(&page).await.unwrap();
    assert!(
        page.calls().iter().any(|c| c == "add_init_script"),
        "missing bag triggers reinstall"
    );
}

#[tokio::test]
async fn verdict_reads_the_bag() {
    let page = FakePage::new();
    page.stub_eval("dialogs.length > 0", json!(true));
    assert!(monitor::executed_verdict(&page).await.unwrap());
}

#[tokio::test]
async fn state_read_parses_the_protocol_shape() {
    let page = FakePage::new();
    page.stub_eval(
        "JSON.stringify(window.__xssprobe || null)",
        json!(r#"{"version":1,"detected":true,"dialogs":[{"type":"alert","message":"1","time":5.0,"stack":""}],"consoleCalls":[],"scriptInjections":[],"eventHandlerInjections":[],"networkRequests":[],"errors":[],"cspViolations":[]}"#),
    );
    let state = monitor::read_state(&page).await.unwrap();
    assert!(state.executed());
    assert_eq!(state.dialogs.len(), 1);
    assert_eq!(state.dialogs[0].message, "1");
}

#[tokio::test]
async fn missing_bag_reads_as_empty_state() {
    let page = FakePage::new();
    page.stub_eval("JSON.stringify(window.__xssprobe || null)", json!("null"));
    let state = monitor::read_state(&page).await.unwrap();
    assert!(!state.executed());
    assert!(state.dialogs.is_empty());
}

#[tokio::test]
async fn dom_summary_overrides_url_guess() {
    let page = FakePage::new();
    // URL says CSS, but the live element carries an onchange handler.
    page.stub_eval(
        "document.querySelector",
        json!(r#"{"found":true,"insideScript":false,"insideStyle":false,"hasEventHandlerAttr":true,"hasOtherAttrs":true,"isUrlBearing":false}"#),
    );
    let analysis = context::analyze(&page, "http://t.example/?theme=dark", "input[name=q]")
        .await
        .unwrap();
    assert_eq!(analysis.context, InjectionContext::Attribute);
    assert_eq!(analysis.attribute_kind, Some(AttributeKind::EventHandler));
}

#[tokio::test]
async fn unsummarizable_element_falls_back_to_url_guess() {
    let page = FakePage::new();
    page.stub_eval("document.querySelector", json!(r#"{"found":false}"#));
    let analysis = context::analyze(&page, "http://t.example/?redirect=/next", "#gone")
        .await
        .unwrap();
    assert_eq!(analysis.context, InjectionContext::Url);
}
