//! Injection context analysis
//!
//! Determines where in the document an input's value lands (HTML body,
//! attribute, script, URL, CSS) so the selector can rank payloads that
//! break out of that context. URL parameter names give a first guess;
//! a single evaluate-in-page ancestor walk overrides it when the live
//! DOM says otherwise.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::driver::PageDriver;

/// Syntactic context an injected value lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionContext {
    Html,
    Attribute,
    Js,
    Url,
    Css,
}

/// Refinement for [`InjectionContext::Attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeKind {
    Unquoted,
    SingleQuoted,
    DoubleQuoted,
    EventHandler,
}

/// Analyzer verdict: context plus attribute refinement when applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub context: InjectionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_kind: Option<AttributeKind>,
}

impl ContextAnalysis {
    pub fn of(context: InjectionContext) -> Self {
        Self {
            context,
            attribute_kind: None,
        }
    }

    pub fn attribute(kind: AttributeKind) -> Self {
        Self {
            context: InjectionContext::Attribute,
            attribute_kind: Some(kind),
        }
    }
}

/// Ancestor summary returned by the in-page walk. One evaluate call
/// collects everything, avoiding a round-trip per ancestor.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ElementSummary {
    found: bool,
    inside_script: bool,
    inside_style: bool,
    has_event_handler_attr: bool,
    has_other_attrs: bool,
    is_url_bearing: bool,
}

const ELEMENT_SUMMARY_JS: &str = r#"
(selector => {
    const el = document.querySelector(selector);
    if (!el) { return { found: false }; }
    let insideScript = false, insideStyle = false;
    for (let node = el; node; node = node.parentElement) {
        const tag = node.tagName ? node.tagName.toLowerCase() : '';
        if (tag === 'script') { insideScript = true; }
        if (tag === 'style') { insideStyle = true; }
    }
    const attrs = Array.from(el.attributes || []).map(a => a.name.toLowerCase());
    const hasEventHandlerAttr = attrs.some(name => name.startsWith('on'));
    const hasOtherAttrs = attrs.length > 0;
    const tag = el.tagName.toLowerCase();
    const isUrlBearing = tag === 'a'
        || attrs.includes('href') || attrs.includes('src') || attrs.includes('action');
    return { found: true, insideScript, insideStyle, hasEventHandlerAttr, hasOtherAttrs, isUrlBearing };
})
"#;

/// Guess the context from URL parameter names. First match wins.
pub fn analyze_url(target_url: &str) -> ContextAnalysis {
    const JS_HINTS: &[&str] = &["callback", "jsonp", "function", "js", "script"];
    const URL_HINTS: &[&str] = &["url", "redirect", "return", "next", "target", "path", "goto"];
    const CSS_HINTS: &[&str] = &["style", "css", "theme", "color"];

    let Ok(parsed) = Url::parse(target_url) else {
        return ContextAnalysis::of(InjectionContext::Html);
    };

    for (name, _) in parsed.query_pairs() {
        let name = name.to_lowercase();
        if JS_HINTS.iter().any(|h| name.contains(h)) {
            return ContextAnalysis::of(InjectionContext::Js);
        }
        if URL_HINTS.iter().any(|h| name.contains(h)) {
            return ContextAnalysis::of(InjectionContext::Url);
        }
        if CSS_HINTS.iter().any(|h| name.contains(h)) {
            return ContextAnalysis::of(InjectionContext::Css);
        }
    }

    ContextAnalysis::of(InjectionContext::Html)
}

/// Analyze the live page. The DOM verdict overrides the URL guess; when
/// the element cannot be summarized the URL guess stands.
pub async fn analyze(
    page: &dyn PageDriver,
    target_url: &str,
    input_selector: &str,
) -> Result<ContextAnalysis> {
    let url_guess = analyze_url(target_url);

    let expression = format!(
        "JSON.stringify({ELEMENT_SUMMARY_JS}({sel}))",
        sel = serde_json::to_string(input_selector)?
    );
    let raw = page.evaluate(&expression).await?;
    let summary: ElementSummary = raw
        .as_str()
        .and_then(|text| serde_json::from_str(text).ok())
        .unwrap_or_default();

    if !summary.found {
        debug!("input {input_selector} not summarizable, using URL context {url_guess:?}");
        return Ok(url_guess);
    }

    let analysis = if summary.inside_script {
        ContextAnalysis::of(InjectionContext::Js)
    } else if summary.inside_style {
        ContextAnalysis::of(InjectionContext::Css)
    } else if summary.has_event_handler_attr {
        ContextAnalysis::attribute(AttributeKind::EventHandler)
    } else if summary.has_other_attrs {
        // Quoting style is not observable from the serialized DOM, so
        // unquoted is the default attribute kind.
        ContextAnalysis::attribute(AttributeKind::Unquoted)
    } else if summary.is_url_bearing {
        ContextAnalysis::of(InjectionContext::Url)
    } else {
        url_guess
    };

    debug!("context for {input_selector}: {analysis:?}");
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_heuristics_first_match_wins() {
        assert_eq!(
            analyze_url("https://t.example/p?callback=fn").context,
            InjectionContext::Js
        );
        assert_eq!(
            analyze_url("https://t.example/p?redirect=/home").context,
            InjectionContext::Url
        );
        assert_eq!(
            analyze_url("https://t.example/p?theme=dark").context,
            InjectionContext::Css
        );
        assert_eq!(
            analyze_url("https://t.example/p?q=term").context,
            InjectionContext::Html
        );
    }

    #[test]
    fn js_hint_outranks_url_hint() {
        // `jsonp_url` carries both hint classes; JS hints are checked first.
        assert_eq!(
            analyze_url("https://t.example/p?jsonp_url=x").context,
            InjectionContext::Js
        );
    }

    #[test]
    fn unparsable_url_defaults_to_html() {
        assert_eq!(analyze_url("not a url").context, InjectionContext::Html);
    }
}
