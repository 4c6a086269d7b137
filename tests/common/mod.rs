//! Shared test fixtures
//!
//! `FakePage` implements the page capability trait with scripted
//! behavior so orchestration pieces (submission chain, monitor host,
//! context analyzer) can be exercised without a browser.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use xssprobe::driver::PageDriver;

/// A scripted in-memory page.
///
/// Every operation appends to `calls` for order assertions. `evaluate`
/// answers from `eval_rules`: the first rule whose needle appears in the
/// expression wins; unmatched expressions return `Null`.
#[derive(Default)]
pub struct FakePage {
    pub calls: Mutex<Vec<String>>,
    pub content: Mutex<String>,
    pub fail_fill: bool,
    pub fail_click: bool,
    pub fail_press_enter: bool,
    pub eval_rules: Mutex<Vec<(String, Value)>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `needle`-matching evaluate calls with `value`.
    pub fn stub_eval(&self, needle: &str, value: Value) {
        self.eval_rules
            .lock()
            .unwrap()
            .push((needle.to_string(), value));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.log(format!("navigate:{url}"));
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<()> {
        self.log("wait_for_navigation");
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.log(format!("fill:{selector}={value}"));
        if self.fail_fill {
            anyhow::bail!("element is not visible")
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.log(format!("click:{selector}"));
        if self.fail_click {
            anyhow::bail!("element is not visible")
        }
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<()> {
        self.log(format!("press_enter:{selector}"));
        if self.fail_press_enter {
            anyhow::bail!("element is not stable")
        }
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.log(format!("evaluate:{:.40}", expression.replace('\n', " ")));
        let rules = self.eval_rules.lock().unwrap();
        for (needle, value) in rules.iter() {
            if expression.contains(needle.as_str()) {
                return Ok(value.clone());
            }
        }
        Ok(Value::Null)
    }

    async fn content(&self) -> Result<String> {
        self.log("content");
        Ok(self.content.lock().unwrap().clone())
    }

    async fn add_init_script(&self, _source: &str) -> Result<()> {
        self.log("add_init_script");
        Ok(())
    }

    async fn set_content(&self, html: &str) -> Result<()> {
        self.log("set_content");
        *self.content.lock().unwrap() = html.to_string();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log("close");
        Ok(())
    }
}
