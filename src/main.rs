// xssprobe CLI: one-shot detection jobs, batch scans over crawler
// output, payload bank management, persisted config, and the HTTP
// submission endpoint.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

use xssprobe::config::{BrowserKind, ConfigStore};
use xssprobe::context::{AttributeKind, InjectionContext};
use xssprobe::detect::{CancelToken, DetectRequest, Detector, LogProgress};
use xssprobe::error::DetectError;
use xssprobe::payloads::{self, GeneratorOptions, PayloadInput};
use xssprobe::scheduler::{self, DetectorRunner, ScanJob, SchedulerOptions};
use xssprobe::session::SessionManager;

#[derive(Parser)]
#[command(name = "xssprobe", version, about = "Browser-driven XSS detection engine")]
struct Cli {
    /// Verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Test one input field on one page
    Detect {
        /// Absolute target URL (http/https)
        url: String,
        /// CSS selector of the input field to inject into
        selector: String,
        #[command(flatten)]
        options: DetectArgs,
        /// JSON file with payloads (flat array or category records)
        #[arg(long)]
        payloads: Option<PathBuf>,
    },
    /// Run detection jobs from a crawler output file
    Batch {
        /// JSON array of {url, selector, submitSelector?}
        file: PathBuf,
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
        /// Skip remaining batches once a finding appears
        #[arg(long)]
        stop_on_first: bool,
        /// All jobs share one browser session
        #[arg(long)]
        share_session: bool,
        #[command(flatten)]
        options: DetectArgs,
    },
    /// Manage the payload bank
    Payloads {
        /// Write the categorized payload bank to a JSON file
        #[arg(long)]
        generate: Option<PathBuf>,
        /// Print generated payloads for a context (html, attribute, js, url, css)
        #[arg(long)]
        context: Option<String>,
        /// Attribute kind (unquoted, single-quoted, double-quoted, event-handler)
        #[arg(long)]
        attribute: Option<String>,
        /// Show the top-N historically effective payloads
        #[arg(long, num_args = 0..=1, default_missing_value = "10")]
        effective: Option<usize>,
        #[arg(long)]
        browser: Option<BrowserKind>,
    },
    /// Manage persisted defaults
    Config {
        /// Print the persisted document
        #[arg(long)]
        show: bool,
        /// Remove the persisted document
        #[arg(long)]
        reset: bool,
        /// Print the document path
        #[arg(long)]
        path: bool,
        /// Merge a JSON file into the persisted document
        #[arg(long)]
        update: Option<PathBuf>,
    },
    /// Run the HTTP submission endpoint
    Serve {
        #[arg(long, default_value = "127.0.0.1:8094")]
        addr: SocketAddr,
    },
}

/// Option flags shared by `detect` and `batch`. Only flags the user set
/// become overrides; everything else falls back to persisted defaults.
#[derive(Args)]
struct DetectArgs {
    #[arg(long)]
    browser: Option<BrowserKind>,
    /// First strategy in the submission fallback chain
    #[arg(long)]
    submit_selector: Option<String>,
    /// Verify execution in the JS runtime (true/false)
    #[arg(long)]
    verify_execution: Option<bool>,
    /// Drop reflection-only results from the output
    #[arg(long)]
    require_execution: bool,
    /// Named session to reuse across runs
    #[arg(long)]
    session: Option<String>,
    /// Restore the session's saved storage state
    #[arg(long)]
    session_reuse: bool,
    /// Save the session's storage state at teardown
    #[arg(long)]
    session_save: bool,
    /// Close the session when the job finishes
    #[arg(long)]
    session_close: bool,
    /// Enable the result cache (true/false)
    #[arg(long)]
    cache: Option<bool>,
    /// Cache entry max age in milliseconds (0 = forever)
    #[arg(long)]
    cache_max_age: Option<u64>,
    /// Context-aware payload selection (true/false)
    #[arg(long)]
    smart: Option<bool>,
    /// Payload limit for smart selection
    #[arg(long)]
    smart_limit: Option<usize>,
    /// Rank payloads by recorded effectiveness (true/false)
    #[arg(long)]
    use_effective: Option<bool>,
    /// Report output directory
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

impl DetectArgs {
    /// Build the partial overrides document: only keys the user set.
    fn overrides(&self) -> Value {
        let mut root = serde_json::Map::new();
        if let Some(browser) = self.browser {
            root.insert("browser".into(), json!(browser.as_str()));
        }
        if let Some(selector) = &self.submit_selector {
            root.insert("submitSelector".into(), json!(selector));
        }
        if let Some(verify) = self.verify_execution {
            root.insert("verifyExecution".into(), json!(verify));
        }
        if self.require_execution {
            root.insert("requireExecution".into(), json!(true));
        }

        if self.session.is_some() || self.session_reuse || self.session_save || self.session_close {
            root.insert(
                "session".into(),
                json!({
                    "id": self.session,
                    "reuse": self.session_reuse,
                    "save": self.session_save,
                    "closeAfter": self.session_close,
                }),
            );
        }

        let mut cache = serde_json::Map::new();
        if let Some(enabled) = self.cache {
            cache.insert("enabled".into(), json!(enabled));
        }
        if let Some(max_age) = self.cache_max_age {
            cache.insert("maxAgeMs".into(), json!(max_age));
        }
        if !cache.is_empty() {
            root.insert("cache".into(), Value::Object(cache));
        }

        let mut smart = serde_json::Map::new();
        if let Some(enabled) = self.smart {
            smart.insert("enabled".into(), json!(enabled));
        }
        if let Some(limit) = self.smart_limit {
            smart.insert("limit".into(), json!(limit));
        }
        if !smart.is_empty() {
            root.insert("smartPayloadSelection".into(), Value::Object(smart));
        }

        if let Some(enabled) = self.use_effective {
            root.insert(
                "effectiveness".into(),
                json!({ "useEffectivePayloads": enabled }),
            );
        }
        if let Some(dir) = &self.report_dir {
            root.insert("report".into(), json!({ "outputDir": dir }));
        }

        Value::Object(root)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            if let Some(detect) = e.downcast_ref::<DetectError>()
                && let Some(hint) = detect.hint()
            {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Detect {
            url,
            selector,
            options,
            payloads: payload_file,
        } => {
            let detector = build_detector()?;
            let mut request = DetectRequest::new(url, selector).with_overrides(options.overrides());
            if let Some(path) = payload_file {
                request = request.with_payloads(load_payload_file(&path)?);
            }

            let outcome = detector
                .detect_xss(request, &LogProgress, CancelToken::never())
                .await?;

            println!("{}", serde_json::to_string_pretty(&outcome.results)?);
            if let Some(path) = outcome.report {
                println!("report: {}", path.display());
            }
            detector.sessions().shutdown().await;
            Ok(())
        }

        Command::Batch {
            file,
            concurrency,
            stop_on_first,
            share_session,
            options,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let jobs: Vec<ScanJob> = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a job array", file.display()))?;

            let detector = Arc::new(build_detector()?);
            let runner = Arc::new(DetectorRunner::new(detector.clone()));
            let reports = scheduler::run_batch(
                runner,
                jobs,
                SchedulerOptions {
                    concurrency,
                    stop_on_first_vulnerability: stop_on_first,
                    share_session,
                    overrides: options.overrides(),
                },
                CancelToken::never(),
            )
            .await;

            let mut total_findings = 0usize;
            for report in &reports {
                match &report.outcome {
                    Ok(results) => {
                        total_findings += results.len();
                        println!("{}: {} findings", report.job.url, results.len());
                    }
                    Err(e) => println!("{}: error ({e})", report.job.url),
                }
            }
            println!("total: {total_findings} findings across {} jobs", reports.len());
            detector.sessions().shutdown().await;
            Ok(())
        }

        Command::Payloads {
            generate,
            context,
            attribute,
            effective,
            browser,
        } => {
            if let Some(path) = generate {
                let categories = payloads::write_categorized_file(&path)?;
                println!("wrote {} categories to {}", categories.len(), path.display());
                return Ok(());
            }
            if let Some(context) = context {
                let context = parse_context(&context)?;
                let mut options = GeneratorOptions::default();
                if let Some(kind) = attribute {
                    options.attribute_kind = parse_attribute_kind(&kind)?;
                }
                for payload in payloads::generate(context, &options) {
                    println!("{payload}");
                }
                return Ok(());
            }
            if let Some(limit) = effective {
                let detector = build_detector()?;
                let Some(store) = detector.effectiveness_store() else {
                    anyhow::bail!("effectiveness store unavailable");
                };
                for entry in store.top_k(limit, browser).await {
                    println!(
                        "{:6.2}% exec  {:6.2}% refl  {:4} tests  {}",
                        entry.score.execution_score * 100.0,
                        entry.score.reflection_score * 100.0,
                        entry.score.total_tests,
                        entry.payload
                    );
                }
                return Ok(());
            }
            anyhow::bail!("pass one of --generate, --context, --effective")
        }

        Command::Config {
            show,
            reset,
            path,
            update,
        } => {
            let store = ConfigStore::default_location()?;
            if path {
                println!("{}", store.path().display());
                return Ok(());
            }
            if reset {
                store.reset()?;
                println!("config reset to built-in defaults");
                return Ok(());
            }
            if let Some(file) = update {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let overrides: Value = serde_json::from_str(&text)
                    .with_context(|| format!("{} is not valid JSON", file.display()))?;
                let merged = store.resolve(&overrides)?;
                store.persist(&merged)?;
                println!("config updated");
                return Ok(());
            }
            // --show is also the default action
            let _ = show;
            println!("{}", serde_json::to_string_pretty(&store.load())?);
            Ok(())
        }

        Command::Serve { addr } => {
            let sessions = Arc::new(SessionManager::new());
            xssprobe::server::serve(addr, sessions).await
        }
    }
}

fn build_detector() -> Result<Detector> {
    Detector::with_default_stores(Arc::new(SessionManager::new()))
}

fn load_payload_file(path: &PathBuf) -> Result<PayloadInput> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is neither a payload array nor category records", path.display()))
}

fn parse_context(value: &str) -> Result<InjectionContext> {
    match value.to_ascii_lowercase().as_str() {
        "html" => Ok(InjectionContext::Html),
        "attribute" | "attr" => Ok(InjectionContext::Attribute),
        "js" | "javascript" => Ok(InjectionContext::Js),
        "url" => Ok(InjectionContext::Url),
        "css" | "style" => Ok(InjectionContext::Css),
        other => anyhow::bail!("unknown context '{other}' (html, attribute, js, url, css)"),
    }
}

fn parse_attribute_kind(value: &str) -> Result<AttributeKind> {
    match value.to_ascii_lowercase().as_str() {
        "unquoted" => Ok(AttributeKind::Unquoted),
        "single-quoted" | "single" => Ok(AttributeKind::SingleQuoted),
        "double-quoted" | "double" => Ok(AttributeKind::DoubleQuoted),
        "event-handler" | "event" => Ok(AttributeKind::EventHandler),
        other => anyhow::bail!(
            "unknown attribute kind '{other}' (unquoted, single-quoted, double-quoted, event-handler)"
        ),
    }
}
