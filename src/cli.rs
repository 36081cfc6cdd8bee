use std::{path::PathBuf, process, thread, time::Duration};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    CancelToken, ResultSnapshot, TestReference, TestSession, WaitOptions,
    config::{ClientSettings, DecodePolicy, default_config_path},
    model::TestState,
    telemetry::{self, LogFormat},
};

#[derive(Parser, Debug)]
#[command(name = "gtmetrix", version, about = "Run GTmetrix page performance tests", long_about = None)]
pub struct Cli {
    /// Increase logging verbosity.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub json_logs: bool,

    /// Custom config path.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the API root (e.g. a local test double).
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// How to treat malformed API responses.
    #[arg(long, global = true, value_enum)]
    pub decode: Option<DecodePolicy>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue a test and print its reference.
    Submit(SubmitArgs),
    /// Fetch the current state of a test once.
    Poll(PollArgs),
    /// Wait for a previously submitted test to finish.
    Wait(WaitArgs),
    /// Queue a test and wait for its results.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Site to test.
    pub url: String,

    /// Print the raw reference as JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PollArgs {
    /// Test id returned by `submit`.
    pub test_id: String,

    /// Print the raw snapshot as JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Test id returned by `submit`.
    pub test_id: String,

    #[command(flatten)]
    pub wait: WaitFlags,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Site to test.
    pub url: String,

    #[command(flatten)]
    pub wait: WaitFlags,
}

#[derive(Args, Debug, Clone)]
pub struct WaitFlags {
    /// Delay between status checks in milliseconds (config default: 1000).
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Give up after this many seconds (config default: 300).
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Print the final snapshot as JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

impl WaitFlags {
    fn options(&self, settings: &ClientSettings) -> WaitOptions {
        let mut options = settings.wait_options();
        if let Some(ms) = self.interval_ms {
            options.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout_secs {
            options.overall_timeout = Duration::from_secs(secs);
        }
        options
    }
}

/// Parse arguments, install logging and execute the chosen command.
pub fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    telemetry::init_tracing(cli.verbose, format)?;
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => default_config_path()?,
    };
    let mut settings = ClientSettings::load_or_default(&config_path)?;
    if let Some(base_url) = cli.base_url.clone() {
        settings.base_url = base_url;
    }
    if let Some(policy) = cli.decode {
        settings.decode_policy = policy;
    }
    info!(path = %config_path.display(), base_url = %settings.base_url, "using client config");

    let session = TestSession::from_settings(&settings)
        .with_context(|| format!("unable to start session (config: {})", config_path.display()))?;

    match cli.command {
        Command::Submit(args) => {
            let reference = session.submit(&args.url)?;
            if args.json {
                print_json(&reference)?;
            } else {
                print_reference(&reference);
            }
        }
        Command::Poll(args) => {
            let snapshot = session.poll(&TestReference::from_test_id(args.test_id))?;
            if args.json {
                print_json(&snapshot)?;
            } else {
                print_snapshot(&snapshot);
            }
        }
        Command::Wait(args) => {
            let cancel = cancel_on_ctrl_c();
            let snapshot = session.wait_for_completion_with_cancel(
                &TestReference::from_test_id(args.test_id),
                args.wait.options(&settings),
                &cancel,
            )?;
            emit_snapshot(&snapshot, args.wait.json)?;
        }
        Command::Run(args) => {
            let cancel = cancel_on_ctrl_c();
            let reference = session.submit(&args.url)?;
            if !args.wait.json {
                print_reference(&reference);
            }
            let snapshot = session.wait_for_completion_with_cancel(
                &reference,
                args.wait.options(&settings),
                &cancel,
            )?;
            emit_snapshot(&snapshot, args.wait.json)?;
        }
    }

    Ok(())
}

/// Exit status used when a second Ctrl-C forces the process down.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum InterruptOutcome {
    /// Signal handling could not be installed; the default SIGINT action may not apply.
    Unwatched,
    /// First Ctrl-C cancelled the wait, a second one asked to exit now.
    ForceExit,
}

/// First interrupt cancels the wait; the second returns so the caller can exit.
///
/// Once the handler is registered SIGINT no longer terminates the process on
/// its own, so a request already in flight (bounded by `request_timeout_secs`)
/// would otherwise keep the process alive after repeated Ctrl-C presses.
async fn relay_interrupts<S, F>(mut next_signal: S, cancel: &CancelToken) -> InterruptOutcome
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = next_signal().await {
        warn!(error = %err, "unable to watch for Ctrl-C");
        return InterruptOutcome::Unwatched;
    }
    info!("interrupt received; cancelling wait (press Ctrl-C again to exit immediately)");
    cancel.cancel();
    match next_signal().await {
        Ok(()) => InterruptOutcome::ForceExit,
        Err(err) => {
            warn!(error = %err, "lost Ctrl-C watcher after cancelling");
            InterruptOutcome::Unwatched
        }
    }
}

// Ctrl-C aborts the wait loop instead of killing the process mid-request.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    let spawned = thread::Builder::new()
        .name("gtmetrix-ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(error = %err, "unable to watch for Ctrl-C");
                    return;
                }
            };
            let outcome = runtime.block_on(relay_interrupts(tokio::signal::ctrl_c, &handle));
            if outcome == InterruptOutcome::ForceExit {
                warn!("second interrupt received; exiting");
                process::exit(INTERRUPTED_EXIT_CODE);
            }
        });
    if let Err(err) = spawned {
        warn!(error = %err, "unable to spawn Ctrl-C watcher");
    }
    cancel
}

fn emit_snapshot(snapshot: &ResultSnapshot, json: bool) -> Result<()> {
    if json {
        print_json(snapshot)
    } else {
        print_snapshot(snapshot);
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}

fn print_reference(reference: &TestReference) {
    println!("Test id:      {}", reference.test_id);
    if !reference.poll_state_url.is_empty() {
        println!("Poll URL:     {}", reference.poll_state_url);
    }
    println!("Credits left: {}", reference.credits_left);
}

fn print_snapshot(snapshot: &ResultSnapshot) {
    print!("{}", render_snapshot(snapshot));
}

fn render_snapshot(snapshot: &ResultSnapshot) -> String {
    let mut out = format!("State: {}\n", snapshot.test_state());
    if let Some(error) = &snapshot.error {
        out.push_str(&format!("Error: {error}\n"));
    }
    let Some((metrics, resources)) = snapshot.completed_results() else {
        if snapshot.test_state() != TestState::Error {
            out.push_str("Results are not available yet.\n");
        }
        return out;
    };

    out.push_str(&format!("Report:               {}\n", metrics.report_url));
    out.push_str(&format!("PageSpeed score:      {}\n", metrics.pagespeed_score));
    out.push_str(&format!("YSlow score:          {}\n", metrics.yslow_score));
    out.push_str(&format!("Page load time:       {}\n", format_millis(metrics.page_load_time)));
    out.push_str(&format!("Fully loaded:         {}\n", format_millis(metrics.fully_loaded_time)));
    out.push_str(&format!("First contentful:     {}\n", format_millis(metrics.first_contentful_paint_time)));
    out.push_str(&format!("Page size:            {}\n", format_bytes(metrics.page_bytes)));
    out.push_str(&format!("Requests:             {}\n", metrics.page_elements));
    let links = resources.links();
    if !links.is_empty() {
        out.push_str("Resources:\n");
        for (name, url) in links {
            out.push_str(&format!("  {name:<16} {url}\n"));
        }
    }
    out
}

fn format_millis(ms: i64) -> String {
    if ms.abs() < 1000 {
        format!("{ms} ms")
    } else {
        format!("{:.2} s", ms as f64 / 1000.0)
    }
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    if bytes <= 0 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
