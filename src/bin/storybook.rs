//! CLI binary for storybook-forge.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `StorybookConfig` and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use storybook_forge::{
    ConversionAttemptResult, ConversionOutcome, ConversionPipeline, ErrorKind,
    PipelineProgressCallback, ProgressCallback, Stage, StoryGenerator, StorybookConfig,
    StorybookConfigBuilder,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner for the current stage plus one log line per
/// finished stage, retry wait and degraded result.
struct CliProgressCallback {
    bar: ProgressBar,
    stage_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(Stage::ALL.len() as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:20.green/238}] {pos}/{len}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            stage_started: Mutex::new(None),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.stage_started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        *self.stage_started.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.bar.set_prefix(stage.as_str().to_string());
        self.bar.set_message(String::new());
    }

    fn on_stage_complete(&self, stage: Stage, output_len: usize) {
        self.bar.println(format!(
            "  {} {:<11} {}  {}",
            green("✓"),
            stage.as_str(),
            dim(&format!("{output_len:>6}")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_stage_error(&self, stage: Stage, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<11} {}", red("✗"), stage.as_str(), red(&msg)));
    }

    fn on_retry_scheduled(&self, kind: ErrorKind, attempt: u32, max_attempts: u32, wait: Duration) {
        self.bar.println(format!(
            "  {} {kind:?} on attempt {attempt}/{max_attempts}, retrying in {:.0}s",
            yellow("↻"),
            wait.as_secs_f64()
        ));
    }

    fn on_rate_limit_wait(&self, wait: Duration) {
        self.bar
            .set_message(format!("rate limit reached, waiting {:.1}s", wait.as_secs_f64()));
    }

    fn on_backend_attempt(&self, backend: &str) {
        self.bar.set_message(format!("trying {backend}"));
    }

    fn on_backend_result(&self, result: &ConversionAttemptResult) {
        if let Some(ref error) = result.error {
            self.bar.println(format!(
                "    {} {:<12} {}",
                dim("·"),
                result.backend,
                dim(error)
            ));
        }
    }

    fn on_degraded(&self, message: &str) {
        self.bar.println(format!("  {} {}", yellow("⚠"), message));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate a storybook in the current directory
  storybook "a brave little fox"

  # Write into a separate directory, slower request rate
  storybook --output-dir out --requests-per-minute 10 "a dragon who is afraid of the dark"

  # Convert an existing Markdown or HTML story to PDF (no API keys needed)
  storybook --convert-only story.md

  # Check credentials and installed PDF tools
  storybook --check

  # Machine-readable result
  storybook --json "a robot learning to paint" > result.json

ENVIRONMENT VARIABLES:
  GOOGLE_API_KEY          Gemini key for outline and story text
  HUGGINGFACE_API_KEY     Hugging Face key for chapter illustrations
  RUST_LOG                Override the log filter (e.g. storybook_forge=debug)

PDF TOOLS (tried in order, any one is enough):
  weasyprint              pip install weasyprint
  mdpdf                   pip install mdpdf
  wkhtmltopdf             https://wkhtmltopdf.org/downloads.html

  Without any of them a printable HTML file is written next to the story;
  open it in a browser and use Print → Save as PDF.
"#;

/// Generate illustrated children's storybooks and convert them to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "storybook",
    version,
    about = "Generate illustrated children's storybooks and convert them to PDF",
    long_about = "Generate a five-chapter illustrated children's storybook from a short topic. \
Text comes from Gemini, illustrations from a Hugging Face image model, and the result is \
converted to PDF with whichever renderer is installed (printable HTML when none is).",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Story topic, at most ten words.
    #[arg(required_unless_present_any = ["convert_only", "check"])]
    topic: Option<String>,

    /// Convert an existing Markdown or HTML file instead of generating.
    #[arg(long, value_name = "FILE", conflicts_with = "topic")]
    convert_only: Option<PathBuf>,

    /// Report missing credentials and available PDF tools, then exit.
    #[arg(long, conflicts_with_all = ["topic", "convert_only"])]
    check: bool,

    /// Directory for the story, images and PDF.
    #[arg(short, long, env = "STORYBOOK_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Text requests allowed per trailing minute.
    #[arg(long, env = "STORYBOOK_REQUESTS_PER_MINUTE", default_value_t = 15,
          value_parser = clap::value_parser!(u32).range(1..=1000))]
    requests_per_minute: u32,

    /// Print the result as JSON on stdout.
    #[arg(long, env = "STORYBOOK_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "STORYBOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STORYBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "STORYBOOK_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs when it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|cb| cb as ProgressCallback))?;

    // ── Check mode ───────────────────────────────────────────────────────
    if cli.check {
        return run_check(&cli, &config).await;
    }

    // ── Convert-only mode ────────────────────────────────────────────────
    if let Some(ref path) = cli.convert_only {
        let outcome = ConversionPipeline::new(&config).convert(path).await;
        if let Some(ref cb) = progress {
            cb.finish();
        }
        print_outcome(&cli, &outcome)?;
        if matches!(outcome, ConversionOutcome::Failed { .. }) {
            bail!("conversion failed");
        }
        return Ok(());
    }

    // ── Generate ─────────────────────────────────────────────────────────
    let issues = config.validate_credentials();
    if !issues.is_empty() {
        eprintln!("{} configuration incomplete:", red("✘"));
        for issue in &issues {
            eprintln!("  - {issue}");
        }
        bail!("{} missing credential(s)", issues.len());
    }

    let topic = cli.topic.as_deref().unwrap_or_default();
    if !cli.quiet && !cli.json {
        for line in config.rate_limit_summary().lines() {
            eprintln!("  {}", dim(line));
        }
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Writing a storybook about '{topic}'…"))
        );
    }
    let generator = StoryGenerator::from_config(config).context("Invalid configuration")?;
    let result = generator.generate(topic).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }
    let story = match result {
        Ok(story) => story,
        Err(e) => {
            if e.is_quota() && !cli.json {
                if let Some(guidance) = e.recovery_guidance() {
                    eprintln!("{} {}", yellow("💡"), guidance.trim_end());
                }
            }
            return Err(e).context("Storybook generation failed");
        }
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&story).context("Failed to serialise output")?
        );
        return Ok(());
    }

    if !cli.quiet {
        eprintln!(
            "{} {}  {}/{} illustrations  {}ms",
            green("✔"),
            bold(&story.title),
            story.generated_images(),
            story.chapters.len(),
            story.total_duration_ms,
        );
        eprintln!("   story     {}", story.markdown_path.display());
        eprintln!(
            "   requests  {} today, {}/{} this minute",
            story.api_status.requests_today,
            story.api_status.requests_in_window,
            story.api_status.max_requests_per_minute,
        );
    }
    print_outcome(&cli, &story.conversion)?;
    Ok(())
}

/// Map CLI args to `StorybookConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<StorybookConfig> {
    let mut builder = StorybookConfigBuilder::from_env()
        .output_dir(&cli.output_dir)
        .max_requests_per_minute(cli.requests_per_minute);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

async fn run_check(cli: &Cli, config: &StorybookConfig) -> Result<()> {
    let issues = config.validate_credentials();
    let tools = ConversionPipeline::new(config).detect_backends().await;

    if cli.json {
        let report = serde_json::json!({ "issues": issues, "backends": tools });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else {
        println!("{}", bold("Credentials"));
        if issues.is_empty() {
            println!("  {} all keys present", green("✓"));
        }
        for issue in &issues {
            println!("  {} {issue}", red("✗"));
        }
        println!("{}", bold("PDF tools"));
        for tool in &tools {
            if tool.available {
                println!("  {} {}", green("✓"), tool.name);
            } else {
                println!("  {} {}  {}", dim("-"), tool.name, dim(&tool.install_hint));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        bail!("{} missing credential(s)", issues.len())
    }
}

fn print_outcome(cli: &Cli, outcome: &ConversionOutcome) -> Result<()> {
    if cli.json && cli.convert_only.is_some() {
        println!(
            "{}",
            serde_json::to_string_pretty(outcome).context("Failed to serialise output")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    match outcome {
        ConversionOutcome::Pdf { .. } => {
            eprintln!("{} {}", green("✔"), outcome.status_message());
        }
        ConversionOutcome::Fallback { html_path, .. } => {
            eprintln!(
                "{} no PDF tool succeeded; printable HTML written to {}",
                yellow("⚠"),
                bold(&html_path.display().to_string())
            );
            eprintln!("{}", outcome.status_message());
        }
        ConversionOutcome::Failed { message, .. } => {
            eprintln!("{} {}", red("✘"), message);
        }
    }
    Ok(())
}
