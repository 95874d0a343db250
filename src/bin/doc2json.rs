//! CLI binary for edgequake-extract.
//!
//! Maps flags onto `ExtractionConfig`, runs one extraction or transcription
//! and prints the result to stdout. Progress and logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_extract::pipeline::input;
use edgequake_extract::{
    DirectoryArchive, DocumentSchema, ExtractionConfig, ExtractionProgressCallback,
    ExtractionTask, Extractor, MergeStrategy, ModelEndpoint, ProgressCallback,
    TranscriptionPrompts,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Page progress bar, then a spinner while merge calls run.
struct CliProgress {
    bar: ProgressBar,
    dropped: AtomicUsize,
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Rendering");
        bar.set_message("opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            dropped: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgress {
    fn on_extraction_start(&self, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>3}/{len} pages  {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("Reading");
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, output_len: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{output_len} fields/chars"))
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}…")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_merge_step(&self, step: usize, total_steps: usize) {
        self.bar.set_prefix("Merging");
        self.bar.set_message(format!("step {step}/{total_steps}"));
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let dropped = self.dropped.load(Ordering::SeqCst);
        if dropped == 0 {
            eprintln!("{} {} pages read", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages read ({} dropped)",
                red("⚠"),
                bold(&success_count.to_string()),
                total_pages,
                red(&dropped.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Offer letter against a local llama.cpp server
  doc2json offer_letter.pdf --base-url http://127.0.0.1:8081

  # National ID card photo via OpenAI
  doc2json --task national-id --provider openai --model gpt-4.1-mini id.jpg

  # Own schema, merged without extra model calls
  doc2json --task generic --schema invoice.json --merge deterministic invoice.pdf

  # Markdown transcription of a scanned PDF, archived under ./outputs
  doc2json --task scanned --archive-dir outputs scan.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (provider route)
  ANTHROPIC_API_KEY       Anthropic API key (provider route)
  EDGEQUAKE_LLM_PROVIDER  Provider used when --provider is not set
  EDGEQUAKE_MODEL         Model used when --model is not set
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library)
  RUST_LOG                Log filter, overrides --verbose/--quiet
"#;

/// Extract validated JSON records from documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doc2json",
    version,
    about = "Extract validated JSON records from PDFs and images using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or HTTP/HTTPS URL (PDF or image).
    input: String,

    /// What to produce.
    #[arg(long, env = "DOC2JSON_TASK", value_enum, default_value = "offer-letter")]
    task: TaskArg,

    /// JSON schema definition for `--task generic`.
    #[arg(long, env = "DOC2JSON_SCHEMA", required_if_eq("task", "generic"))]
    schema: Option<PathBuf>,

    /// How page results are merged.
    #[arg(long, env = "DOC2JSON_MERGE", value_enum, default_value = "batch")]
    merge: MergeArg,

    /// OpenAI-compatible endpoint base URL (e.g. http://127.0.0.1:8081).
    #[arg(long, env = "DOC2JSON_BASE_URL")]
    base_url: Option<String>,

    /// API key for --base-url.
    #[arg(long, env = "DOC2JSON_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Fail before any request when --api-key is missing.
    #[arg(long, env = "DOC2JSON_REQUIRE_API_KEY")]
    require_api_key: bool,

    /// Model ID, for the endpoint or the provider.
    #[arg(long, env = "DOC2JSON_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider: openai, anthropic, gemini, ollama, …
    #[arg(long, env = "DOC2JSON_PROVIDER")]
    provider: Option<String>,

    /// User prompt for the OCR tasks.
    #[arg(long, env = "DOC2JSON_PROMPT")]
    prompt: Option<String>,

    /// Path to a text file replacing the task's system prompt.
    #[arg(long, env = "DOC2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Archive raw outputs in this directory.
    #[arg(long, env = "DOC2JSON_ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// Maximum concurrent page requests (default: all pages at once).
    #[arg(short, long, env = "DOC2JSON_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Per-request model timeout in seconds.
    #[arg(long, env = "DOC2JSON_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// PDF user password.
    #[arg(long, env = "DOC2JSON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Print the full output (pages and stats) as JSON.
    #[arg(long, env = "DOC2JSON_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "DOC2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level logs.
    #[arg(short, long, env = "DOC2JSON_VERBOSE")]
    verbose: bool,

    /// Only print errors.
    #[arg(short, long, env = "DOC2JSON_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum TaskArg {
    OfferLetter,
    NationalId,
    Generic,
    Ocr,
    Scanned,
    Hybrid,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MergeArg {
    Batch,
    Incremental,
    Deterministic,
}

impl From<MergeArg> for MergeStrategy {
    fn from(v: MergeArg) -> Self {
        match v {
            MergeArg::Batch => MergeStrategy::Batch,
            MergeArg::Incremental => MergeStrategy::Incremental,
            MergeArg::Deterministic => MergeStrategy::Deterministic,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress)?;
    let extractor = Extractor::from_config(config).context("Model client setup failed")?;
    let system_prompt = read_system_prompt(&cli).await?;

    let document = input::load(&cli.input, extractor.config().download_timeout_secs)
        .await
        .with_context(|| format!("Failed to load {}", cli.input))?;

    match cli.task {
        TaskArg::Ocr | TaskArg::Scanned | TaskArg::Hybrid => {
            let prompts = TranscriptionPrompts {
                prompt: cli.prompt.clone(),
                system_prompt,
            };
            let output = match cli.task {
                TaskArg::Ocr => extractor.ocr_image(&document, &prompts).await,
                TaskArg::Scanned => extractor.ocr_scanned_pdf(&document, &prompts).await,
                _ => extractor.ocr_pdf_hybrid(&document, &prompts).await,
            }
            .context("Transcription failed")?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?
                );
            } else {
                print!("{}", output.text);
                if !output.text.ends_with('\n') {
                    println!();
                }
            }
        }
        _ => {
            let mut task = build_task(&cli).await?;
            if let Some(system_prompt) = system_prompt {
                task = task.with_system_prompt(system_prompt);
            }
            let output = extractor
                .extract(&document, &task)
                .await
                .context("Extraction failed")?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?
                );
            } else {
                println!("{}", output.record.to_json_pretty());
            }
            if !cli.quiet {
                eprintln!(
                    "{}",
                    dim(&format!(
                        "{}/{} pages, {} merge calls, {}ms",
                        output.stats.processed_pages,
                        output.stats.total_pages,
                        output.stats.merge_calls,
                        output.stats.total_duration_ms
                    ))
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .merge_strategy(cli.merge.into())
        .api_timeout_secs(cli.timeout);

    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(ref base_url) = cli.base_url {
        let mut endpoint = ModelEndpoint::new(base_url.clone());
        if let Some(ref key) = cli.api_key {
            endpoint = endpoint.with_api_key(key.clone());
        }
        if cli.require_api_key {
            endpoint = endpoint.requiring_api_key();
        }
        if let Some(ref model) = cli.model {
            endpoint = endpoint.with_model(model.clone());
        }
        builder = builder.endpoint(endpoint);
    } else {
        if let Some(ref provider) = cli.provider {
            builder = builder.provider_name(provider.clone());
        }
        if let Some(ref model) = cli.model {
            builder = builder.model(model.clone());
        }
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(ref dir) = cli.archive_dir {
        builder = builder.archive(Arc::new(DirectoryArchive::new(dir.clone())));
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn build_task(cli: &Cli) -> Result<ExtractionTask> {
    Ok(match cli.task {
        TaskArg::NationalId => ExtractionTask::national_id(),
        TaskArg::Generic => {
            let path = cli
                .schema
                .as_ref()
                .context("--schema is required for --task generic")?;
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read schema from {:?}", path))?;
            let schema: DocumentSchema = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid schema definition in {:?}", path))?;
            ExtractionTask::generic(schema)
        }
        _ => ExtractionTask::offer_letter(),
    })
}

async fn read_system_prompt(cli: &Cli) -> Result<Option<String>> {
    match cli.system_prompt {
        Some(ref path) => Ok(Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )),
        None => Ok(None),
    }
}
