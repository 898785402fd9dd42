//! CLI binary for jfif2jpg.
//!
//! `serve` runs the proxy; `convert` drives the orchestrator against a
//! running proxy and writes the results to disk.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use jfif2jpg::{
    proxy, ConversionEvents, Download, EventsCallback, ItemId, ItemStatus, Notice,
    Orchestrator, OrchestratorConfig, ProxyConfig, SourceFile, UpstreamSource,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI events using indicatif ───────────────────────────────────────────────

/// Terminal progress: one bar for the batch plus a line per finished file.
/// Files finish in any order, so timings are tracked per item.
struct CliEvents {
    bar: ProgressBar,
    start_times: Mutex<HashMap<ItemId, Instant>>,
}

impl CliEvents {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, id: &ItemId) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionEvents for CliEvents {
    fn on_status_change(&self, id: &ItemId, name: &str, status: ItemStatus) {
        if status == ItemStatus::Converting {
            self.start_times
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.clone(), Instant::now());
            self.bar.set_message(name.to_string());
        }
        if !status.is_terminal() {
            return;
        }

        let mark = if status == ItemStatus::Done {
            green("✓")
        } else {
            red("✗")
        };
        let secs = self.elapsed(id);
        self.bar.println(format!(
            "  {} {:<40} {}",
            mark,
            name,
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_notice(&self, notice: &Notice) {
        match notice {
            // Per-file outcomes are already printed by on_status_change.
            Notice::Converted { .. } => {}
            Notice::ConversionFailed { name, reason } => {
                self.bar.println(format!("    {} {}", dim(name), red(reason)));
            }
            other => self.bar.println(format!("{} {}", yellow("⚠"), other)),
        }
    }
}

/// Prints notices only; used when the progress bar is off.
struct PlainEvents;

impl ConversionEvents for PlainEvents {
    fn on_notice(&self, notice: &Notice) {
        match notice {
            Notice::ConversionFailed { name, reason } => eprintln!("Failed to convert {name}: {reason}"),
            other => eprintln!("{other}"),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the proxy (reads JFIF2JPG_UPSTREAM_URL / JFIF2JPG_API_KEY per request)
  jfif2jpg serve --bind 0.0.0.0:3000

  # Convert a few files through a running proxy
  jfif2jpg convert a.jfif b.jfif -o converted/

  # Point at a remote proxy, cap each request at 30s
  jfif2jpg convert --endpoint https://example.net/api/convert --timeout 30 *.jfif

ENVIRONMENT VARIABLES:
  JFIF2JPG_UPSTREAM_URL   Conversion service base URL (default http://127.0.0.1:8000/api)
  JFIF2JPG_API_KEY        Conversion service API key (server side only)
  JFIF2JPG_ENDPOINT       Proxy URL used by `convert`
  RUST_LOG                Override log filtering (e.g. jfif2jpg=debug)
"#;

/// Convert JFIF images through a remote conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "jfif2jpg",
    version,
    about = "Convert JFIF images through a remote conversion service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "JFIF2JPG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "JFIF2JPG_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy endpoint.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "JFIF2JPG_BIND", default_value = "127.0.0.1:3000")]
        bind: String,

        /// Largest accepted upload in bytes.
        #[arg(long, env = "JFIF2JPG_MAX_UPLOAD_BYTES", default_value_t = jfif2jpg::config::DEFAULT_MAX_UPLOAD_BYTES)]
        max_upload_bytes: usize,

        /// Fixed conversion service base URL. Without it the URL is read from
        /// JFIF2JPG_UPSTREAM_URL on every request. The key is always read
        /// from JFIF2JPG_API_KEY per request.
        #[arg(long)]
        upstream_url: Option<String>,

        /// `Origin` header to send upstream.
        #[arg(long, env = "JFIF2JPG_ORIGIN")]
        origin: Option<String>,
    },

    /// Convert files through a running proxy and save the results.
    Convert {
        /// JFIF files to convert.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Proxy convert URL.
        #[arg(long, env = "JFIF2JPG_ENDPOINT", default_value = "http://127.0.0.1:3000/api/convert")]
        endpoint: String,

        /// Directory to write results into.
        #[arg(short, long, env = "JFIF2JPG_OUTPUT", default_value = ".")]
        output: PathBuf,

        /// Per-file request timeout in seconds (default: none).
        #[arg(long, env = "JFIF2JPG_TIMEOUT")]
        timeout: Option<u64>,

        /// Disable progress bar.
        #[arg(long, env = "JFIF2JPG_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-file feedback, so library logs stay
    // at error level while it is on.
    let show_progress = matches!(
        cli.command,
        Command::Convert { no_progress: false, .. }
    ) && !cli.quiet;
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

    match cli.command {
        Command::Serve {
            bind,
            max_upload_bytes,
            upstream_url,
            origin,
        } => {
            let mut builder = ProxyConfig::builder()
                .bind_addr(bind)
                .max_upload_bytes(max_upload_bytes);
            if let Some(base_url) = upstream_url {
                builder = builder.upstream(UpstreamSource::FixedUrl { base_url });
            }
            if let Some(origin) = origin {
                builder = builder.origin(origin);
            }
            let config = builder.build().context("Invalid proxy configuration")?;
            proxy::serve(config).await.context("Proxy failed")?;
        }
        Command::Convert {
            files,
            endpoint,
            output,
            timeout,
            no_progress: _,
        } => {
            run_convert(files, endpoint, output, timeout, show_progress, cli.quiet).await?;
        }
    }

    Ok(())
}

async fn run_convert(
    files: Vec<PathBuf>,
    endpoint: String,
    output: PathBuf,
    timeout: Option<u64>,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let mut sources = Vec::with_capacity(files.len());
    for path in &files {
        let source = SourceFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        sources.push(source);
    }

    let cli_events = show_progress.then(|| CliEvents::new(sources.len()));
    let events: Option<EventsCallback> = match &cli_events {
        Some(ev) => Some(Arc::clone(ev) as EventsCallback),
        None if !quiet => Some(Arc::new(PlainEvents) as EventsCallback),
        None => None,
    };

    let mut builder = OrchestratorConfig::builder().endpoint(endpoint);
    if let Some(secs) = timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(events) = events {
        builder = builder.events(events);
    }
    let config = builder.build().context("Invalid configuration")?;

    let queue = Orchestrator::new(config).context("Failed to set up the upload queue")?;
    let report = queue.add_files(sources);
    if let Some(ev) = &cli_events {
        // Rejected files never start, so the bar only counts what was queued.
        ev.bar.set_length(report.added.len() as u64);
    }

    queue.settle().await;

    if let Some(ev) = &cli_events {
        ev.bar.finish_and_clear();
    }

    let items = queue.items();
    let done = items.iter().filter(|i| i.status() == ItemStatus::Done).count();
    let failed = items.iter().filter(|i| i.status() == ItemStatus::Error).count();

    if !queue.has_finished() {
        anyhow::bail!("Nothing converted ({} failed)", failed);
    }
    let saved = queue
        .download_all(&output)
        .await
        .context("Failed to save results")?;

    if !quiet {
        let mark = if failed == 0 { green("✔") } else { yellow("⚠") };
        match &saved {
            Download::Single(path) => eprintln!(
                "{mark} {}/{} converted  →  {}",
                bold(&done.to_string()),
                items.len(),
                bold(&path.display().to_string())
            ),
            Download::Archive { path, entries } => eprintln!(
                "{mark} {}/{} converted  →  {}  {}",
                bold(&done.to_string()),
                items.len(),
                bold(&path.display().to_string()),
                dim(&format!("({} entries)", entries.len()))
            ),
        }
        if failed > 0 {
            eprintln!("   {} failed", red(&failed.to_string()));
        }
    }

    Ok(())
}
