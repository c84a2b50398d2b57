//! CLI binary for scanprep.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and `EditPlan`s and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scanprep::{
    prepare_and_submit, prepare_to_dir, CropRegion, EditPlan, HttpSubmitter,
    NormalizeProgressCallback, OutputFormat, PipelineConfig, PreparedBatch, ProgressCallback,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over the normalization batch. Entries finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} images  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Normalizing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl NormalizeProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
    }

    fn on_entry_start(&self, index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
    }

    fn on_entry_complete(&self, index: usize, total: usize, bytes: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{bytes:>8} bytes")),
            dim(&format!("{secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_entry_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total: usize) {
        self.bar.finish_and_clear();
    }
}

impl Drop for CliProgressCallback {
    fn drop(&mut self) {
        // An aborted batch never reaches on_batch_complete.
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
        let errors = self.errors.load(Ordering::SeqCst);
        if errors > 0 {
            eprintln!("{} {} image(s) failed to normalize", red("✘"), errors);
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Normalize a batch into ./scanprep-out
  scanprep page1.jpg page2.png page3.webp

  # Rotate the second page right, crop it and let auto-enhance pick the colours
  scanprep --only 1 --rotate 1 --crop 40,40,1800,2400 --auto-enhance a.jpg b.jpg

  # Brighten every page and write PNGs
  scanprep --brightness 1.2 --format png -o out/ *.jpg

  # Normalize and submit to a conversion service
  scanprep --submit https://convert.example.com/api/upload scans/*.png

  # JSON manifest of what was produced
  scanprep --json --no-progress page1.jpg

ENVIRONMENT VARIABLES:
  SCANPREP_OUTPUT_DIR      Default output directory
  SCANPREP_SUBMIT_URL      Submit instead of writing files
  SCANPREP_MAX_DIMENSION   Long-side bound in pixels
  RUST_LOG                 Override log filtering (tracing EnvFilter syntax)
"#;

/// Prepare document scans: crop, rotate, colour-correct, bound and re-encode.
#[derive(Parser, Debug)]
#[command(
    name = "scanprep",
    version,
    about = "Prepare document scans for conversion: edit, normalize, submit",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image files or HTTP/HTTPS URLs, in submission order.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Clockwise quarter turns to apply (negative turns left).
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    rotate: i32,

    /// Crop rectangle `x,y,width,height` in rotated-image pixels.
    #[arg(long, value_parser = parse_crop)]
    crop: Option<CropRegion>,

    /// Brightness factor, clamped to 0.5–1.5.
    #[arg(long)]
    brightness: Option<f64>,

    /// Contrast factor, clamped to 0.5–1.5.
    #[arg(long)]
    contrast: Option<f64>,

    /// Estimate brightness/contrast from the (cropped) image.
    #[arg(long)]
    auto_enhance: bool,

    /// Apply the edits only to this 0-based input index.
    #[arg(long)]
    only: Option<usize>,

    /// Longest side after normalization, in pixels.
    #[arg(long, env = "SCANPREP_MAX_DIMENSION", default_value_t = 1024)]
    max_dimension: u32,

    /// JPEG quality (1–100).
    #[arg(long, default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Output encoding.
    #[arg(long, value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// Number of images normalized at once.
    #[arg(short, long, default_value_t = 8)]
    concurrency: usize,

    /// Directory receiving the normalized files.
    #[arg(short, long, env = "SCANPREP_OUTPUT_DIR", default_value = "scanprep-out")]
    output_dir: PathBuf,

    /// Submit the batch as multipart/form-data to this URL instead of writing files.
    #[arg(long, env = "SCANPREP_SUBMIT_URL")]
    submit: Option<String>,

    /// Multipart field name for each file.
    #[arg(long, default_value = "files")]
    field: String,

    /// Per-file size limit at selection time, in MiB.
    #[arg(long, default_value_t = 8)]
    max_file_size: u64,

    /// Print a JSON manifest instead of the human summary.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// Upload request timeout in seconds.
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
    Webp,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Webp => OutputFormat::WebP,
        }
    }
}

/// One line of the `--json` manifest.
#[derive(Serialize)]
struct ManifestEntry<'a> {
    index: usize,
    name: &'a str,
    mime_type: &'a str,
    width: u32,
    height: u32,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a PathBuf>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    images: Vec<ManifestEntry<'a>>,
    edits: &'a [scanprep::prepare::AppliedEdit],
    stats: &'a scanprep::prepare::PrepareStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    submission: Option<&'a scanprep::SubmissionReceipt>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn NormalizeProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let plans = vec![EditPlan {
        index: cli.only,
        quarter_turns: cli.rotate,
        crop: cli.crop,
        auto_enhance: cli.auto_enhance,
        brightness: cli.brightness,
        contrast: cli.contrast,
    }];

    // ── Run ──────────────────────────────────────────────────────────────
    let (batch, receipt) = if cli.submit.is_some() {
        let submitter = HttpSubmitter::from_config(&config).context("Invalid submit target")?;
        let (batch, receipt) = prepare_and_submit(cli.inputs.as_slice(), &plans, &submitter, &config)
            .await
            .context("Submission failed")?;
        (batch, Some(receipt))
    } else {
        let batch = prepare_to_dir(cli.inputs.as_slice(), &plans, &cli.output_dir, &config)
            .await
            .context("Preparation failed")?;
        (batch, None)
    };

    if cli.json {
        let manifest = manifest(&batch, receipt.as_ref());
        println!(
            "{}",
            serde_json::to_string_pretty(&manifest).context("Failed to serialise manifest")?
        );
    } else if !cli.quiet {
        print_summary(&cli, &batch, receipt.as_ref());
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_dimension(cli.max_dimension)
        .quality(cli.quality)
        .output_format(cli.format.into())
        .concurrency(cli.concurrency)
        .max_file_size_mb(cli.max_file_size)
        .upload_field(cli.field.clone())
        .request_timeout_secs(cli.timeout);

    if let Some(ref url) = cli.submit {
        builder = builder.upload_url(url.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Parse `--crop x,y,w,h`.
fn parse_crop(s: &str) -> Result<CropRegion> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<u32>()
                .with_context(|| format!("Invalid crop component: '{}'", p.trim()))
        })
        .collect::<Result<Vec<_>>>()?;

    match parts.as_slice() {
        [x, y, w, h] => {
            if *w == 0 || *h == 0 {
                anyhow::bail!("Crop width and height must be positive (got {}x{})", w, h);
            }
            Ok(CropRegion::new(*x, *y, *w, *h))
        }
        _ => anyhow::bail!("Crop must be x,y,width,height (got '{}')", s),
    }
}

fn manifest<'a>(
    batch: &'a PreparedBatch,
    receipt: Option<&'a scanprep::SubmissionReceipt>,
) -> Manifest<'a> {
    let images = batch
        .images
        .iter()
        .enumerate()
        .map(|(i, img)| ManifestEntry {
            index: img.index,
            name: &img.name,
            mime_type: &img.mime_type,
            width: img.size.0,
            height: img.size.1,
            bytes: img.byte_len,
            path: batch.written.get(i),
        })
        .collect();
    Manifest {
        images,
        edits: &batch.edits,
        stats: &batch.stats,
        submission: receipt,
    }
}

fn print_summary(cli: &Cli, batch: &PreparedBatch, receipt: Option<&scanprep::SubmissionReceipt>) {
    let s = &batch.stats;
    for edit in &batch.edits {
        eprintln!(
            "  {} edited #{}  {}x{}  {}",
            green("✎"),
            edit.index,
            edit.size.0,
            edit.size.1,
            dim(&edit.adjust.to_string())
        );
    }
    match receipt {
        Some(r) => eprintln!(
            "{}  {} images  {}ms  →  {} (HTTP {})",
            green("✔"),
            s.entries,
            s.duration_ms,
            bold(cli.submit.as_deref().unwrap_or_default()),
            r.status
        ),
        None => eprintln!(
            "{}  {} images  {}ms  →  {}",
            green("✔"),
            s.entries,
            s.duration_ms,
            bold(&cli.output_dir.display().to_string())
        ),
    }
    eprintln!(
        "   {} resized  /  {} bytes in  →  {} bytes out",
        dim(&s.resized.to_string()),
        dim(&s.input_bytes.to_string()),
        dim(&s.output_bytes.to_string()),
    );
}
