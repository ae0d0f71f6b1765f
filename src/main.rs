use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use dupecheck::core::record::ImageRecord;
use dupecheck::logging;
use dupecheck::services::credentials::remember_selected_folder;
use dupecheck::services::reveal::reveal_path;
use dupecheck::{
    FileCredentialStore, PathCredentialResolver, ScanConfig, ScanState, Scanner, SystemFileBrowser,
    UnrestrictedAccess,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const BAR_LENGTH: u64 = 1000;

#[derive(Parser, Debug)]
#[command(name = "dupecheck", version, about = "Find visually similar images in a folder")]
struct Cli {
    /// Log debug details (per-file skips, extraction failures)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a folder and list similar image pairs
    Scan {
        /// Directory to scan (not recursive)
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Minimum cosine similarity for a pair, 0..=1
        #[arg(short, long)]
        threshold: Option<f64>,
        /// JSON config file (default: user config dir, if present)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remember a folder as the granted location for reveal
    Grant {
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Show an image in the system file browser
    Reveal {
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Serialize)]
struct ScanReport<'a> {
    directory: &'a Path,
    threshold: f64,
    images: usize,
    pairs: Vec<PairReport<'a>>,
}

#[derive(Serialize)]
struct PairReport<'a> {
    image_a: &'a Path,
    image_b: &'a Path,
    similarity: f64,
    percentage: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Scan {
            path,
            threshold,
            config,
            json,
        } => scan(&path, threshold, config.as_deref(), json).await,
        Commands::Grant { path } => grant(&path),
        Commands::Reveal { file, yes } => reveal(&file, yes),
    }
}

async fn scan(
    path: &Path,
    threshold: Option<f64>,
    config: Option<&Path>,
    json: bool,
) -> Result<()> {
    let mut config = match config {
        Some(file) => ScanConfig::load(file)
            .with_context(|| format!("Failed to load config {:?}", file))?,
        None => ScanConfig::load_default().context("Failed to load default config")?,
    };
    if let Some(threshold) = threshold {
        config = config.with_threshold(threshold);
    }
    let threshold = config.threshold;
    let scanner = Scanner::new(config).context("Invalid scan configuration")?;

    if !json {
        println!("▶ Scanning for similar images in: {}", path.display());
    }

    let bar = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(BAR_LENGTH)
    };
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {percent:>3}% {msg}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let start = Instant::now();
    let updates = scanner.subscribe();
    let handle = scanner.start(path);
    let progress = tokio::spawn(drive_progress(bar.clone(), updates, handle.generation()));
    let state = handle.finished().await;
    progress.await.context("Progress display failed")?;
    bar.finish_and_clear();

    if let Some(error) = &state.error {
        bail!("Scan failed: {}", error);
    }

    if json {
        let report = ScanReport {
            directory: path,
            threshold,
            images: state.catalog.len(),
            pairs: state
                .results
                .iter()
                .map(|pair| PairReport {
                    image_a: pair.image_a().source_path(),
                    image_b: pair.image_b().source_path(),
                    similarity: pair.similarity(),
                    percentage: pair.percentage(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("⏱ scan took {:.2?}", start.elapsed());
    print_results(&state);
    Ok(())
}

async fn drive_progress(
    bar: ProgressBar,
    mut updates: watch::Receiver<Arc<ScanState>>,
    generation: u64,
) {
    loop {
        let state = updates.borrow_and_update().clone();
        if state.generation > generation {
            break;
        }
        if state.generation == generation {
            bar.set_position((state.progress * BAR_LENGTH as f64) as u64);
            bar.set_message(format!("{} images", state.catalog.len()));
            if state.is_finished() {
                break;
            }
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
}

fn print_results(state: &ScanState) {
    if state.results.is_empty() {
        println!("No similar images found among {} image(s).", state.catalog.len());
        return;
    }

    println!(
        "Found {} similar pair(s) among {} image(s):",
        state.results.len(),
        state.catalog.len()
    );
    for (i, pair) in state.results.iter().enumerate() {
        println!("\n✨ Pair {}: {}", i + 1, pair.percentage());
        print_image(pair.image_a());
        print_image(pair.image_b());
    }
}

fn print_image(record: &ImageRecord) {
    println!("   ▶ {}", record.source_path().display());
    println!(
        "     {} | {} | {}",
        record.describe_dimensions(),
        record.describe_file_size(),
        record.describe_creation_time()
    );
}

fn grant(path: &Path) -> Result<()> {
    let store =
        FileCredentialStore::default_location().context("Failed to locate credential store")?;
    remember_selected_folder(&store, &PathCredentialResolver, path)
        .with_context(|| format!("Failed to grant access to {:?}", path))?;
    println!("✅ Granted access to {}", path.display());
    Ok(())
}

fn reveal(file: &Path, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Show {} in the file browser?", file.display()))
            .default(true)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let store =
        FileCredentialStore::default_location().context("Failed to locate credential store")?;
    reveal_path(
        file,
        &store,
        &PathCredentialResolver,
        &UnrestrictedAccess,
        &SystemFileBrowser,
    )
    .with_context(|| format!("Failed to reveal {:?}", file))?;
    println!("📂 Revealed {}", file.display());
    Ok(())
}
