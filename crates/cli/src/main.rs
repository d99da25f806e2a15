//! tiledseg CLI - tiled segmentation of large rasters

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tiledseg_algorithms::params::SegmentationParams;
use tiledseg_core::io::{GeoTiffBackend, RasterBackend};
use tiledseg_core::Connectivity;
use tiledseg_parallel::pipeline::error_log_path;
use tiledseg_parallel::{Orchestrator, PipelineConfig, PipelineError, RunSummary, Stage};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tiledseg")]
#[command(author, version, about = "Tiled three-stage segmentation of large rasters", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Segment a raster into clumps
    Segment(SegmentArgs),
}

#[derive(clap::Args)]
struct SegmentArgs {
    /// Input raster file
    input: PathBuf,
    /// Output clump raster
    output: PathBuf,
    /// Tile width in pixels
    #[arg(long, default_value = "2000")]
    tile_width: usize,
    /// Tile height in pixels
    #[arg(long, default_value = "2000")]
    tile_height: usize,
    /// Minimum fraction of valid pixels for a tile to stand alone
    #[arg(long, default_value = "0.3")]
    valid_threshold: f64,
    /// Number of k-means clusters
    #[arg(short = 'k', long, default_value = "60")]
    num_clusters: usize,
    /// Minimum clump size in pixels
    #[arg(short, long, default_value = "100")]
    min_pixels: usize,
    /// Spectral distance limit for merging small clumps
    #[arg(short, long, default_value = "100")]
    distance_threshold: f64,
    /// Bands to segment, 1-based and comma separated (default: all)
    #[arg(short, long, value_delimiter = ',')]
    bands: Option<Vec<usize>>,
    /// Use every n-th valid pixel to fit k-means
    #[arg(short, long, default_value = "100")]
    sampling: usize,
    /// Maximum k-means iterations
    #[arg(long, default_value = "200")]
    kmeans_max_iter: usize,
    /// Pixel connectivity: 4 or 8
    #[arg(short, long, default_value = "4")]
    connectivity: u8,
    /// Number of worker threads
    #[arg(short, long, default_value = "1")]
    workers: usize,
    /// Working directory root (kept, only the run's own subdirectory is removed)
    #[arg(long, env = "TILEDSEG_TMPDIR")]
    tmp_dir: Option<PathBuf>,
    /// Per-tile time limit in seconds
    #[arg(long)]
    tile_timeout: Option<f64>,
    /// Also write the per-clump mean of every band
    #[arg(long)]
    mean_image: Option<PathBuf>,
}

impl SegmentArgs {
    fn config(&self) -> Result<PipelineConfig> {
        let tile_timeout = match self.tile_timeout {
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| anyhow::anyhow!("Invalid tile timeout {}: {}", secs, e))?,
            ),
            None => None,
        };
        Ok(PipelineConfig {
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            valid_threshold: self.valid_threshold,
            segmentation: SegmentationParams {
                num_clusters: self.num_clusters,
                min_pixels: self.min_pixels,
                distance_threshold: self.distance_threshold,
                band_subset: self.bands.clone(),
                sampling: self.sampling,
                kmeans_max_iter: self.kmeans_max_iter,
                connectivity: parse_connectivity(self.connectivity)?,
            },
            workers: self.workers,
            tmp_dir: self.tmp_dir.clone(),
            tile_timeout,
            mean_image: self.mean_image.clone(),
        })
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn parse_connectivity(value: u8) -> Result<Connectivity> {
    match value {
        4 => Ok(Connectivity::Four),
        8 => Ok(Connectivity::Eight),
        _ => anyhow::bail!("Unknown connectivity: {}. Use 4 or 8.", value),
    }
}

/// Process exit code for a pipeline error
fn exit_code(err: &PipelineError) -> u8 {
    match err {
        PipelineError::EmptyGrid { .. } => 2,
        PipelineError::NoValidTiles { .. } => 3,
        PipelineError::OverlappingClumps { .. } => 4,
        PipelineError::RasterIo(_) => 5,
        PipelineError::Algorithm(_) => 6,
        PipelineError::ClumpIdOverflow { .. } => 7,
        PipelineError::Cancelled => 130,
        PipelineError::InvalidConfig(_) => 1,
    }
}

fn report(summary: &RunSummary, elapsed: Duration) {
    println!("Clumps saved to: {}", summary.output.display());
    println!("  Run id: {}", summary.run_id);
    println!("  Clumps: {}", summary.clumps);
    for stage in [Stage::One, Stage::Two, Stage::Three] {
        let counts = summary.counts(stage);
        println!(
            "  Stage {}: {} tiles, {} segmented, {} skipped",
            stage, counts.tiles, counts.succeeded, counts.failed
        );
    }
    if let Some(path) = &summary.mean_image {
        println!("  Clump means: {}", path.display());
    }
    if let Some(log) = &summary.error_log {
        println!("  Skipped tiles logged to: {}", log.display());
    }
    println!("  Processing time: {:.2?}", elapsed);
}

fn info_command(input: &Path) -> Result<()> {
    let pb = spinner("Reading raster header...");
    let header = GeoTiffBackend::new()
        .info(input)
        .context("Failed to read raster")?;
    pb.finish_and_clear();

    println!("File: {}", input.display());
    println!(
        "Dimensions: {} x {} ({} cells), {} bands",
        header.cols,
        header.rows,
        header.rows * header.cols,
        header.bands
    );
    println!("Data type: {}", header.data_type);
    println!(
        "Origin: ({:.6}, {:.6}), pixel size {} x {}",
        header.transform.origin_x,
        header.transform.origin_y,
        header.transform.pixel_width,
        header.transform.pixel_height
    );
    if let Some(crs) = &header.crs {
        println!("CRS: {}", crs);
    }
    if let Some(nodata) = header.nodata {
        println!("NoData: {}", nodata);
    }
    Ok(())
}

fn segment_command(args: &SegmentArgs) -> Result<ExitCode> {
    let config = args.config()?;
    info!(
        "Tiles {}x{}, {} clusters, {} workers",
        config.tile_width, config.tile_height, config.segmentation.num_clusters, config.workers
    );

    let pb = spinner("Segmenting...");
    let progress = pb.clone();
    let orchestrator = Orchestrator::new().on_transition(move |state| progress.set_message(format!("Segmenting: {}", state)));
    let start = Instant::now();
    let outcome = orchestrator.run(&args.input, &args.output, &config);
    pb.finish_and_clear();

    match outcome {
        Ok(summary) => {
            report(&summary, start.elapsed());
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("Error: segmentation of {} failed: {}", args.input.display(), err);
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            let log = error_log_path(&args.output);
            if log.exists() {
                eprintln!("  Skipped tiles logged to: {}", log.display());
            }
            Ok(ExitCode::from(exit_code(&err)))
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match &cli.command {
        Commands::Info { input } => {
            info_command(input)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Segment(args) => segment_command(args),
    }
}
