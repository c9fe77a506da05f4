//! demchange CLI
//!
//! Command-line interface for DEM change surfaces

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use demchange::core::{
    CacheRetention, DifferenceEngine, DifferenceOutcome, DifferenceOutputs, ExtentJob, GdalVrtCompositor,
    GroupingPolicy, PipelineOutcome, ResampleMethod, StripPipeline, ValidityFilter,
};
use demchange::{BoundingBox, GdalStore, PipelineConfig};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "demchange")]
#[command(version, about = "Multi-temporal DEM differencing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Difference a list of dated rasters (newest minus oldest per pixel)
    Diff {
        /// Input rasters; names must contain a YYYYMMDD date
        #[arg(required = true)]
        rasters: Vec<PathBuf>,
        /// Difference output; the centimeter version gets a `_cm` suffix
        #[arg(short, long)]
        output: PathBuf,
        /// Day-gap output
        #[arg(short, long)]
        day_gap: PathBuf,
        /// Keep every loaded raster in memory for the whole run
        #[arg(long)]
        keep_all: bool,
    },
    /// Run the strip or tile workflow for one extent
    Run(RunArgs),
    /// Rank rasters by valid-pixel percentage
    Validity {
        #[arg(required = true)]
        rasters: Vec<PathBuf>,
        /// Directory receiving the report (and culled rasters)
        #[arg(short, long, default_value = ".")]
        work_dir: PathBuf,
        /// Move rasters below this percentage aside
        #[arg(long)]
        keep_percent: Option<f64>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Directory holding the input GeoTIFFs
    input_dir: PathBuf,
    /// Pipeline configuration (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Working / output directory
    #[arg(short, long)]
    work_dir: Option<PathBuf>,
    /// Extent ID used in output names
    #[arg(long, default_value_t = 0)]
    id: u32,
    /// Prefix of the output names
    #[arg(long, default_value = "dem")]
    prefix: String,
    /// Extent as MIN_X MIN_Y MAX_X MAX_Y in the raster projection
    #[arg(long, num_args = 4, value_names = ["MIN_X", "MIN_Y", "MAX_X", "MAX_Y"], allow_negative_numbers = true)]
    extent: Option<Vec<f64>>,
    /// Output resolution
    #[arg(long)]
    out_res: Option<f64>,
    /// Keep rasters with at least this valid percentage
    #[arg(long)]
    keep_percent: Option<f64>,
    /// Resampling method (nearest, bilinear, average)
    #[arg(long)]
    resample: Option<String>,
    /// Visit rasters by date when grouping instead of input order
    #[arg(long)]
    chronological: bool,
    /// Remove mosaic directories after differencing
    #[arg(long)]
    remove_intermediate: bool,
}

impl RunArgs {
    /// Configuration file (or defaults) with the command-line overrides applied
    fn config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(res) = self.out_res {
            config.out_res = res;
        }
        if self.keep_percent.is_some() {
            config.keep_percent = self.keep_percent;
        }
        if let Some(method) = &self.resample {
            config.resample = method.parse::<ResampleMethod>()?;
        }
        if self.chronological {
            config.grouping_policy = GroupingPolicy::Chronological;
        }
        config.remove_intermediate |= self.remove_intermediate;
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Diff {
            rasters,
            output,
            day_gap,
            keep_all,
        } => run_diff(&rasters, &output, &day_gap, keep_all),
        Commands::Run(args) => run_pipeline(&args),
        Commands::Validity {
            rasters,
            work_dir,
            keep_percent,
        } => run_validity(&rasters, &work_dir, keep_percent),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_diff(rasters: &[PathBuf], output: &Path, day_gap: &Path, keep_all: bool) -> Result<()> {
    let store = GdalStore::new();
    let mut engine = DifferenceEngine::new(&store);
    if keep_all {
        engine = engine.with_retention(CacheRetention::KeepAll);
    }
    let outcome = engine
        .run_rasters(rasters, &DifferenceOutputs::new(output, day_gap))
        .context("DEM difference failed")?;
    report_difference(&outcome);
    Ok(())
}

fn run_pipeline(args: &RunArgs) -> Result<()> {
    let config = args.config()?;
    let extent = match args.extent.as_deref() {
        Some(&[min_x, min_y, max_x, max_y]) => Some(BoundingBox::new(min_x, min_y, max_x, max_y)),
        Some(other) => bail!("extent needs 4 values, got {}", other.len()),
        None => None,
    };
    let rasters = list_tifs(&args.input_dir)?;
    let job = ExtentJob {
        id: args.id,
        extent,
        prefix: args.prefix.clone(),
    };

    let store = GdalStore::new();
    let compositor = GdalVrtCompositor;
    let pipeline = StripPipeline::new(&store, &compositor, &config)?;
    match pipeline
        .run(&job, &rasters)
        .with_context(|| format!("processing extent {}", args.id))?
    {
        PipelineOutcome::Tile { mosaic, reused } => {
            println!("tile mosaic: {}{}", mosaic.display(), if reused { " (existing)" } else { "" });
        }
        PipelineOutcome::Strip {
            strip_rasters,
            date_rasters,
            difference,
        } => {
            println!("strip rasters kept: {}", strip_rasters.len());
            println!("date rasters kept: {}", date_rasters.len());
            if let Some(outcome) = difference {
                report_difference(&outcome);
            }
        }
    }
    Ok(())
}

fn run_validity(rasters: &[PathBuf], work_dir: &Path, keep_percent: Option<f64>) -> Result<()> {
    let store = GdalStore::new();
    let filter = ValidityFilter::new(keep_percent, None);
    let kept = filter.apply(&store, rasters, work_dir)?;
    println!("kept {} of {} rasters", kept.len(), rasters.len());
    Ok(())
}

fn list_tifs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut rasters = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_tif = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("tif"))
            .unwrap_or(false);
        if path.is_file() && is_tif {
            rasters.push(path);
        }
    }
    rasters.sort();
    Ok(rasters)
}

fn report_difference(outcome: &DifferenceOutcome) {
    match outcome {
        DifferenceOutcome::Skipped => println!("difference outputs exist, nothing to do"),
        DifferenceOutcome::Computed(summary) => {
            println!(
                "difference: {} ({:?}), day gap: {}",
                summary.difference_path.display(),
                summary.encoding,
                summary.day_gap_path.display()
            );
            println!(
                "{} dates, {}/{} pairs evaluated, {} of {} cells unfilled",
                summary.dates,
                summary.pairs_evaluated,
                summary.pairs_total,
                summary.unfilled_cells,
                summary.total_cells
            );
        }
    }
}
