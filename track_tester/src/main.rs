use anyhow::{bail, Context, Result};
use cell_tracker::core_modules::export::point_cloud;
use cell_tracker::{ParallelDistanceEngine, PipelineConfig, TrackingPipeline, Volume};
use clap::Parser;
use ndarray::{ArrayD, Axis, Ix3};
use ndarray_npy::{read_npy, write_npy};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Track segmented cells through a frame stack and cluster their trajectories.
#[derive(Parser, Debug)]
#[command(name = "track_tester", version)]
struct Args {
    /// `.npy` frame stack: `(frames, z, x, y)` volumes or `(frames, x, y)` images.
    frames: PathBuf,

    /// JSON pipeline configuration. Missing fields take their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured output directory.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Overrides the configured number of clusters.
    #[arg(short = 'k', long)]
    clusters: Option<usize>,

    /// Compute the distance matrix on all CPUs.
    #[arg(long)]
    parallel: bool,

    /// Only track; skip clustering.
    #[arg(long)]
    track_only: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(true))
        .with(filter)
        .init();
}

fn load_frames(path: &Path) -> Result<Vec<Volume>> {
    let stack: ArrayD<f32> =
        read_npy(path).with_context(|| format!("reading frame stack {}", path.display()))?;
    let stack = match stack.ndim() {
        4 => stack,
        3 => stack.insert_axis(Axis(1)),
        n => bail!("expected a 3D or 4D frame stack, got {n} dimensions"),
    };
    stack
        .outer_iter()
        .map(|frame| {
            frame
                .to_owned()
                .into_dimensionality::<Ix3>()
                .context("frame is not three-dimensional")
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(k) = args.clusters {
        config.num_clusters = k;
    }
    let pipeline = TrackingPipeline::new(config)?;

    // --- 2. Tracking ---
    let frames = load_frames(&args.frames)?;
    info!(frames = frames.len(), "loaded frame stack");
    let tracking = pipeline.track(&frames)?;

    let output_dir = &pipeline.config().output_dir;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let cloud_path = output_dir.join("trajectory_points.npy");
    write_npy(&cloud_path, &point_cloud(&tracking.trajectories))
        .with_context(|| format!("writing {}", cloud_path.display()))?;

    if args.track_only {
        info!(trajectories = tracking.trajectories.len(), "tracking only, done");
        return Ok(());
    }

    // --- 3. Clustering ---
    let clusters = if args.parallel {
        ParallelDistanceEngine::new().cluster(&pipeline, &tracking).await?
    } else {
        pipeline.cluster(&tracking)?
    };
    for warning in &clusters.warnings {
        warn!(%warning, "numerical warning");
    }

    // --- 4. Artifacts ---
    pipeline.persist(&clusters)?;
    info!(
        trajectories = clusters.labels.len(),
        clusters = pipeline.config().num_clusters,
        output = %output_dir.display(),
        "done"
    );
    Ok(())
}
