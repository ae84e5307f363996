// THEORY:
// A single explicit configuration object travels from stage to stage. There is
// no process-wide shared state: whoever drives the pipeline builds a
// `PipelineConfig` (in code or from JSON) and hands it in.

use crate::error::{TrackingError, TrackingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which similarity matrix is fed to the spectral clustering step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AffinityKind {
    /// `exp(-0.5 * D / std(D))` of the Martin distance matrix.
    #[default]
    Martin,
    /// The same transform applied to the normalized graph Laplacian of `D`.
    Laplacian,
}

/// Configuration for the tracking and clustering pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Components with a voxel count at or below this value are treated as noise.
    pub volume_threshold: usize,
    /// Largest centroid displacement (in voxels) accepted as the same object.
    pub gate_threshold: f64,
    /// If set, trajectories unseen for more than this many frames stop being
    /// matching candidates. `None` keeps every trajectory alive forever.
    pub max_gap: Option<usize>,
    /// Dimension `q` of the reduced state space.
    pub state_dim: usize,
    /// Number of transition matrices in each AR model.
    pub ar_order: usize,
    /// Number of trajectory clusters `k`.
    pub num_clusters: usize,
    pub affinity: AffinityKind,
    /// Seed for the spectral discretization step.
    pub seed: u64,
    /// Trajectory length required for clustering. Defaults to the frame count.
    pub required_length: Option<usize>,
    /// Directory that receives persisted artifacts.
    pub output_dir: PathBuf,
    pub labels_file: String,
    pub affinity_file: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 1,
            gate_threshold: 20.0,
            max_gap: None,
            state_dim: 2,
            ar_order: 5,
            num_clusters: 2,
            affinity: AffinityKind::Martin,
            seed: 0,
            required_length: None,
            output_dir: PathBuf::from("tseg_output"),
            labels_file: "cluster_labels.npy".to_string(),
            affinity_file: "affinity.npy".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> TrackingResult<Self> {
        let cfg: PipelineConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> TrackingResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| TrackingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> TrackingResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every parameter that can be checked without data.
    pub fn validate(&self) -> TrackingResult<()> {
        if self.volume_threshold == 0 {
            return Err(TrackingError::invalid_parameter("volume_threshold", "must be >= 1"));
        }
        if !(self.gate_threshold.is_finite() && self.gate_threshold >= 0.0) {
            return Err(TrackingError::invalid_parameter(
                "gate_threshold",
                format!("must be a finite non-negative distance, got {}", self.gate_threshold),
            ));
        }
        if self.state_dim == 0 {
            return Err(TrackingError::invalid_parameter("state_dim", "must be > 0"));
        }
        if self.ar_order == 0 {
            return Err(TrackingError::invalid_parameter("ar_order", "must be > 0"));
        }
        if self.num_clusters == 0 {
            return Err(TrackingError::invalid_parameter("num_clusters", "must be > 0"));
        }
        if let Some(len) = self.required_length {
            if len <= self.ar_order {
                return Err(TrackingError::invalid_parameter(
                    "required_length",
                    format!("must exceed ar_order ({}), got {len}", self.ar_order),
                ));
            }
        }
        Ok(())
    }

    pub fn labels_path(&self) -> PathBuf {
        self.output_dir.join(&self.labels_file)
    }

    pub fn affinity_path(&self) -> PathBuf {
        self.output_dir.join(&self.affinity_file)
    }
}
