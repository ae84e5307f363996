// THEORY:
// The `pipeline` module is the top-level API for the tracking engine. It wraps
// the full stack of stages in one interface: hand it a sequence of segmented
// volumes and receive trajectories, then trajectory clusters.
//
// Key architectural principles:
// 1.  **Batch Stages**: Every stage runs to completion over the whole sequence
//     before the next one starts. Intermediate results are kept in the reports
//     so callers can inspect or display any layer.
// 2.  **Explicit Configuration**: The pipeline owns a validated
//     `PipelineConfig`; no stage reads global state.
// 3.  **Two Phases**: `track` turns volumes into trajectories. `cluster` turns
//     trajectories into labels. They can be run separately, e.g. to track once
//     and cluster under several settings.

use crate::config::{AffinityKind, PipelineConfig};
use crate::core_modules::affinity::{compute_affinity, DynamicsReport};
use crate::core_modules::centroid::{compute_centroids, describe_components};
use crate::core_modules::component::{common_shape, Centroid, Component, LabelVolume, Volume};
use crate::core_modules::conditioner::{condition, ConditionedTrajectories};
use crate::core_modules::export::{centre_marker_volumes, cluster_point_cloud, persist_clusters, point_cloud};
use crate::core_modules::labeler::{label_components, LabeledSequence};
use crate::core_modules::noise_filter::{filter_components, retain_survivors};
use crate::core_modules::spectral::spectral_clustering;
use crate::core_modules::tracker::{coordinate_lists, track, Trajectory};
use crate::error::{NumericalWarning, TrackingError, TrackingResult};
use ndarray::{Array2, Array3};
use tracing::{info, warn};

/// Everything produced by the tracking phase.
#[derive(Debug, Clone)]
pub struct TrackingReport {
    /// Label volumes, with the survivor lists attached.
    pub labeled: LabeledSequence,
    pub survivors: Vec<Vec<u32>>,
    pub centroids: Vec<Vec<Centroid>>,
    pub components: Vec<Vec<Component>>,
    pub trajectories: Vec<Trajectory>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<Vec<f64>>,
    pub z: Vec<Vec<f64>>,
    pub frame_shape: Option<[usize; 3]>,
}

impl TrackingReport {
    pub fn num_frames(&self) -> usize {
        self.labeled.len()
    }

    /// Label volumes with every noise component zeroed.
    pub fn cleaned_labels(&self) -> TrackingResult<Vec<LabelVolume>> {
        retain_survivors(&self.labeled, &self.survivors)
    }

    /// `(z, x, y)` rows for every trajectory point.
    pub fn point_cloud(&self) -> Array2<f64> {
        point_cloud(&self.trajectories)
    }

    /// Per-frame volumes marking the detected centres.
    pub fn centre_markers(&self) -> Vec<Array3<u8>> {
        match self.frame_shape {
            Some(shape) => centre_marker_volumes(&self.centroids, shape),
            None => Vec::new(),
        }
    }
}

/// Everything produced by the clustering phase.
#[derive(Debug, Clone)]
pub struct ClusterReport {
    pub conditioned: ConditionedTrajectories,
    pub dynamics: DynamicsReport,
    pub affinity_kind: AffinityKind,
    /// The similarity matrix the labels were computed from.
    pub affinity: Array2<f64>,
    /// One label per conditioned trajectory, in `0..k`.
    pub labels: Vec<usize>,
    pub point_cloud: Array2<f64>,
    /// Cluster id of every row of `point_cloud`.
    pub point_labels: Vec<usize>,
    pub warnings: Vec<NumericalWarning>,
}

/// Output of a full `run`.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub tracking: TrackingReport,
    pub clusters: ClusterReport,
}

/// The main, top-level struct for the tracking engine.
#[derive(Debug, Clone)]
pub struct TrackingPipeline {
    config: PipelineConfig,
}

impl TrackingPipeline {
    pub fn new(config: PipelineConfig) -> TrackingResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Labels, filters, and localizes components, then links them over time.
    pub fn track(&self, frames: &[Volume]) -> TrackingResult<TrackingReport> {
        let frame_shape = common_shape(frames, "track")?;

        // Stage 1: Connected-component labeling
        let mut labeled = label_components(frames)?;

        // Stage 2: Noise removal
        let survivors = filter_components(frames, &labeled, self.config.volume_threshold)?;
        labeled.attach_survivors(survivors.clone());

        // Stage 3: Centre detection
        let centroids = compute_centroids(frames, &labeled.labels, &survivors)?;
        let components = describe_components(frames, &labeled.labels, &survivors)?;

        // Stage 4: Frame-to-frame association
        let trajectories = track(&centroids, self.config.gate_threshold, self.config.max_gap)?;
        let (x, y, z) = coordinate_lists(&trajectories);

        info!(
            frames = frames.len(),
            trajectories = trajectories.len(),
            "tracking phase finished"
        );
        Ok(TrackingReport {
            labeled,
            survivors,
            centroids,
            components,
            trajectories,
            x,
            y,
            z,
            frame_shape,
        })
    }

    /// Trajectory length used for clustering.
    pub fn required_length(&self, report: &TrackingReport) -> TrackingResult<usize> {
        let length = self.config.required_length.unwrap_or(report.num_frames());
        if length <= self.config.ar_order {
            return Err(TrackingError::invalid_parameter(
                "required_length",
                format!(
                    "trajectories of {length} frames are too short for AR order {}",
                    self.config.ar_order
                ),
            ));
        }
        Ok(length)
    }

    /// Stage 5: keeps the fixed-length trajectories and checks that there are
    /// enough of them for the requested number of clusters.
    pub fn condition(&self, report: &TrackingReport) -> TrackingResult<ConditionedTrajectories> {
        let length = self.required_length(report)?;
        let conditioned = condition(&report.x, &report.y, &report.z, length, report.trajectories.len())?;
        if self.config.num_clusters > conditioned.num_objects() {
            return Err(TrackingError::invalid_parameter(
                "num_clusters",
                format!(
                    "cannot form {} clusters from {} full-length trajectories",
                    self.config.num_clusters,
                    conditioned.num_objects()
                ),
            ));
        }
        Ok(conditioned)
    }

    /// Stage 7: spectral clustering on the configured similarity matrix.
    pub fn assign_clusters(
        &self,
        conditioned: ConditionedTrajectories,
        dynamics: DynamicsReport,
    ) -> TrackingResult<ClusterReport> {
        let affinity = match self.config.affinity {
            AffinityKind::Martin => dynamics.distances.martin_similarity.clone(),
            AffinityKind::Laplacian => dynamics.distances.laplacian_similarity.clone(),
        };
        let labels = spectral_clustering(&affinity, self.config.num_clusters, self.config.seed)?;
        let (point_cloud, point_labels) = cluster_point_cloud(&conditioned, &labels)?;

        let warnings = dynamics.distances.warnings.clone();
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "clustering finished with numerical warnings");
        }
        Ok(ClusterReport {
            conditioned,
            dynamics,
            affinity_kind: self.config.affinity,
            affinity,
            labels,
            point_cloud,
            point_labels,
            warnings,
        })
    }

    /// Groups the tracked trajectories by dynamical similarity.
    pub fn cluster(&self, report: &TrackingReport) -> TrackingResult<ClusterReport> {
        let conditioned = self.condition(report)?;

        // Stage 6: Dynamics and distances
        let dynamics = compute_affinity(&conditioned, self.config.state_dim, self.config.ar_order)?;

        self.assign_clusters(conditioned, dynamics)
    }

    /// Writes the labels and the affinity matrix to the configured paths.
    pub fn persist(&self, clusters: &ClusterReport) -> TrackingResult<()> {
        persist_clusters(
            &clusters.labels,
            &clusters.affinity,
            &self.config.labels_path(),
            &self.config.affinity_path(),
        )
    }

    /// Tracks and clusters in one call. Nothing is written to disk: call
    /// `persist` on the result, or use `run_and_persist`.
    pub fn run(&self, frames: &[Volume]) -> TrackingResult<PipelineOutput> {
        let tracking = self.track(frames)?;
        let clusters = self.cluster(&tracking)?;
        Ok(PipelineOutput { tracking, clusters })
    }

    /// `run` followed by `persist`.
    pub fn run_and_persist(&self, frames: &[Volume]) -> TrackingResult<PipelineOutput> {
        let output = self.run(frames)?;
        self.persist(&output.clusters)?;
        info!(output = %self.config.output_dir.display(), "cluster artifacts written");
        Ok(output)
    }
}
