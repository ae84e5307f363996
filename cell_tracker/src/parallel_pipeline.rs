// THEORY:
// The pairwise Martin matrix is the only quadratic stage of the engine, and its
// rows are independent once the AR models are fitted. This module spreads
// those rows across a pool of blocking workers.
//
// Key architectural principles:
// 1.  **Round-Robin Dispatch**: Row `i` goes to worker `i % workers`, so every
//     worker gets a similar share of the matrix.
// 2.  **Shared, Read-Only Inputs**: Workers receive the fitted models and the
//     projection behind an `Arc`; nothing is mutated while they run.
// 3.  **Identical Results**: Rows are computed by the same `martin_row` used by
//     the sequential engine and reassembled in row order, so the matrix and
//     its warnings match the sequential output exactly.

use crate::core_modules::affinity::{fit_models, finalize_distances, martin_row, DynamicsReport};
use crate::core_modules::component::Volume;
use crate::core_modules::conditioner::ConditionedTrajectories;
use crate::core_modules::state_space::ArModel;
use crate::error::{NumericalWarning, TrackingError, TrackingResult};
use crate::pipeline::{ClusterReport, PipelineOutput, TrackingPipeline, TrackingReport};
use futures::future::join_all;
use nalgebra::DMatrix;
use ndarray::Array2;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

type RowResult = (usize, Vec<f64>, Vec<NumericalWarning>);

/// Computes Martin distance matrices on a pool of blocking workers.
#[derive(Debug, Clone, Copy)]
pub struct ParallelDistanceEngine {
    workers: usize,
}

impl Default for ParallelDistanceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelDistanceEngine {
    /// One worker per logical CPU.
    pub fn new() -> Self {
        Self {
            workers: num_cpus::get().max(1),
        }
    }

    pub fn with_workers(workers: usize) -> TrackingResult<Self> {
        if workers == 0 {
            return Err(TrackingError::invalid_parameter("workers", "must be > 0"));
        }
        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Unsymmetrized Martin matrix, identical to the sequential computation.
    pub async fn raw_distance_matrix(
        &self,
        models: Arc<Vec<ArModel>>,
        projection: Arc<DMatrix<f64>>,
    ) -> TrackingResult<(Array2<f64>, Vec<NumericalWarning>)> {
        let n = models.len();
        let pool = self.workers.min(n.max(1));

        let handles: Vec<JoinHandle<Vec<RowResult>>> = (0..pool)
            .map(|worker| {
                let models = Arc::clone(&models);
                let projection = Arc::clone(&projection);
                tokio::task::spawn_blocking(move || {
                    (worker..n)
                        .step_by(pool)
                        .map(|row| {
                            let (values, warnings) = martin_row(&models, &projection, row);
                            (row, values, warnings)
                        })
                        .collect::<Vec<RowResult>>()
                })
            })
            .collect();
        debug!(workers = pool, rows = n, "dispatched Martin rows");

        let mut rows: Vec<RowResult> = Vec::with_capacity(n);
        for joined in join_all(handles).await {
            rows.extend(joined?);
        }
        rows.sort_by_key(|(row, _, _)| *row);

        let mut matrix = Array2::zeros((n, n));
        let mut warnings = Vec::new();
        for (row, values, row_warnings) in rows {
            for (col, value) in values.into_iter().enumerate() {
                matrix[[row, col]] = value;
            }
            warnings.extend(row_warnings);
        }
        Ok((matrix, warnings))
    }

    /// Parallel counterpart of `affinity::compute_affinity`.
    pub async fn compute_affinity(
        &self,
        conditioned: &ConditionedTrajectories,
        q: usize,
        order: usize,
    ) -> TrackingResult<DynamicsReport> {
        let (state_space, models) = fit_models(conditioned, q, order)?;
        let models = Arc::new(models);
        let projection = Arc::new(state_space.projection.clone());

        let (raw, warnings) = self.raw_distance_matrix(Arc::clone(&models), projection).await?;
        let distances = finalize_distances(&raw, warnings);
        info!(objects = models.len(), workers = self.workers, "parallel distance matrix ready");

        let models = Arc::try_unwrap(models).unwrap_or_else(|shared| shared.as_ref().clone());
        Ok(DynamicsReport {
            state_space,
            models,
            distances,
        })
    }

    /// Clustering phase of `pipeline` with the distance matrix computed in
    /// parallel.
    pub async fn cluster(&self, pipeline: &TrackingPipeline, report: &TrackingReport) -> TrackingResult<ClusterReport> {
        let conditioned = pipeline.condition(report)?;
        let config = pipeline.config();
        let dynamics = self
            .compute_affinity(&conditioned, config.state_dim, config.ar_order)
            .await?;
        pipeline.assign_clusters(conditioned, dynamics)
    }
}

/// Runs the whole pipeline on a blocking worker, off the calling task.
///
/// # Panics
///
/// Panics when called outside a Tokio runtime.
pub fn run_in_background(
    pipeline: TrackingPipeline,
    frames: Vec<Volume>,
) -> JoinHandle<TrackingResult<PipelineOutput>> {
    tokio::task::spawn_blocking(move || pipeline.run(&frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::core_modules::affinity::compute_affinity;
    use crate::core_modules::conditioner::condition;

    fn trajectories() -> ConditionedTrajectories {
        let frames = 14;
        let wave = |speed: f64, phase: f64| -> Vec<f64> {
            (0..frames).map(|t| (t as f64 * speed + phase).sin() * 2.0).collect()
        };
        let x: Vec<Vec<f64>> = (0..5).map(|i| wave(0.4 + 0.3 * i as f64, 0.1 * i as f64)).collect();
        let y: Vec<Vec<f64>> = (0..5).map(|i| wave(0.9 - 0.1 * i as f64, 1.0)).collect();
        let z: Vec<Vec<f64>> = (0..5).map(|i| wave(0.2, 0.5 * i as f64)).collect();
        condition(&x, &y, &z, frames, 5).unwrap()
    }

    #[test]
    fn zero_workers_are_rejected() {
        assert!(ParallelDistanceEngine::with_workers(0).is_err());
        assert!(ParallelDistanceEngine::new().workers() >= 1);
    }

    #[test]
    #[should_panic]
    fn background_run_needs_a_runtime() {
        let pipeline = TrackingPipeline::new(PipelineConfig::default()).unwrap();
        let _ = run_in_background(pipeline, Vec::new());
    }

    #[tokio::test]
    async fn parallel_matrix_matches_sequential() {
        let conditioned = trajectories();
        let sequential = compute_affinity(&conditioned, 2, 3).unwrap();
        let engine = ParallelDistanceEngine::with_workers(3).unwrap();
        let parallel = engine.compute_affinity(&conditioned, 2, 3).await.unwrap();

        assert_eq!(parallel.distances, sequential.distances);
        assert_eq!(parallel.models, sequential.models);
    }

    #[tokio::test]
    async fn background_run_reports_through_the_handle() {
        let frames: Vec<Volume> = (0..8)
            .map(|t| {
                let mut v = Volume::zeros((1, 12, 12));
                v[[0, t, 1]] = 1.0;
                v[[0, t, 2]] = 1.0;
                v[[0, t + 2, 9]] = 1.0;
                v[[0, t + 2, 10]] = 1.0;
                v
            })
            .collect();
        let cfg = PipelineConfig { ar_order: 2, num_clusters: 1, ..Default::default() };
        let pipeline = TrackingPipeline::new(cfg).unwrap();

        let output = run_in_background(pipeline, frames).await.unwrap().unwrap();
        assert_eq!(output.tracking.trajectories.len(), 2);
        assert_eq!(output.clusters.labels, vec![0, 0]);
        assert_eq!(output.clusters.point_labels.len(), 16);
    }
}
