// THEORY:
// The affinity stage turns a conditioned trajectory set into the similarity
// matrices the cluster assigner consumes.
// Key architectural principles:
// 1.  **Shared Projection**: One state-space projection `C` is estimated from
//     the pooled trajectories and reused by every AR model, so all Martin
//     distances are measured in the same coordinates.
// 2.  **Row-Independent Distances**: Each row of the `n × n` Martin matrix
//     depends only on the fitted models. `martin_row` is the unit of work
//     shared by the sequential path here and the parallel engine.
// 3.  **Visible Recovery**: A pair whose Martin solve fails becomes NaN, and
//     every non-finite entry is replaced before the matrix leaves this module.
//     Each replacement is counted in a `NumericalWarning`, never hidden.

use crate::core_modules::conditioner::ConditionedTrajectories;
use crate::core_modules::martin::martin;
use crate::core_modules::state_space::{state_space, train, ArModel, StateSpace};
use crate::error::{NumericalWarning, TrackingResult};
use nalgebra::DMatrix;
use ndarray::Array2;
use tracing::{debug, info, warn};

/// Distance matrix and both derived similarities.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceReport {
    /// Symmetric, zero-diagonal Martin distances.
    pub distance: Array2<f64>,
    /// `exp(-0.5·D/std(D))`.
    pub martin_similarity: Array2<f64>,
    /// Similarity derived from the normalized Laplacian of `distance`.
    pub laplacian_similarity: Array2<f64>,
    pub warnings: Vec<NumericalWarning>,
}

/// Everything the distance engine estimated for one trajectory set.
#[derive(Debug, Clone)]
pub struct DynamicsReport {
    pub state_space: StateSpace,
    /// One AR model per conditioned trajectory, same order.
    pub models: Vec<ArModel>,
    pub distances: DistanceReport,
}

/// Fits the shared projection and one AR model per trajectory.
pub fn fit_models(
    conditioned: &ConditionedTrajectories,
    q: usize,
    order: usize,
) -> TrackingResult<(StateSpace, Vec<ArModel>)> {
    let frames = conditioned.num_frames();
    let projection = state_space(&conditioned.pooled(), q)?;
    let models = (0..conditioned.num_objects())
        .map(|i| train(&projection.trajectory_states(i, frames), order))
        .collect::<TrackingResult<Vec<_>>>()?;
    info!(models = models.len(), q, order, "fitted AR models");
    Ok((projection, models))
}

/// Martin distances from model `row` to every model. Failed pairs are NaN.
pub fn martin_row(
    models: &[ArModel],
    projection: &DMatrix<f64>,
    row: usize,
) -> (Vec<f64>, Vec<NumericalWarning>) {
    let mut warnings = Vec::new();
    let distances = models
        .iter()
        .enumerate()
        .map(|(col, other)| match martin(&models[row], projection, other, projection) {
            Ok(outcome) => {
                if outcome.dropped_eigenvalues > 0 {
                    warnings.push(NumericalWarning::DroppedEigenvalues {
                        pair: (row, col),
                        dropped: outcome.dropped_eigenvalues,
                    });
                }
                outcome.distance
            }
            Err(e) => {
                debug!(row, col, error = %e, "Martin distance failed");
                f64::NAN
            }
        })
        .collect();
    (distances, warnings)
}

/// Unsymmetrized `n × n` Martin matrix computed row by row.
pub fn raw_distance_matrix(
    models: &[ArModel],
    projection: &DMatrix<f64>,
) -> (Array2<f64>, Vec<NumericalWarning>) {
    let n = models.len();
    let mut matrix = Array2::zeros((n, n));
    let mut warnings = Vec::new();
    for row in 0..n {
        let (values, row_warnings) = martin_row(models, projection, row);
        for (col, value) in values.into_iter().enumerate() {
            matrix[[row, col]] = value;
        }
        warnings.extend(row_warnings);
    }
    (matrix, warnings)
}

/// `(M + Mᵀ)/2` with the diagonal forced to zero.
fn symmetrize_zero_diagonal(matrix: &Array2<f64>) -> Array2<f64> {
    let mut out = (matrix + &matrix.t()) * 0.5;
    out.diag_mut().fill(0.0);
    out
}

/// Replaces NaN and infinite entries with `fill`, recording a warning.
pub fn sanitize(matrix: &mut Array2<f64>, fill: f64, name: &'static str, warnings: &mut Vec<NumericalWarning>) {
    let mut count = 0;
    matrix.iter_mut().filter(|v| !v.is_finite()).for_each(|v| {
        *v = fill;
        count += 1;
    });
    if count > 0 {
        warn!(matrix = name, count, fill, "replaced non-finite entries");
        warnings.push(NumericalWarning::NonFiniteEntries { matrix: name, count });
    }
}

fn population_std(matrix: &Array2<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.std(0.0)
}

/// `exp(-0.5·M/std(M))`; the scale falls back to 1 for a constant matrix.
pub fn similarity(matrix: &Array2<f64>) -> Array2<f64> {
    let std = population_std(matrix);
    let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };
    matrix.mapv(|v| (-0.5 * v / scale).exp())
}

/// Symmetric normalized form `D^{-1/2}·M·D^{-1/2}`, with `D` the column sums.
pub fn laplacian(matrix: &Array2<f64>) -> Array2<f64> {
    let inv_sqrt: Vec<f64> = matrix.sum_axis(ndarray::Axis(0)).iter().map(|w| w.powf(-0.5)).collect();
    Array2::from_shape_fn(matrix.dim(), |(i, j)| inv_sqrt[i] * matrix[[i, j]] * inv_sqrt[j])
}

/// Symmetrizes a raw Martin matrix and derives both similarities from it.
pub fn finalize_distances(raw: &Array2<f64>, mut warnings: Vec<NumericalWarning>) -> DistanceReport {
    let mut distance = symmetrize_zero_diagonal(raw);
    let fill = distance
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        .unwrap_or(0.0);
    sanitize(&mut distance, fill, "distance", &mut warnings);

    let mut martin_similarity = similarity(&distance);
    sanitize(&mut martin_similarity, 0.0, "martin similarity", &mut warnings);

    let mut lap = symmetrize_zero_diagonal(&laplacian(&distance));
    sanitize(&mut lap, 0.0, "laplacian", &mut warnings);
    let mut laplacian_similarity = similarity(&lap);
    sanitize(&mut laplacian_similarity, 0.0, "laplacian similarity", &mut warnings);

    DistanceReport {
        distance,
        martin_similarity,
        laplacian_similarity,
        warnings,
    }
}

/// Runs the full distance engine sequentially.
pub fn compute_affinity(
    conditioned: &ConditionedTrajectories,
    q: usize,
    order: usize,
) -> TrackingResult<DynamicsReport> {
    let (state_space, models) = fit_models(conditioned, q, order)?;
    let (raw, warnings) = raw_distance_matrix(&models, &state_space.projection);
    let distances = finalize_distances(&raw, warnings);
    Ok(DynamicsReport {
        state_space,
        models,
        distances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::conditioner::condition;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn wobbling_trajectories() -> ConditionedTrajectories {
        let frames = 16;
        let series = |phase: f64, speed: f64, scale: f64| -> Vec<f64> {
            (0..frames)
                .map(|t| scale * ((t as f64) * speed + phase).sin() + 0.05 * t as f64)
                .collect()
        };
        let x = vec![series(0.0, 0.5, 2.0), series(0.3, 0.5, 2.1), series(0.0, 1.7, 1.0), series(1.0, 1.6, 1.2)];
        let y = vec![series(1.0, 0.5, 1.0), series(1.2, 0.5, 1.0), series(0.5, 1.7, 2.0), series(0.2, 1.6, 2.0)];
        let z = vec![series(0.4, 0.3, 0.5); 4];
        condition(&x, &y, &z, frames, 4).unwrap()
    }

    #[test]
    fn distance_matrix_is_symmetric_with_zero_diagonal() {
        let report = compute_affinity(&wobbling_trajectories(), 2, 2).unwrap();
        let d = &report.distances.distance;
        assert_eq!(d.dim(), (4, 4));
        for i in 0..4 {
            assert_eq!(d[[i, i]], 0.0);
            for j in 0..4 {
                assert_abs_diff_eq!(d[[i, j]], d[[j, i]], epsilon = 1e-12);
                assert!(d[[i, j]].is_finite());
            }
        }
        assert_eq!(report.models.len(), 4);
        assert_eq!(report.state_space.projection.shape(), (3, 2));
    }

    #[test]
    fn similarities_are_finite_and_symmetric() {
        let report = compute_affinity(&wobbling_trajectories(), 2, 2).unwrap();
        for s in [&report.distances.martin_similarity, &report.distances.laplacian_similarity] {
            for i in 0..4 {
                for j in 0..4 {
                    assert!(s[[i, j]].is_finite());
                    assert_abs_diff_eq!(s[[i, j]], s[[j, i]], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn constant_matrix_uses_unit_scale() {
        let s = similarity(&Array2::zeros((2, 2)));
        assert_eq!(s, Array2::from_elem((2, 2), 1.0));
    }

    #[test]
    fn similarity_divides_by_population_std() {
        // Entries 0 and 2: mean 1, population std 1.
        let d = array![[0.0, 2.0], [2.0, 0.0]];
        let s = similarity(&d);
        assert_abs_diff_eq!(s[[0, 1]], (-1.0_f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(s[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn laplacian_scales_by_column_degrees() {
        let m = array![[0.0, 4.0], [4.0, 0.0]];
        let l = laplacian(&m);
        assert_abs_diff_eq!(l[[0, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_entries_are_replaced_and_reported() {
        let raw = array![[0.0, f64::NAN, 1.0], [f64::NAN, 0.0, 3.0], [1.0, 3.0, 0.0]];
        let report = finalize_distances(&raw, Vec::new());
        assert_eq!(report.distance[[0, 1]], 3.0);
        assert!(report.warnings.contains(&NumericalWarning::NonFiniteEntries {
            matrix: "distance",
            count: 2
        }));
        assert!(report.martin_similarity.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn isolated_rows_do_not_poison_the_laplacian() {
        // Row 2 has zero degree, so its scaling is infinite.
        let raw = array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let report = finalize_distances(&raw, Vec::new());
        assert!(report.laplacian_similarity.iter().all(|v| v.is_finite()));
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, NumericalWarning::NonFiniteEntries { matrix: "laplacian", .. })));
    }
}
