// THEORY:
// Spectral clustering on a precomputed affinity matrix.
// Key architectural principles:
// 1.  **Normalized Embedding**: The affinity is read as a weighted graph
//     (self-loops ignored). The `k` eigenvectors of its symmetric normalized
//     Laplacian with the smallest eigenvalues, rescaled by the inverse square
//     root degrees, embed every trajectory as a point in `k` dimensions.
// 2.  **Deterministic Signs**: Eigenvectors are only defined up to sign, so each
//     one is flipped to make its largest-magnitude entry positive.
// 3.  **Discretization**: Labels come from searching for the rotation that best
//     aligns the embedding with an indicator matrix (Yu & Shi, 2003). The
//     starting rotation is picked with a seeded RNG, so a fixed seed always
//     gives the same labels.

use crate::error::{TrackingError, TrackingResult};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

const MAX_SVD_RESTARTS: usize = 30;
const MAX_ROTATION_ITERATIONS: usize = 20;
const SVD_MAX_SWEEPS: usize = 1000;

/// Spectral embedding of a symmetric affinity matrix, `n × k`.
pub fn spectral_embedding(affinity: &Array2<f64>, k: usize) -> TrackingResult<DMatrix<f64>> {
    let n = affinity.nrows();

    // --- 1. Normalized Laplacian, diagonal ignored ---
    let degree: Vec<f64> = (0..n)
        .map(|j| (0..n).filter(|&i| i != j).map(|i| affinity[[i, j]]).sum::<f64>())
        .collect();
    let dd: Vec<f64> = degree
        .iter()
        .map(|&w| if w == 0.0 { 1.0 } else { w.sqrt() })
        .collect();
    let laplacian = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            if degree[i] == 0.0 { 0.0 } else { 1.0 }
        } else {
            -affinity[[i, j]] / (dd[i] * dd[j])
        }
    });

    // --- 2. Smallest eigenpairs ---
    let eigen = SymmetricEigen::try_new(laplacian, f64::EPSILON, 0)
        .ok_or_else(|| TrackingError::Linalg("Laplacian eigendecomposition".to_string()))?;
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(Ordering::Equal)
    });

    let mut embedding = DMatrix::zeros(n, k);
    for (col, &source) in order.iter().take(k).enumerate() {
        for row in 0..n {
            embedding[(row, col)] = eigen.eigenvectors[(row, source)] / dd[row];
        }
    }

    // --- 3. Sign flip ---
    for mut column in embedding.column_iter_mut() {
        let pivot = column.iamax();
        if column[pivot] < 0.0 {
            column.neg_mut();
        }
    }
    Ok(embedding)
}

fn first_argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

fn first_argmin(values: &[f64]) -> usize {
    let mut best = (0, f64::INFINITY);
    for (i, &v) in values.iter().enumerate() {
        if v < best.1 {
            best = (i, v);
        }
    }
    best.0
}

/// Turns an `n × k` embedding into labels by rotation search.
pub fn discretize(embedding: &DMatrix<f64>, seed: u64) -> TrackingResult<Vec<usize>> {
    let (n, k) = embedding.shape();
    let mut vectors = embedding.clone();

    // Unit-scale columns with a negative first entry, then unit rows.
    let norm_ones = (n as f64).sqrt();
    for mut column in vectors.column_iter_mut() {
        let norm = column.norm();
        if norm > 0.0 {
            column *= norm_ones / norm;
        }
        if column[0] > 0.0 {
            column.neg_mut();
        }
    }
    for mut row in vectors.row_iter_mut() {
        let norm = row.norm().max(f64::EPSILON);
        row /= norm;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut labels = vec![0; n];

    for restart in 0..MAX_SVD_RESTARTS {
        // --- Initial rotation from maximally orthogonal rows ---
        let mut rotation = DMatrix::zeros(k, k);
        rotation.set_column(0, &vectors.row(rng.gen_range(0..n)).transpose());
        let mut c = vec![0.0; n];
        for j in 1..k {
            let projected = &vectors * rotation.column(j - 1);
            for (acc, p) in c.iter_mut().zip(projected.iter()) {
                *acc += p.abs();
            }
            rotation.set_column(j, &vectors.row(first_argmin(&c)).transpose());
        }

        let mut last_objective = 0.0;
        let mut iteration = 0;
        loop {
            iteration += 1;
            let rotated = &vectors * &rotation;
            for (i, label) in labels.iter_mut().enumerate() {
                *label = first_argmax(rotated.row(i).iter().copied());
            }

            // Indicatorᵀ·vectors: row `label` accumulates the rows carrying it.
            let mut t_svd = DMatrix::zeros(k, k);
            for (i, &label) in labels.iter().enumerate() {
                let updated = t_svd.row(label) + vectors.row(i);
                t_svd.set_row(label, &updated);
            }

            let Some(svd) = t_svd.try_svd(true, true, f64::EPSILON, SVD_MAX_SWEEPS) else {
                warn!(restart, "SVD did not converge, randomizing and trying again");
                break;
            };
            let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
                break;
            };

            let ncut = 2.0 * (n as f64 - svd.singular_values.sum());
            if (ncut - last_objective).abs() < f64::EPSILON || iteration > MAX_ROTATION_ITERATIONS {
                debug!(restart, iteration, ncut, "rotation search converged");
                return Ok(labels);
            }
            last_objective = ncut;
            rotation = v_t.transpose() * u.transpose();
        }
    }

    Err(TrackingError::Linalg("SVD did not converge during discretization".to_string()))
}

/// Partitions the `n` items of a precomputed affinity matrix into `k` groups.
pub fn spectral_clustering(affinity: &Array2<f64>, k: usize, seed: u64) -> TrackingResult<Vec<usize>> {
    let (rows, cols) = affinity.dim();
    if rows != cols {
        return Err(TrackingError::shape_mismatch("spectral_clustering", &[rows, rows], &[rows, cols]));
    }
    if k == 0 {
        return Err(TrackingError::invalid_parameter("num_clusters", "must be > 0"));
    }
    if k > rows {
        return Err(TrackingError::invalid_parameter(
            "num_clusters",
            format!("cannot form {k} clusters from {rows} trajectories"),
        ));
    }
    if affinity.iter().any(|v| !v.is_finite()) {
        return Err(TrackingError::invalid_parameter("affinity", "contains non-finite entries"));
    }

    let embedding = spectral_embedding(affinity, k)?;
    let labels = discretize(&embedding, seed)?;
    info!(items = rows, clusters = k, "assigned cluster labels");
    Ok(labels)
}
