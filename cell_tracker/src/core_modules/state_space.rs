// THEORY:
// Each trajectory is modelled as a linear dynamical system. Two steps get it
// there:
// 1.  **State-Space Projection**: All trajectories are pooled into one
//     `(N × M)` matrix and decomposed `Y = U·S·Vt`. Keeping the top `q`
//     singular triplets gives `Y ≈ C·X` with a shared projection `C = U[:, :q]`
//     and reduced states `X = S_q·Vt_q`.
// 2.  **Autoregressive Fit**: Each trajectory's slice of `X` is regressed on its
//     own `order` previous states. Stacking the lagged states into a block
//     regressor `W` turns this into one least-squares problem
//     `X[:, order..] = A·W`, solved with the pseudo-inverse. `A` is then split
//     into `order` square transition matrices.

use crate::error::{TrackingError, TrackingResult};
use nalgebra::DMatrix;
use ndarray::Array2;
use std::cmp::Ordering;
use tracing::debug;

/// Relative singular-value cutoff for the pseudo-inverse.
const PINV_RCOND: f64 = 1e-15;

/// Result of the shared state-space projection.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpace {
    /// Reduced states, `q × M`.
    pub states: DMatrix<f64>,
    /// Projection back to data space, `N × q`.
    pub projection: DMatrix<f64>,
}

impl StateSpace {
    pub fn state_dim(&self) -> usize {
        self.projection.ncols()
    }

    /// Reduced-state slice of object `index` when every object has `frames`
    /// consecutive columns.
    pub fn trajectory_states(&self, index: usize, frames: usize) -> DMatrix<f64> {
        self.states.columns(index * frames, frames).into_owned()
    }
}

/// An AR model: `order` transition matrices of size `q × q`, indexed by lag.
#[derive(Debug, Clone, PartialEq)]
pub struct ArModel {
    matrices: Vec<DMatrix<f64>>,
}

impl ArModel {
    /// Builds a model from explicit transition matrices (lag 1 first).
    pub fn from_matrices(matrices: Vec<DMatrix<f64>>) -> TrackingResult<Self> {
        let Some(first) = matrices.first() else {
            return Err(TrackingError::invalid_parameter("order", "an AR model needs at least one matrix"));
        };
        let q = first.nrows();
        if matrices.iter().any(|m| m.nrows() != q || m.ncols() != q) {
            return Err(TrackingError::invalid_parameter(
                "matrices",
                format!("every transition matrix must be {q}x{q}"),
            ));
        }
        Ok(Self { matrices })
    }

    pub fn order(&self) -> usize {
        self.matrices.len()
    }

    pub fn state_dim(&self) -> usize {
        self.matrices[0].nrows()
    }

    pub fn matrices(&self) -> &[DMatrix<f64>] {
        &self.matrices
    }

    /// Transition matrix for lag `index + 1`.
    pub fn lag(&self, index: usize) -> &DMatrix<f64> {
        &self.matrices[index]
    }

    /// All coefficients concatenated lag by lag, each matrix row-major.
    pub fn flatten(&self) -> Vec<f64> {
        self.matrices
            .iter()
            .flat_map(|m| m.transpose().as_slice().to_vec())
            .collect()
    }
}

fn to_dmatrix(array: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = array.dim();
    DMatrix::from_fn(rows, cols, |i, j| array[[i, j]])
}

/// Projects `raw_data` (`N × M`, one row per feature) onto its top `q`
/// principal directions.
pub fn state_space(raw_data: &Array2<f64>, q: usize) -> TrackingResult<StateSpace> {
    if q == 0 {
        return Err(TrackingError::invalid_parameter(
            "q",
            "restricted to positive integer values",
        ));
    }
    let (n, m) = raw_data.dim();
    if q > n.min(m) {
        return Err(TrackingError::invalid_parameter(
            "q",
            format!("cannot keep {q} components of a {n}x{m} matrix"),
        ));
    }

    let svd = to_dmatrix(raw_data).svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return Err(TrackingError::Linalg("state-space SVD".to_string()));
    };

    // Largest singular values first.
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| {
        svd.singular_values[b]
            .partial_cmp(&svd.singular_values[a])
            .unwrap_or(Ordering::Equal)
    });

    let mut projection = DMatrix::zeros(n, q);
    let mut states = DMatrix::zeros(q, m);
    for (k, &source) in order.iter().take(q).enumerate() {
        projection.set_column(k, &u.column(source));
        states.set_row(k, &(v_t.row(source) * svd.singular_values[source]));
    }
    debug!(q, rows = n, cols = m, "state-space projection");

    Ok(StateSpace { states, projection })
}

/// Moore-Penrose pseudo-inverse with a cutoff relative to the largest
/// singular value.
pub(crate) fn pinv(matrix: &DMatrix<f64>) -> TrackingResult<DMatrix<f64>> {
    if matrix.is_empty() {
        return Ok(DMatrix::zeros(matrix.ncols(), matrix.nrows()));
    }
    let svd = matrix.clone().svd(true, true);
    let largest = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    let cutoff = (largest * PINV_RCOND).max(f64::MIN_POSITIVE);
    svd.pseudo_inverse(cutoff)
        .map_err(|e| TrackingError::Linalg(format!("pseudo-inverse: {e}")))
}

/// Fits an AR model of the given order to a `q × T` state sequence.
pub fn train(states: &DMatrix<f64>, order: usize) -> TrackingResult<ArModel> {
    if order == 0 {
        return Err(TrackingError::invalid_parameter(
            "order",
            "restricted to positive integer values",
        ));
    }
    let (q, t) = states.shape();
    if t <= order {
        return Err(TrackingError::invalid_parameter(
            "order",
            format!("a sequence of {t} states cannot fit {order} lags"),
        ));
    }

    // --- Block regressor: row block i-1 holds the states lagged by i ---
    let samples = t - order;
    let mut regressor = DMatrix::zeros(q * order, samples);
    for lag in 1..=order {
        regressor
            .view_mut(((lag - 1) * q, 0), (q, samples))
            .copy_from(&states.columns(order - lag, samples));
    }
    let target = states.columns(order, samples).into_owned();

    let coefficients = target * pinv(&regressor)?;

    let matrices = (0..order)
        .map(|i| coefficients.columns(i * q, q).into_owned())
        .collect();
    ArModel::from_matrices(matrices)
}
