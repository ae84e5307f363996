// THEORY:
// The Martin distance compares two AR systems through the principal angles
// between their observability subspaces.
// Key architectural principles:
// 1.  **Companion Form**: An order-`d` model over `q` states is lifted to a
//     first-order system of size `q·d`. The joint system is block diagonal,
//     one companion block per model.
// 2.  **Block-wise Lyapunov Solve**: Because the joint transition matrix is
//     block diagonal, the discrete Lyapunov equation `X = A X Aᵀ + Q` splits
//     into three independent Stein equations (`P11`, `P12`, `P22`). Each one is
//     a dense linear system of size `(q·d)²` instead of `(2·q·d)²`.
// 3.  **Subspace Angles**: The eigenvalues of `inv(P11)·P12·inv(P22)·P12ᵀ`,
//     normalized by their maximum, are the squared cosines of the subspace
//     angles. The distance is `-ln` of their product.

use crate::core_modules::state_space::ArModel;
use crate::error::{TrackingError, TrackingResult};
use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// A Martin distance together with any eigenvalues that had to be discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MartinOutcome {
    pub distance: f64,
    /// Number of non-positive normalized eigenvalues removed before taking the
    /// logarithm. Non-zero means the value is an approximation.
    pub dropped_eigenvalues: usize,
}

/// Solves the Stein equation `X = F·X·Gᵀ + Q` for `X`.
///
/// Uses the column-major identity `vec(F·X·Gᵀ) = (G ⊗ F)·vec(X)`.
pub fn solve_stein(f: &DMatrix<f64>, g: &DMatrix<f64>, q: &DMatrix<f64>) -> TrackingResult<DMatrix<f64>> {
    let (m, p) = q.shape();
    if !f.is_square() || !g.is_square() || f.nrows() != m || g.nrows() != p {
        return Err(TrackingError::shape_mismatch(
            "solve_stein",
            &[m, m, p, p],
            &[f.nrows(), f.ncols(), g.nrows(), g.ncols()],
        ));
    }
    let system = DMatrix::<f64>::identity(m * p, m * p) - g.kronecker(f);
    let rhs = DVector::from_column_slice(q.as_slice());
    let solution = system
        .lu()
        .solve(&rhs)
        .ok_or_else(|| TrackingError::Linalg("Stein equation is singular".to_string()))?;
    Ok(DMatrix::from_column_slice(m, p, solution.as_slice()))
}

/// Solves the discrete Lyapunov equation `X = A·X·Aᵀ + Q`.
pub fn solve_discrete_lyapunov(a: &DMatrix<f64>, q: &DMatrix<f64>) -> TrackingResult<DMatrix<f64>> {
    solve_stein(a, a, q)
}

/// First-order companion matrix of an AR model.
pub fn companion(model: &ArModel) -> DMatrix<f64> {
    let q = model.state_dim();
    let d = model.order();
    let mut out = DMatrix::zeros(q * d, q * d);
    for (i, a) in model.matrices().iter().enumerate() {
        out.view_mut((0, i * q), (q, q)).copy_from(a);
    }
    if d > 1 {
        out.view_mut((q, 0), (q * (d - 1), q * (d - 1)))
            .fill_with_identity();
    }
    out
}

/// Repeats `c` `copies` times along the diagonal.
fn block_diagonal(c: &DMatrix<f64>, copies: usize) -> DMatrix<f64> {
    let (n, q) = c.shape();
    let mut out = DMatrix::zeros(n * copies, q * copies);
    for i in 0..copies {
        out.view_mut((i * n, i * q), (n, q)).copy_from(c);
    }
    out
}

fn inverse(matrix: DMatrix<f64>, name: &str) -> TrackingResult<DMatrix<f64>> {
    matrix
        .try_inverse()
        .ok_or_else(|| TrackingError::Linalg(format!("{name} is singular")))
}

/// Martin distance between `(a1, c1)` and `(a2, c2)`.
///
/// Both models must share order and state dimension, and both projections
/// must be `N × q`.
pub fn martin(
    a1: &ArModel,
    c1: &DMatrix<f64>,
    a2: &ArModel,
    c2: &DMatrix<f64>,
) -> TrackingResult<MartinOutcome> {
    let q = a1.state_dim();
    let d = a1.order();
    if a2.state_dim() != q || a2.order() != d {
        return Err(TrackingError::shape_mismatch(
            "martin models",
            &[d, q],
            &[a2.order(), a2.state_dim()],
        ));
    }
    if c1.shape() != c2.shape() || c1.ncols() != q {
        return Err(TrackingError::shape_mismatch(
            "martin projections",
            &[c1.nrows(), q],
            &[c2.nrows(), c2.ncols()],
        ));
    }

    // --- 1. Joint system ---
    let f1 = companion(a1);
    let f2 = companion(a2);
    let c1t = block_diagonal(c1, d);
    let c2t = block_diagonal(c2, d);
    let q11 = c1t.transpose() * &c1t;
    let q12 = c1t.transpose() * &c2t;
    let q22 = c2t.transpose() * &c2t;

    // --- 2. Lyapunov solve, one block at a time ---
    let x11 = solve_discrete_lyapunov(&f1, &q11)?;
    let x12 = solve_stein(&f1, &f2, &q12)?;
    let x22 = solve_discrete_lyapunov(&f2, &q22)?;

    // Roundoff.
    let p11 = (&x11 + x11.transpose()) * 0.5;
    let p22 = (&x22 + x22.transpose()) * 0.5;
    let p12 = x12;

    // --- 3. Subspace angles ---
    let ppp = inverse(p11, "P11")? * &p12 * inverse(p22, "P22")? * p12.transpose();
    let n = ppp.nrows();
    let lower = DMatrix::from_fn(n, n, |i, j| if i >= j { ppp[(i, j)] } else { ppp[(j, i)] });
    let eigenvalues = SymmetricEigen::new(lower).eigenvalues;

    let max = eigenvalues.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() || max <= 0.0 {
        return Err(TrackingError::Linalg(format!(
            "Martin eigenvalues have non-positive maximum {max}"
        )));
    }
    let mut normalized: Vec<f64> = eigenvalues.iter().map(|w| w / max).collect();
    let mut dropped_eigenvalues = 0;
    if normalized.iter().product::<f64>() <= 0.0 {
        let before = normalized.len();
        normalized.retain(|&w| w > 0.0);
        dropped_eigenvalues = before - normalized.len();
    }

    Ok(MartinOutcome {
        distance: -normalized.iter().product::<f64>().ln(),
        dropped_eigenvalues,
    })
}
