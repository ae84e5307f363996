// THEORY:
// AR fitting needs a rectangular, gap-free data matrix. The conditioner keeps
// only the trajectories whose length equals the required length exactly and
// packs them into three `(objects × frames)` coordinate arrays.

use crate::error::{TrackingError, TrackingResult};
use ndarray::{Array2, Axis};
use tracing::{info, warn};

/// Fixed-length trajectories as parallel coordinate arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedTrajectories {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub z: Array2<f64>,
    /// Index of each kept row in the unconditioned trajectory list.
    pub source_indices: Vec<usize>,
}

impl ConditionedTrajectories {
    pub fn num_objects(&self) -> usize {
        self.x.nrows()
    }

    pub fn num_frames(&self) -> usize {
        self.x.ncols()
    }

    /// Pools every trajectory into one `(3 × objects·frames)` matrix with rows
    /// `x, y, z`. Column `i·frames + t` holds object `i` at step `t`.
    pub fn pooled(&self) -> Array2<f64> {
        let (n, t) = (self.num_objects(), self.num_frames());
        let mut pool = Array2::zeros((3, n * t));
        for (row, coords) in [&self.x, &self.y, &self.z].into_iter().enumerate() {
            for (i, trajectory) in coords.axis_iter(Axis(0)).enumerate() {
                for (step, &value) in trajectory.iter().enumerate() {
                    pool[[row, i * t + step]] = value;
                }
            }
        }
        pool
    }
}

/// Keeps the trajectories among the first `expected_count` whose length is
/// exactly `required_length`.
pub fn condition(
    x: &[Vec<f64>],
    y: &[Vec<f64>],
    z: &[Vec<f64>],
    required_length: usize,
    expected_count: usize,
) -> TrackingResult<ConditionedTrajectories> {
    if x.len() != y.len() || x.len() != z.len() {
        return Err(TrackingError::shape_mismatch(
            "condition",
            &[x.len(), x.len(), x.len()],
            &[x.len(), y.len(), z.len()],
        ));
    }
    if required_length == 0 {
        return Err(TrackingError::invalid_parameter("required_length", "must be > 0"));
    }
    let considered = if expected_count > x.len() {
        warn!(
            expected_count,
            available = x.len(),
            "fewer trajectories than expected, conditioning all of them"
        );
        x.len()
    } else {
        expected_count
    };

    let source_indices: Vec<usize> = (0..considered)
        .filter(|&i| x[i].len() == required_length && y[i].len() == required_length && z[i].len() == required_length)
        .collect();

    let pack = |coords: &[Vec<f64>]| {
        Array2::from_shape_fn((source_indices.len(), required_length), |(r, c)| {
            coords[source_indices[r]][c]
        })
    };
    let conditioned = ConditionedTrajectories {
        x: pack(x),
        y: pack(y),
        z: pack(z),
        source_indices,
    };

    info!(
        kept = conditioned.num_objects(),
        considered,
        length = required_length,
        "conditioned trajectories for clustering"
    );
    Ok(conditioned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_full_length_trajectories() {
        let x = vec![vec![1.0, 2.0, 3.0], vec![1.0], vec![4.0, 5.0, 6.0]];
        let y = vec![vec![0.0; 3], vec![0.0], vec![1.0; 3]];
        let z = vec![vec![0.0; 3], vec![0.0], vec![2.0; 3]];
        let c = condition(&x, &y, &z, 3, 3).unwrap();
        assert_eq!(c.num_objects(), 2);
        assert_eq!(c.source_indices, vec![0, 2]);
        assert_eq!(c.x.row(1).to_vec(), vec![4.0, 5.0, 6.0]);
        assert_eq!(c.z.row(1).to_vec(), vec![2.0; 3]);
    }

    #[test]
    fn expected_count_limits_the_scan() {
        let x = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let c = condition(&x, &x, &x, 2, 1).unwrap();
        assert_eq!(c.source_indices, vec![0]);
    }

    #[test]
    fn nothing_matches_gives_empty_set() {
        let x = vec![vec![1.0]];
        let c = condition(&x, &x, &x, 4, 1).unwrap();
        assert_eq!(c.num_objects(), 0);
        assert_eq!(c.num_frames(), 4);
    }

    #[test]
    fn pooled_layout_is_object_major() {
        let x = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let y = vec![vec![5.0, 6.0], vec![7.0, 8.0]];
        let z = vec![vec![9.0, 10.0], vec![11.0, 12.0]];
        let pool = condition(&x, &y, &z, 2, 2).unwrap().pooled();
        assert_eq!(pool.dim(), (3, 4));
        assert_eq!(pool.row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(pool.row(2).to_vec(), vec![9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn ragged_inputs_are_rejected() {
        let x = vec![vec![1.0]];
        let y: Vec<Vec<f64>> = vec![];
        assert!(condition(&x, &y, &x, 1, 1).is_err());
    }
}
