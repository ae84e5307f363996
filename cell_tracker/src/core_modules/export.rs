//! Display-ready views of tracking and clustering results, plus `.npy`
//! persistence of the clustering artifacts.

use crate::core_modules::component::Centroid;
use crate::core_modules::conditioner::ConditionedTrajectories;
use crate::core_modules::tracker::Trajectory;
use crate::error::{TrackingError, TrackingResult};
use ndarray::{Array1, Array2, Array3};
use ndarray_npy::write_npy;
use std::path::Path;
use tracing::info;

/// One `(z, x, y)` row per trajectory point, trajectories in order.
pub fn point_cloud(trajectories: &[Trajectory]) -> Array2<f64> {
    let rows: Vec<[f64; 3]> = trajectories
        .iter()
        .flat_map(|t| t.points.iter().map(|p| p.centroid.to_zxy()))
        .collect();
    Array2::from_shape_fn((rows.len(), 3), |(i, j)| rows[i][j])
}

/// Point cloud of the conditioned trajectories with the cluster id of every
/// point.
pub fn cluster_point_cloud(
    conditioned: &ConditionedTrajectories,
    labels: &[usize],
) -> TrackingResult<(Array2<f64>, Vec<usize>)> {
    let (n, t) = (conditioned.num_objects(), conditioned.num_frames());
    if labels.len() != n {
        return Err(TrackingError::shape_mismatch("cluster_point_cloud", &[n], &[labels.len()]));
    }
    let cloud = Array2::from_shape_fn((n * t, 3), |(row, col)| {
        let (i, step) = (row / t, row % t);
        match col {
            0 => conditioned.z[[i, step]],
            1 => conditioned.x[[i, step]],
            _ => conditioned.y[[i, step]],
        }
    });
    let ids = labels.iter().flat_map(|&l| std::iter::repeat(l).take(t)).collect();
    Ok((cloud, ids))
}

/// Per-frame `u8` volumes marking every rounded centroid with 1. Centroids
/// that round outside `shape` are skipped.
pub fn centre_marker_volumes(centroids: &[Vec<Centroid>], shape: [usize; 3]) -> Vec<Array3<u8>> {
    let to_index = |v: f64, bound: usize| -> Option<usize> {
        let r = v.round();
        (r >= 0.0 && (r as usize) < bound).then_some(r as usize)
    };
    centroids
        .iter()
        .map(|frame| {
            let mut markers = Array3::zeros((shape[0], shape[1], shape[2]));
            for c in frame {
                if let (Some(z), Some(x), Some(y)) =
                    (to_index(c.z, shape[0]), to_index(c.x, shape[1]), to_index(c.y, shape[2]))
                {
                    markers[[z, x, y]] = 1;
                }
            }
            markers
        })
        .collect()
}

fn ensure_parent(path: &Path) -> TrackingResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| TrackingError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Writes the cluster labels (`int64`) and the affinity matrix used
/// (`float64`) as two `.npy` files.
pub fn persist_clusters(
    labels: &[usize],
    affinity: &Array2<f64>,
    labels_path: &Path,
    affinity_path: &Path,
) -> TrackingResult<()> {
    let labels: Array1<i64> = labels.iter().map(|&l| l as i64).collect();
    ensure_parent(labels_path)?;
    write_npy(labels_path, &labels).map_err(|source| TrackingError::Npy {
        path: labels_path.to_path_buf(),
        source,
    })?;
    ensure_parent(affinity_path)?;
    write_npy(affinity_path, affinity).map_err(|source| TrackingError::Npy {
        path: affinity_path.to_path_buf(),
        source,
    })?;
    info!(labels = ?labels_path, affinity = ?affinity_path, "saved clustering artifacts");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::conditioner::condition;
    use crate::core_modules::tracker::track;
    use ndarray::array;
    use ndarray_npy::read_npy;

    #[test]
    fn point_cloud_lists_every_point_in_zxy_order() {
        let frames = vec![vec![Centroid::new(1.0, 2.0, 3.0)], vec![Centroid::new(1.0, 2.5, 3.0)]];
        let trajectories = track(&frames, 20.0, None).unwrap();
        let cloud = point_cloud(&trajectories);
        assert_eq!(cloud, array![[1.0, 2.0, 3.0], [1.0, 2.5, 3.0]]);
    }

    #[test]
    fn cluster_ids_repeat_per_point() {
        let x = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let y = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let z = vec![vec![5.0, 5.0], vec![6.0, 6.0]];
        let conditioned = condition(&x, &y, &z, 2, 2).unwrap();
        let (cloud, ids) = cluster_point_cloud(&conditioned, &[1, 0]).unwrap();
        assert_eq!(ids, vec![1, 1, 0, 0]);
        assert_eq!(cloud.row(2).to_vec(), vec![6.0, 3.0, 1.0]);
        assert!(cluster_point_cloud(&conditioned, &[0]).is_err());
    }

    #[test]
    fn markers_sit_at_rounded_centroids() {
        let centroids = vec![vec![Centroid::new(0.2, 1.6, 2.4), Centroid::new(0.0, 9.0, 0.0)], vec![]];
        let markers = centre_marker_volumes(&centroids, [1, 3, 3]);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0][[0, 2, 2]], 1);
        assert_eq!(markers[0].iter().filter(|&&v| v == 1).count(), 1);
        assert!(markers[1].iter().all(|&v| v == 0));
    }

    #[test]
    fn artifacts_round_trip_through_npy() {
        let dir = tempfile::tempdir().unwrap();
        let labels_path = dir.path().join("nested").join("labels.npy");
        let affinity_path = dir.path().join("affinity.npy");
        let affinity = array![[1.0, 0.5], [0.5, 1.0]];
        persist_clusters(&[0, 1], &affinity, &labels_path, &affinity_path).unwrap();

        let labels: Array1<i64> = read_npy(&labels_path).unwrap();
        assert_eq!(labels.to_vec(), vec![0, 1]);
        let stored: Array2<f64> = read_npy(&affinity_path).unwrap();
        assert_eq!(stored, affinity);
    }
}
