// THEORY:
// The labeler is the first stage of the detection layer. It turns every frame of
// the segmentation provider's output into a label volume in which each maximal
// 26-connected region of non-zero voxels carries its own id.
//
// Key architectural principles:
// 1.  **Full Cube Adjacency**: Two voxels are neighbours when they differ by at
//     most one step along every axis (faces, edges and corners). Cells touching
//     only at a corner are still one component.
// 2.  **Raster-Order Numbering**: Frames are scanned in `(z, x, y)` order. The
//     first unvisited foreground voxel seeds a region, which is grown with an
//     explicit stack until it is exhausted. Ids therefore follow the scan order
//     of each component's first voxel.
// 3.  **Stateless, Per Frame**: Nothing is shared between frames. Label 3 in
//     frame `t` has no relation to label 3 in frame `t + 1`.

use crate::core_modules::component::{LabelVolume, Volume, common_shape};
use crate::error::TrackingResult;
use ndarray::Array3;
use tracing::{debug, info};

/// Label volumes for a whole sequence, plus the per-frame component counts.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSequence {
    pub labels: Vec<LabelVolume>,
    pub counts: Vec<usize>,
    /// Surviving label ids per frame, attached by the noise filter for reuse
    /// by later stages.
    survivors: Option<Vec<Vec<u32>>>,
}

impl LabeledSequence {
    /// Wraps existing label volumes, e.g. after noise removal. Counts are the
    /// number of distinct non-zero labels per volume.
    pub fn from_label_volumes(labels: Vec<LabelVolume>) -> Self {
        let counts = labels
            .iter()
            .map(|volume| {
                let mut ids: Vec<u32> = volume.iter().copied().filter(|&l| l != 0).collect();
                ids.sort_unstable();
                ids.dedup();
                ids.len()
            })
            .collect();
        Self {
            labels,
            counts,
            survivors: None,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn attach_survivors(&mut self, survivors: Vec<Vec<u32>>) {
        self.survivors = Some(survivors);
    }

    pub fn survivors(&self) -> Option<&[Vec<u32>]> {
        self.survivors.as_deref()
    }
}

/// Labels every frame of the sequence using 26-connectivity.
///
/// Fails with `ShapeMismatch` if the frames do not share one spatial shape.
pub fn label_components(frames: &[Volume]) -> TrackingResult<LabeledSequence> {
    common_shape(frames, "label_components")?;

    let mut labels = Vec::with_capacity(frames.len());
    let mut counts = Vec::with_capacity(frames.len());
    for (t, frame) in frames.iter().enumerate() {
        let (labeled, count) = label_volume(frame);
        debug!(frame = t, components = count, "labeled frame");
        labels.push(labeled);
        counts.push(count);
    }
    info!(
        frames = frames.len(),
        components = counts.iter().sum::<usize>(),
        "3D connected component labeling complete"
    );

    Ok(LabeledSequence {
        labels,
        counts,
        survivors: None,
    })
}

/// Labels a single volume. Returns the label volume and the component count.
pub fn label_volume(volume: &Volume) -> (LabelVolume, usize) {
    let (nz, nx, ny) = volume.dim();
    let mut labels: LabelVolume = Array3::zeros((nz, nx, ny));
    let mut next_label = 0u32;
    let mut stack: Vec<(usize, usize, usize)> = Vec::new();

    for ((z, x, y), &value) in volume.indexed_iter() {
        if value == 0.0 || labels[[z, x, y]] != 0 {
            continue;
        }

        next_label += 1;
        labels[[z, x, y]] = next_label;
        stack.push((z, x, y));

        // --- Region growing over the 26-neighbourhood ---
        while let Some((cz, cx, cy)) = stack.pop() {
            for dz in -1i64..=1 {
                for dx in -1i64..=1 {
                    for dy in -1i64..=1 {
                        if dz == 0 && dx == 0 && dy == 0 {
                            continue;
                        }
                        let (Some(pz), Some(px), Some(py)) = (
                            offset(cz, dz, nz),
                            offset(cx, dx, nx),
                            offset(cy, dy, ny),
                        ) else {
                            continue;
                        };
                        if volume[[pz, px, py]] != 0.0 && labels[[pz, px, py]] == 0 {
                            labels[[pz, px, py]] = next_label;
                            stack.push((pz, px, py));
                        }
                    }
                }
            }
        }
    }

    (labels, next_label as usize)
}

fn offset(index: usize, delta: i64, len: usize) -> Option<usize> {
    let moved = index as i64 + delta;
    if moved >= 0 && (moved as usize) < len {
        Some(moved as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};

    fn distinct_nonzero(labels: &LabelVolume) -> BTreeSet<u32> {
        labels.iter().copied().filter(|&l| l != 0).collect()
    }

    #[test]
    fn corner_contact_is_one_component() {
        let mut v = Volume::zeros((3, 3, 3));
        v[[0, 0, 0]] = 1.0;
        v[[1, 1, 1]] = 1.0;
        v[[2, 2, 2]] = 1.0;
        let (labels, count) = label_volume(&v);
        assert_eq!(count, 1);
        assert_eq!(distinct_nonzero(&labels).len(), 1);
    }

    #[test]
    fn separated_voxels_are_distinct_components() {
        let mut v = Volume::zeros((1, 5, 5));
        v[[0, 0, 0]] = 1.0;
        v[[0, 0, 2]] = 1.0;
        v[[0, 4, 4]] = 1.0;
        let (labels, count) = label_volume(&v);
        assert_eq!(count, 3);
        assert_eq!(distinct_nonzero(&labels), BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn labels_follow_raster_order() {
        let mut v = Volume::zeros((2, 4, 4));
        v[[1, 0, 0]] = 1.0;
        v[[0, 3, 3]] = 1.0;
        let (labels, _) = label_volume(&v);
        assert_eq!(labels[[0, 3, 3]], 1);
        assert_eq!(labels[[1, 0, 0]], 2);
    }

    #[test]
    fn prelabeled_input_is_treated_as_foreground() {
        let mut v = Volume::zeros((1, 1, 4));
        v[[0, 0, 0]] = 7.0;
        v[[0, 0, 1]] = 3.0;
        let (_, count) = label_volume(&v);
        assert_eq!(count, 1);
    }

    #[test]
    fn count_matches_distinct_labels_and_components_are_connected() {
        // A pseudo-random sparse volume.
        let mut v = Volume::zeros((6, 7, 8));
        let mut state = 12345u64;
        for value in v.iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            if (state >> 33) % 5 == 0 {
                *value = 1.0;
            }
        }
        let (labels, count) = label_volume(&v);
        assert_eq!(distinct_nonzero(&labels).len(), count);

        // Every labeled voxel is reachable from the first voxel of its label
        // through 26-neighbours of the same label.
        for label in 1..=count as u32 {
            let voxels: HashSet<(usize, usize, usize)> = labels
                .indexed_iter()
                .filter(|(_, l)| **l == label)
                .map(|(idx, _)| idx)
                .collect();
            let start = *voxels.iter().next().unwrap();
            let mut seen = HashSet::from([start]);
            let mut stack = vec![start];
            while let Some((z, x, y)) = stack.pop() {
                for other in &voxels {
                    let near = (other.0 as i64 - z as i64).abs() <= 1
                        && (other.1 as i64 - x as i64).abs() <= 1
                        && (other.2 as i64 - y as i64).abs() <= 1;
                    if near && seen.insert(*other) {
                        stack.push(*other);
                    }
                }
            }
            assert_eq!(seen.len(), voxels.len(), "label {label} is not connected");
        }

        // Background stays background, foreground is always labeled.
        for (idx, &value) in v.indexed_iter() {
            assert_eq!(value != 0.0, labels[idx] != 0);
        }
    }

    #[test]
    fn inconsistent_frames_fail() {
        let frames = vec![Volume::zeros((2, 2, 2)), Volume::zeros((2, 2, 3))];
        assert!(matches!(
            label_components(&frames),
            Err(crate::error::TrackingError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn sequence_reports_counts_per_frame() {
        let mut a = Volume::zeros((2, 4, 4));
        a[[0, 0, 0]] = 1.0;
        a[[1, 3, 3]] = 1.0;
        let b = Volume::zeros((2, 4, 4));
        let seq = label_components(&[a, b]).unwrap();
        assert_eq!(seq.counts, vec![2, 0]);
        assert_eq!(seq.len(), 2);
        assert!(seq.survivors().is_none());
    }
}
