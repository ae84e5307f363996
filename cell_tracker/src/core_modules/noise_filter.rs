// THEORY:
// Segmentation output is noisy: single stray voxels and tiny fragments get
// their own labels. The noise filter keeps only components whose voxel count is
// strictly greater than a volume threshold. It never drops a frame: a frame with
// no survivors yields an empty list, so every later stage stays index-aligned
// with the frame sequence.

use crate::core_modules::component::{LabelVolume, Volume, common_shape};
use crate::core_modules::labeler::LabeledSequence;
use crate::error::{TrackingError, TrackingResult};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Voxel count per label value, background included, in ascending label order.
pub fn component_volumes(labels: &LabelVolume) -> BTreeMap<u32, usize> {
    let mut volumes = BTreeMap::new();
    for &label in labels.iter() {
        *volumes.entry(label).or_insert(0) += 1;
    }
    volumes
}

/// Surviving label ids of a single label volume, ascending.
pub fn surviving_labels(labels: &LabelVolume, volume_threshold: usize) -> Vec<u32> {
    component_volumes(labels)
        .into_iter()
        .filter(|&(label, count)| label != 0 && count > volume_threshold)
        .map(|(label, _)| label)
        .collect()
}

/// Per-frame list of label ids whose voxel count exceeds `volume_threshold`.
pub fn filter_components(
    frames: &[Volume],
    labeled: &LabeledSequence,
    volume_threshold: usize,
) -> TrackingResult<Vec<Vec<u32>>> {
    if volume_threshold == 0 {
        return Err(TrackingError::invalid_parameter("volume_threshold", "must be >= 1"));
    }
    check_alignment(frames, &labeled.labels, "filter_components")?;

    let survivors: Vec<Vec<u32>> = labeled
        .labels
        .iter()
        .enumerate()
        .map(|(t, labels)| {
            let kept = surviving_labels(labels, volume_threshold);
            debug!(frame = t, kept = kept.len(), "noise filter");
            kept
        })
        .collect();

    info!(
        threshold = volume_threshold,
        survivors = survivors.iter().map(Vec::len).sum::<usize>(),
        "selected components above volume threshold"
    );
    Ok(survivors)
}

/// Zeroes every label that is not in the frame's survivor list. The lists may
/// be in any order.
pub fn retain_survivors(labeled: &LabeledSequence, survivors: &[Vec<u32>]) -> TrackingResult<Vec<LabelVolume>> {
    if labeled.len() != survivors.len() {
        return Err(TrackingError::shape_mismatch(
            "retain_survivors",
            &[labeled.len()],
            &[survivors.len()],
        ));
    }
    Ok(labeled
        .labels
        .iter()
        .zip(survivors)
        .map(|(labels, keep)| {
            let keep: BTreeSet<u32> = keep.iter().copied().collect();
            labels.mapv(|l| if keep.contains(&l) { l } else { 0 })
        })
        .collect())
}

/// Frames and label volumes must pair up one-to-one and share a shape.
pub(crate) fn check_alignment(
    frames: &[Volume],
    labels: &[LabelVolume],
    context: &'static str,
) -> TrackingResult<()> {
    if frames.len() != labels.len() {
        return Err(TrackingError::shape_mismatch(context, &[frames.len()], &[labels.len()]));
    }
    let frame_shape = common_shape(frames, context)?;
    let label_shape = common_shape(labels, context)?;
    if let (Some(expected), Some(actual)) = (frame_shape, label_shape) {
        if expected != actual {
            return Err(TrackingError::shape_mismatch(context, &expected, &actual));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::labeler::label_components;

    fn frame_with_sizes(sizes: &[usize]) -> Volume {
        // One row per component along x, separated by empty rows.
        let mut v = Volume::zeros((1, 8, 6));
        for (i, &size) in sizes.iter().enumerate() {
            for y in 0..size {
                v[[0, i * 2, y]] = 1.0;
            }
        }
        v
    }

    #[test]
    fn keeps_components_strictly_above_threshold() {
        let frames = vec![frame_with_sizes(&[1, 2, 3])];
        let labeled = label_components(&frames).unwrap();
        let survivors = filter_components(&frames, &labeled, 2).unwrap();
        assert_eq!(survivors, vec![vec![3]]);
    }

    #[test]
    fn background_is_never_a_survivor() {
        let frames = vec![frame_with_sizes(&[2])];
        let labeled = label_components(&frames).unwrap();
        let survivors = filter_components(&frames, &labeled, 1).unwrap();
        assert_eq!(survivors, vec![vec![1]]);
    }

    #[test]
    fn empty_frames_are_preserved() {
        let frames = vec![frame_with_sizes(&[4]), Volume::zeros((1, 8, 6)), frame_with_sizes(&[1])];
        let labeled = label_components(&frames).unwrap();
        let survivors = filter_components(&frames, &labeled, 1).unwrap();
        assert_eq!(survivors.len(), 3);
        assert_eq!(survivors[0], vec![1]);
        assert!(survivors[1].is_empty());
        assert!(survivors[2].is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        let frames = vec![frame_with_sizes(&[1, 5, 2, 3]), frame_with_sizes(&[3, 1])];
        let labeled = label_components(&frames).unwrap();
        let first = filter_components(&frames, &labeled, 2).unwrap();

        let cleaned = LabeledSequence::from_label_volumes(retain_survivors(&labeled, &first).unwrap());
        let second = filter_components(&frames, &cleaned, 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unsorted_survivor_lists_keep_every_listed_label() {
        let frames = vec![frame_with_sizes(&[1, 2, 3])];
        let labeled = label_components(&frames).unwrap();
        let cleaned = retain_survivors(&labeled, &[vec![3, 1]]).unwrap();
        let volumes = component_volumes(&cleaned[0]);
        assert_eq!(volumes.get(&1), Some(&1));
        assert_eq!(volumes.get(&2), None);
        assert_eq!(volumes.get(&3), Some(&3));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let frames = vec![frame_with_sizes(&[1])];
        let labeled = label_components(&frames).unwrap();
        assert!(filter_components(&frames, &labeled, 0).is_err());
    }

    #[test]
    fn misaligned_label_volumes_are_rejected() {
        let frames = vec![Volume::zeros((1, 2, 2))];
        let labeled = label_components(&[Volume::zeros((1, 2, 3))]).unwrap();
        assert!(matches!(
            filter_components(&frames, &labeled, 1),
            Err(TrackingError::ShapeMismatch { .. })
        ));
    }
}
