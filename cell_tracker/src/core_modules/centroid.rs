// THEORY:
// The centroid extractor condenses every surviving component into a single
// point: its intensity-weighted centre of mass. This is the same aggregation a
// blob detector performs after region growing, applied to 3D label volumes.
// Output order per frame follows the survivor list exactly, so index `i` of a
// frame's centroid list always describes survivor `i` of that frame.

use crate::core_modules::component::{Centroid, Component, LabelVolume, Volume};
use crate::core_modules::noise_filter::{check_alignment, component_volumes};
use crate::error::{TrackingError, TrackingResult};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Default, Clone, Copy)]
struct MassAccumulator {
    weight: f64,
    z: f64,
    x: f64,
    y: f64,
    voxels: usize,
    plain_z: f64,
    plain_x: f64,
    plain_y: f64,
}

impl MassAccumulator {
    fn add(&mut self, z: usize, x: usize, y: usize, value: f64) {
        self.weight += value;
        self.z += z as f64 * value;
        self.x += x as f64 * value;
        self.y += y as f64 * value;
        self.voxels += 1;
        self.plain_z += z as f64;
        self.plain_x += x as f64;
        self.plain_y += y as f64;
    }

    fn centroid(&self) -> Option<Centroid> {
        if self.voxels == 0 {
            return None;
        }
        if self.weight != 0.0 && self.weight.is_finite() {
            Some(Centroid::new(self.z / self.weight, self.x / self.weight, self.y / self.weight))
        } else {
            let n = self.voxels as f64;
            Some(Centroid::new(self.plain_z / n, self.plain_x / n, self.plain_y / n))
        }
    }
}

/// Centre of mass of each requested label in one frame, in the order given.
///
/// Every requested label must occupy at least one voxel of `labels`, otherwise
/// the output could not stay aligned with `wanted`.
pub fn frame_centroids(
    frame: &Volume,
    labels: &LabelVolume,
    wanted: &[u32],
) -> TrackingResult<Vec<Centroid>> {
    let mut accumulators: HashMap<u32, MassAccumulator> =
        wanted.iter().map(|&l| (l, MassAccumulator::default())).collect();

    for ((z, x, y), &label) in labels.indexed_iter() {
        if let Some(acc) = accumulators.get_mut(&label) {
            acc.add(z, x, y, frame[[z, x, y]] as f64);
        }
    }

    wanted
        .iter()
        .map(|&label| {
            let acc = accumulators.get(&label).copied().unwrap_or_default();
            let centroid = acc.centroid().ok_or_else(|| {
                TrackingError::invalid_parameter(
                    "survivors",
                    format!("label {label} has no voxels in its frame"),
                )
            })?;
            if acc.weight == 0.0 {
                warn!(label, "component has zero total weight, using unweighted mean");
            }
            Ok(centroid)
        })
        .collect()
}

/// Per-frame centroid lists aligned index-for-index with `survivors`.
pub fn compute_centroids(
    frames: &[Volume],
    labeled: &[LabelVolume],
    survivors: &[Vec<u32>],
) -> TrackingResult<Vec<Vec<Centroid>>> {
    check_alignment(frames, labeled, "compute_centroids")?;
    if survivors.len() != frames.len() {
        return Err(TrackingError::shape_mismatch(
            "compute_centroids",
            &[frames.len()],
            &[survivors.len()],
        ));
    }

    let centroids = frames
        .iter()
        .zip(labeled)
        .zip(survivors)
        .map(|((frame, labels), wanted)| frame_centroids(frame, labels, wanted))
        .collect::<TrackingResult<Vec<Vec<Centroid>>>>()?;

    info!(
        detections = centroids.iter().map(Vec::len).sum::<usize>(),
        "detected the center of components"
    );
    Ok(centroids)
}

/// Full component summaries (volume and centroid) for every survivor.
pub fn describe_components(
    frames: &[Volume],
    labeled: &[LabelVolume],
    survivors: &[Vec<u32>],
) -> TrackingResult<Vec<Vec<Component>>> {
    let centroids = compute_centroids(frames, labeled, survivors)?;
    Ok(labeled
        .iter()
        .zip(survivors)
        .zip(centroids)
        .enumerate()
        .map(|(t, ((labels, wanted), points))| {
            let volumes = component_volumes(labels);
            wanted
                .iter()
                .zip(points)
                .map(|(&label, centroid)| Component {
                    frame: t,
                    label,
                    volume: volumes.get(&label).copied().unwrap_or(0),
                    centroid,
                })
                .collect()
        })
        .collect())
}
