// THEORY:
// A `Component` is a single connected region of foreground voxels inside one
// frame. Like a snapshot it has no memory of the past: linking components over
// time is the tracker's job. This module holds the plain data containers shared
// by the detection stages (labeler, noise filter, centroid extractor) and the
// tracker.

use ndarray::Array3;

/// Input volume for a single frame, indexed `(z, x, y)`. Non-zero voxels are
/// foreground; their value is the weight used for the centre of mass.
pub type Volume = Array3<f32>;

/// Per-frame label volume. `0` is background, `1..=N` are component ids.
pub type LabelVolume = Array3<u32>;

/// Centre of mass of a component in voxel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub z: f64,
    pub x: f64,
    pub y: f64,
}

impl Centroid {
    pub fn new(z: f64, x: f64, y: f64) -> Self {
        Self { z, x, y }
    }

    /// Plain Euclidean distance in voxel units.
    pub fn distance(&self, other: &Centroid) -> f64 {
        ((self.z - other.z).powi(2) + (self.x - other.x).powi(2) + (self.y - other.y).powi(2))
            .sqrt()
    }

    /// Coordinates in `(z, x, y)` order, the layout used by the display layer.
    pub fn to_zxy(&self) -> [f64; 3] {
        [self.z, self.x, self.y]
    }
}

/// Summary of one surviving component of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Frame index `t`.
    pub frame: usize,
    /// Label id within that frame. Not stable across frames.
    pub label: u32,
    /// Number of voxels carrying this label.
    pub volume: usize,
    pub centroid: Centroid,
}

/// Returns the spatial shape shared by every frame, or a `ShapeMismatch` error
/// naming the first frame that differs.
pub(crate) fn common_shape<A>(
    frames: &[Array3<A>],
    context: &'static str,
) -> crate::error::TrackingResult<Option<[usize; 3]>> {
    let mut shape: Option<[usize; 3]> = None;
    for frame in frames {
        let dim = frame.dim();
        let current = [dim.0, dim.1, dim.2];
        match shape {
            None => shape = Some(current),
            Some(expected) if expected != current => {
                return Err(crate::error::TrackingError::shape_mismatch(
                    context, &expected, &current,
                ));
            }
            Some(_) => {}
        }
    }
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Centroid::new(0.0, 0.0, 0.0);
        let b = Centroid::new(2.0, 3.0, 6.0);
        assert_eq!(a.distance(&b), 7.0);
        assert_eq!(b.distance(&a), 7.0);
    }

    #[test]
    fn mismatched_frames_are_reported() {
        let frames = vec![Volume::zeros((2, 3, 4)), Volume::zeros((2, 3, 5))];
        let err = common_shape(&frames, "test").unwrap_err();
        assert!(err.to_string().contains("[2, 3, 5]"));
    }

    #[test]
    fn empty_sequence_has_no_shape() {
        let frames: Vec<Volume> = Vec::new();
        assert_eq!(common_shape(&frames, "test").unwrap(), None);
    }
}
