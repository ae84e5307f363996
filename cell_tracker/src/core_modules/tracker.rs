// THEORY:
// The `tracker` module gives the detection layer a memory. It takes the
// stateless per-frame centroid lists and links them into trajectories, one per
// physical object, solving the frame-to-frame "data association problem."
//
// Key architectural principles:
// 1.  **Object Persistence**: A `Trajectory` is an object's existence *over
//     time*: an ordered list of `(frame, centroid)` points with strictly
//     increasing frame indices. Gaps are allowed.
// 2.  **Optimal Association**: For each frame, a cost matrix of Euclidean
//     distances between every candidate trajectory's last known centroid and
//     every new detection is solved with the Hungarian algorithm, so the total
//     displacement is minimal rather than greedily chosen.
// 3.  **Gating**: A proposed pairing is accepted only if its distance is within
//     the gate threshold. Rejected and unassigned detections are never lost:
//     each one becomes the first point of a new trajectory (birth).
// 4.  **No Eviction by Default**: A trajectory that is not extended simply
//     pauses and stays a candidate forever, compared against its last known
//     position however old. Long gaps can therefore produce long-distance
//     reconnections. `max_gap` optionally retires trajectories that have been
//     unseen for too long.

use crate::core_modules::assignment::hungarian;
use crate::core_modules::component::Centroid;
use crate::error::{TrackingError, TrackingResult};
use ndarray::Array2;
use tracing::{debug, info};

/// A single observation of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub frame: usize,
    pub centroid: Centroid,
}

/// The ordered history of one tracked object.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// Persistent id, assigned in order of birth.
    pub id: u64,
    pub points: Vec<TrackPoint>,
}

impl Trajectory {
    fn new(id: u64, frame: usize, centroid: Centroid) -> Self {
        Self {
            id,
            points: vec![TrackPoint { frame, centroid }],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&TrackPoint> {
        self.points.last()
    }

    /// `(x, y, z)` coordinate sequences in chronological order.
    pub fn coordinates(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let x = self.points.iter().map(|p| p.centroid.x).collect();
        let y = self.points.iter().map(|p| p.centroid.y).collect();
        let z = self.points.iter().map(|p| p.centroid.z).collect();
        (x, y, z)
    }
}

/// What happened to the detections of one frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameAssociation {
    /// `(trajectory index, detection index)` pairs that extended a trajectory.
    pub extended: Vec<(usize, usize)>,
    /// Detection indices that started new trajectories.
    pub born: Vec<usize>,
}

/// Builds trajectories frame by frame. Sole writer of trajectory state.
#[derive(Debug, Clone)]
pub struct Tracker {
    trajectories: Vec<Trajectory>,
    next_id: u64,
    gate_threshold: f64,
    max_gap: Option<usize>,
    last_frame: Option<usize>,
}

impl Tracker {
    pub fn new(gate_threshold: f64, max_gap: Option<usize>) -> TrackingResult<Self> {
        if !(gate_threshold.is_finite() && gate_threshold >= 0.0) {
            return Err(TrackingError::invalid_parameter(
                "gate_threshold",
                format!("must be a finite non-negative distance, got {gate_threshold}"),
            ));
        }
        Ok(Self {
            trajectories: Vec::new(),
            next_id: 0,
            gate_threshold,
            max_gap,
            last_frame: None,
        })
    }

    pub fn trajectories(&self) -> &[Trajectory] {
        &self.trajectories
    }

    fn is_candidate(&self, trajectory: &Trajectory, frame: usize) -> bool {
        match (self.max_gap, trajectory.last()) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(gap), Some(last)) => frame - last.frame <= gap,
        }
    }

    fn birth(&mut self, frame: usize, centroid: Centroid) -> usize {
        self.trajectories.push(Trajectory::new(self.next_id, frame, centroid));
        self.next_id += 1;
        self.trajectories.len() - 1
    }

    /// Associates the detections of `frame` with the current trajectories.
    ///
    /// Frames must be fed in strictly increasing order. An empty detection list
    /// is a normal frame with nothing to associate.
    pub fn update(&mut self, frame: usize, detections: &[Centroid]) -> TrackingResult<FrameAssociation> {
        if let Some(last) = self.last_frame {
            if frame <= last {
                return Err(TrackingError::invalid_parameter(
                    "frame",
                    format!("frames must be strictly increasing, got {frame} after {last}"),
                ));
            }
        }
        self.last_frame = Some(frame);

        let mut association = FrameAssociation::default();
        if detections.is_empty() {
            debug!(frame, "no detections");
            return Ok(association);
        }

        // --- 1. Candidate selection & cost matrix ---
        let candidates: Vec<usize> = (0..self.trajectories.len())
            .filter(|&i| self.is_candidate(&self.trajectories[i], frame))
            .collect();
        let mut claimed = vec![false; detections.len()];

        if !candidates.is_empty() {
            let cost = Array2::from_shape_fn((candidates.len(), detections.len()), |(r, c)| {
                let last = self.trajectories[candidates[r]]
                    .last()
                    .map(|p| p.centroid)
                    .unwrap_or(detections[c]);
                last.distance(&detections[c])
            });

            // --- 2. Assignment & gating ---
            for (r, c) in hungarian(&cost) {
                if cost[[r, c]] <= self.gate_threshold {
                    let index = candidates[r];
                    self.trajectories[index].points.push(TrackPoint {
                        frame,
                        centroid: detections[c],
                    });
                    claimed[c] = true;
                    association.extended.push((index, c));
                }
            }
        }

        // --- 3. Birth ---
        for (c, detection) in detections.iter().enumerate() {
            if !claimed[c] {
                self.birth(frame, *detection);
                association.born.push(c);
            }
        }

        debug!(
            frame,
            extended = association.extended.len(),
            born = association.born.len(),
            "associated frame"
        );
        Ok(association)
    }

    /// Finalizes tracking. Trajectories without points are not emitted.
    pub fn finish(self) -> Vec<Trajectory> {
        self.trajectories.into_iter().filter(|t| !t.is_empty()).collect()
    }
}

/// Runs the tracker over a whole sequence of per-frame detections.
///
/// Frame 0 seeds one trajectory per detection; every later frame is associated
/// in order.
pub fn track(
    detections: &[Vec<Centroid>],
    gate_threshold: f64,
    max_gap: Option<usize>,
) -> TrackingResult<Vec<Trajectory>> {
    let mut tracker = Tracker::new(gate_threshold, max_gap)?;
    for (frame, centroids) in detections.iter().enumerate() {
        tracker.update(frame, centroids)?;
    }
    let trajectories = tracker.finish();
    info!(
        frames = detections.len(),
        trajectories = trajectories.len(),
        "tracking complete"
    );
    Ok(trajectories)
}

/// Splits trajectories into three parallel coordinate lists `(x, y, z)`.
pub fn coordinate_lists(trajectories: &[Trajectory]) -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let mut xs = Vec::with_capacity(trajectories.len());
    let mut ys = Vec::with_capacity(trajectories.len());
    let mut zs = Vec::with_capacity(trajectories.len());
    for trajectory in trajectories {
        let (x, y, z) = trajectory.coordinates();
        xs.push(x);
        ys.push(y);
        zs.push(z);
    }
    (xs, ys, zs)
}
