// THEORY:
// This file is the main entry point for the `cell_tracker` library crate.
// It defines the public API exposed to external consumers (such as the
// `track_tester` harness).
//
// The primary export is `TrackingPipeline` together with its configuration
// and report types: a clean, high-level interface that turns a sequence of
// segmented 3D volumes into trajectories and trajectory clusters. The stage
// implementations live in `core_modules` and stay usable on their own for
// callers that need a single step.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::{AffinityKind, PipelineConfig};
pub use core_modules::component::{Centroid, Component, LabelVolume, Volume};
pub use core_modules::tracker::{TrackPoint, Trajectory};
pub use error::{NumericalWarning, TrackingError, TrackingResult};
pub use parallel_pipeline::{run_in_background, ParallelDistanceEngine};
pub use pipeline::{ClusterReport, TrackingPipeline, TrackingReport};
