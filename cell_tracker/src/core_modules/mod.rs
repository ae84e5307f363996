// Per-frame detection.
pub mod component;
pub mod labeler;
pub mod noise_filter;
pub mod centroid;

// Temporal association.
pub mod assignment;
pub mod tracker;
pub mod conditioner;

// Dynamics and clustering.
pub mod state_space;
pub mod martin;
pub mod affinity;
pub mod spectral;

pub mod export;
