//! `tagfuse-perception` – pose estimation.
//!
//! Turns odometry increments and fiducial-marker sightings into a single
//! fused robot pose.
//!
//! # Modules
//!
//! - [`estimator`] – [`PoseEstimator`][estimator::PoseEstimator]: the opaque
//!   engine contract (reset, add factors, optimize, snapshot) the update
//!   scheduler drives.
//! - [`vision`] – interprets camera-relative detections against a
//!   [`MarkerLayout`][tagfuse_types::MarkerLayout] to produce world-frame
//!   robot pose measurements.
//! - [`localizer`] – [`Localizer`][localizer::Localizer]: the reference
//!   estimator, a sliding-window sequential fusion of odometry and vision.

pub mod estimator;
pub mod localizer;
pub mod vision;

pub use estimator::PoseEstimator;
pub use localizer::{Localizer, LocalizerConfig};
