//! `tagfuse-types` – shared data model for the tagfuse workspace.
//!
//! Everything that crosses a crate boundary lives here: the measurement
//! types produced by odometry and camera sources, the configuration-driven
//! pose prior and marker layout, the published [`PoseEstimate`], the bus
//! [`Event`] envelope and the error taxonomy.

pub mod geometry;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use geometry::{Quaternion, Transform3D, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Time
// ────────────────────────────────────────────────────────────────────────────

/// Monotonic sensor time in microseconds.
///
/// All producers stamp their data on the same robot clock; the scheduler's
/// watermark is expressed in this unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_micros(us: u64) -> Self {
        Self(us)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 * 1e-6
    }

    /// Saturating difference `self - earlier`, in microseconds.
    pub fn micros_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Measurements
// ────────────────────────────────────────────────────────────────────────────

/// Robot-frame relative motion since the previous odometry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdometrySample {
    pub timestamp: Timestamp,
    /// Motion of the robot between the previous sample and this one,
    /// expressed in the robot frame at the previous sample.
    pub delta: Transform3D,
    /// 1σ translational noise of this increment (metres).
    pub translation_sigma: f64,
    /// 1σ rotational noise of this increment (radians).
    pub rotation_sigma: f64,
}

/// A single fiducial marker seen by a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDetection {
    pub tag_id: u32,
    /// Pose of the tag expressed in the camera frame.
    pub camera_to_tag: Transform3D,
    /// 1σ translational noise of the measurement (metres).
    pub std_dev: f64,
}

/// Every marker one camera saw in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionObservation {
    /// Capture time of the frame.
    pub timestamp: Timestamp,
    /// Name of the camera that produced the frame.
    pub camera: String,
    /// Mounting pose of the camera on the robot.
    pub robot_to_camera: Transform3D,
    pub detections: Vec<TagDetection>,
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration-driven inputs
// ────────────────────────────────────────────────────────────────────────────

/// 1σ uncertainty of a pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseUncertainty {
    /// Metres.
    pub translation_sigma: f64,
    /// Radians.
    pub rotation_sigma: f64,
}

impl PoseUncertainty {
    pub fn new(translation_sigma: f64, rotation_sigma: f64) -> Self {
        Self {
            translation_sigma,
            rotation_sigma,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.translation_sigma.is_finite()
            && self.rotation_sigma.is_finite()
            && self.translation_sigma > 0.0
            && self.rotation_sigma > 0.0
    }
}

/// Externally supplied initial/reset pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosePrior {
    pub pose: Transform3D,
    pub uncertainty: PoseUncertainty,
    pub timestamp: Timestamp,
}

/// World pose of one marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    pub id: u32,
    pub pose: Transform3D,
}

/// Known world positions of the visual fiducial markers.
///
/// Serialised as a list of [`MarkerPose`]; duplicate IDs are rejected when
/// deserialising.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<MarkerPose>", into = "Vec<MarkerPose>")]
pub struct MarkerLayout {
    markers: BTreeMap<u32, Transform3D>,
}

impl MarkerLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the world pose of marker `id`.
    pub fn with_marker(mut self, id: u32, world_to_tag: Transform3D) -> Self {
        self.markers.insert(id, world_to_tag);
        self
    }

    /// World pose of marker `id`, if it is part of the layout.
    pub fn pose_of(&self, id: u32) -> Option<Transform3D> {
        self.markers.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Transform3D)> + '_ {
        self.markers.iter().map(|(id, pose)| (*id, *pose))
    }
}

impl TryFrom<Vec<MarkerPose>> for MarkerLayout {
    type Error = String;

    fn try_from(list: Vec<MarkerPose>) -> Result<Self, Self::Error> {
        let mut markers = BTreeMap::new();
        for marker in list {
            if markers.insert(marker.id, marker.pose).is_some() {
                return Err(format!("duplicate marker id {}", marker.id));
            }
        }
        Ok(Self { markers })
    }
}

impl From<MarkerLayout> for Vec<MarkerPose> {
    fn from(layout: MarkerLayout) -> Self {
        layout
            .markers
            .into_iter()
            .map(|(id, pose)| MarkerPose { id, pose })
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

/// Read-only snapshot of the estimator's latest solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Time of the newest factor folded into the solution.
    pub timestamp: Timestamp,
    pub pose: Transform3D,
    pub uncertainty: PoseUncertainty,
    pub odometry_factors: usize,
    pub vision_factors: usize,
    /// Number of successful optimizations since the last reset.
    pub sequence: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// Bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the in-process telemetry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "tagfuse-hal::sim"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Odometry(OdometrySample),
    Vision(VisionObservation),
    PosePrior(PosePrior),
    TagLayout(MarkerLayout),
    /// A flushed batch of key-value telemetry entries.
    TableUpdate(BTreeMap<String, serde_json::Value>),
    Fault {
        component: String,
        code: u32,
        message: String,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Failure reported by a pose estimator's optimize step.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EstimationError {
    #[error("estimator has no initial state")]
    NotInitialized,

    #[error("invalid factor: {reason}")]
    InvalidFactor { reason: String },

    #[error("optimization diverged: {reason}")]
    Diverged { reason: String },
}

/// Global error type spanning estimation, configuration, transport and
/// process-usage failures.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum FusionError {
    #[error("Estimation Failed: {0}")]
    Estimation(#[from] EstimationError),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Usage Error: {0}")]
    Usage(String),
}
