//! Turns camera-relative marker detections into world-frame robot poses.
//!
//! For a detection of tag `i` by a camera mounted at `robot_to_camera`:
//!
//! ```text
//! world_to_robot = world_to_tag(i) ∘ camera_to_tag⁻¹ ∘ robot_to_camera⁻¹
//! ```
//!
//! The layout is always passed in by reference; this module holds no
//! marker state of its own.

use tagfuse_types::{MarkerLayout, Timestamp, Transform3D, VisionObservation};
use tracing::debug;

/// Smallest rotational sigma assigned to a single-tag measurement (radians).
const MIN_ROTATION_SIGMA: f64 = 0.02;

/// One absolute robot-pose measurement derived from one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseMeasurement {
    pub timestamp: Timestamp,
    pub tag_id: u32,
    pub camera: String,
    pub world_to_robot: Transform3D,
    pub translation_sigma: f64,
    pub rotation_sigma: f64,
}

/// Interpret every detection of `observation` whose tag is in `layout`.
///
/// Detections of unknown tags are skipped.  Measurement noise grows with the
/// camera-to-tag distance.
pub fn robot_pose_measurements(
    observation: &VisionObservation,
    layout: &MarkerLayout,
) -> Vec<PoseMeasurement> {
    let camera_to_robot = observation.robot_to_camera.inverse();
    observation
        .detections
        .iter()
        .filter_map(|det| {
            let Some(world_to_tag) = layout.pose_of(det.tag_id) else {
                debug!(tag_id = det.tag_id, camera = %observation.camera, "tag not in layout; skipped");
                return None;
            };
            let world_to_robot = world_to_tag
                .compose(det.camera_to_tag.inverse())
                .compose(camera_to_robot);
            let distance = det.camera_to_tag.translation.norm().max(1.0);
            Some(PoseMeasurement {
                timestamp: observation.timestamp,
                tag_id: det.tag_id,
                camera: observation.camera.clone(),
                world_to_robot,
                translation_sigma: det.std_dev * distance,
                rotation_sigma: (det.std_dev / distance).max(MIN_ROTATION_SIGMA),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagfuse_types::{Quaternion, TagDetection, Vec3};

    fn observation(robot_to_camera: Transform3D, detections: Vec<TagDetection>) -> VisionObservation {
        VisionObservation {
            timestamp: Timestamp(1_000),
            camera: "front".to_string(),
            robot_to_camera,
            detections,
        }
    }

    fn detection(tag_id: u32, camera_to_tag: Transform3D) -> TagDetection {
        TagDetection {
            tag_id,
            camera_to_tag,
            std_dev: 0.05,
        }
    }

    #[test]
    fn camera_offset_is_removed() {
        // Tag 1 sits 2 m ahead of the world origin; the camera is 0.5 m ahead
        // of the robot, so it sees the tag 1.5 m away.
        let layout = MarkerLayout::new().with_marker(1, Transform3D::from_planar(2.0, 0.0, 0.0));
        let obs = observation(
            Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity()),
            vec![detection(1, Transform3D::new(Vec3::new(1.5, 0.0, 0.0), Quaternion::identity()))],
        );

        let m = robot_pose_measurements(&obs, &layout);
        assert_eq!(m.len(), 1);
        assert!(m[0].world_to_robot.translation.norm() < 1e-9);
        assert_eq!(m[0].camera, "front");
        assert_eq!(m[0].timestamp, Timestamp(1_000));
    }

    #[test]
    fn rotated_robot_is_recovered() {
        // Robot at (1, 1) facing +Y; tag 2 m further along +Y, facing the
        // same direction as the robot.
        let robot = Transform3D::from_planar(1.0, 1.0, std::f64::consts::FRAC_PI_2);
        let tag = Transform3D::from_planar(1.0, 3.0, std::f64::consts::FRAC_PI_2);
        let layout = MarkerLayout::new().with_marker(4, tag);
        let camera_to_tag = robot.inverse().compose(tag);
        let obs = observation(Transform3D::identity(), vec![detection(4, camera_to_tag)]);

        let m = robot_pose_measurements(&obs, &layout);
        let p = m[0].world_to_robot;
        assert!((p.translation.x - 1.0).abs() < 1e-9);
        assert!((p.translation.y - 1.0).abs() < 1e-9);
        assert!(p.rotation.angle_to(robot.rotation) < 1e-6);
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let layout = MarkerLayout::new().with_marker(1, Transform3D::identity());
        let obs = observation(
            Transform3D::identity(),
            vec![
                detection(99, Transform3D::from_planar(1.0, 0.0, 0.0)),
                detection(1, Transform3D::from_planar(1.0, 0.0, 0.0)),
            ],
        );
        let m = robot_pose_measurements(&obs, &layout);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].tag_id, 1);
    }

    #[test]
    fn noise_grows_with_distance() {
        let layout = MarkerLayout::new()
            .with_marker(1, Transform3D::identity())
            .with_marker(2, Transform3D::identity());
        let obs = observation(
            Transform3D::identity(),
            vec![
                detection(1, Transform3D::from_planar(1.0, 0.0, 0.0)),
                detection(2, Transform3D::from_planar(4.0, 0.0, 0.0)),
            ],
        );
        let m = robot_pose_measurements(&obs, &layout);
        assert!(m[1].translation_sigma > m[0].translation_sigma);
        assert!((m[1].translation_sigma - 0.2).abs() < 1e-9);
    }
}
