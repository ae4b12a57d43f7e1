//! Rigid-body geometry primitives shared by every tagfuse crate.
//!
//! All quantities are `f64`.  Frames follow the `a_to_b` naming convention:
//! a [`Transform3D`] named `robot_to_camera` is the pose of the camera
//! expressed in the robot frame, so a point in camera coordinates is mapped
//! into robot coordinates by [`Transform3D::apply`].
//!
//! # Example
//!
//! ```rust
//! use tagfuse_types::geometry::{Quaternion, Transform3D, Vec3};
//!
//! let world_to_robot = Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::from_yaw(0.0));
//! let robot_to_camera = Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity());
//!
//! let world_to_camera = world_to_robot.compose(robot_to_camera);
//! assert!((world_to_camera.translation.x - 1.5).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector (metres).
///
/// Serialised as a `[x, y, z]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Linear interpolation: `t = 0` yields `self`, `t = 1` yields `other`.
    pub fn lerp(self, other: Self, t: f64) -> Self {
        self.add(other.sub(self).scale(t))
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Vec3> for [f64; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
///
/// Serialised as a `[w, x, y, z]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion; see [`Quaternion::normalized`].
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle_rad` around the unit `axis`.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f64) -> Self {
        let n = axis.norm();
        if n == 0.0 {
            return Self::identity();
        }
        let (s, c) = (angle_rad * 0.5).sin_cos();
        let a = axis.scale(1.0 / n);
        Self::new(c, a.x * s, a.y * s, a.z * s)
    }

    /// Rotation of `yaw_rad` around +Z.
    pub fn from_yaw(yaw_rad: f64) -> Self {
        Self::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), yaw_rad)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit-length copy.  A zero quaternion maps to the identity.
    pub fn normalized(self) -> Self {
        let n = self.norm();
        if n == 0.0 || !n.is_finite() {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Spherical linear interpolation along the shortest arc.
    pub fn slerp(self, other: Self, t: f64) -> Self {
        let mut other = other;
        let mut cos = self.dot(other);
        if cos < 0.0 {
            other = Self::new(-other.w, -other.x, -other.y, -other.z);
            cos = -cos;
        }
        // Nearly parallel: fall back to normalised lerp.
        if cos > 0.9995 {
            return Self::new(
                self.w + (other.w - self.w) * t,
                self.x + (other.x - self.x) * t,
                self.y + (other.y - self.y) * t,
                self.z + (other.z - self.z) * t,
            )
            .normalized();
        }
        let theta = cos.clamp(-1.0, 1.0).acos();
        let sin = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin;
        let b = (t * theta).sin() / sin;
        Self::new(
            a * self.w + b * other.w,
            a * self.x + b * other.x,
            a * self.y + b * other.y,
            a * self.z + b * other.z,
        )
        .normalized()
    }

    /// Rotation angle (radians, in `[0, π]`) between `self` and `other`.
    pub fn angle_to(self, other: Self) -> f64 {
        let d = self.dot(other).abs().clamp(0.0, 1.0);
        2.0 * d.acos()
    }

    /// Heading around +Z, in `(-π, π]`.
    pub fn yaw(self) -> f64 {
        let siny = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny.atan2(cosy)
    }

    pub fn is_finite(self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 4]> for Quaternion {
    fn from(q: [f64; 4]) -> Self {
        Self::new(q[0], q[1], q[2], q[3]).normalized()
    }
}

impl From<Quaternion> for [f64; 4] {
    fn from(q: Quaternion) -> Self {
        [q.w, q.x, q.y, q.z]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Planar pose helper: `(x, y)` on the floor, heading `yaw_rad`.
    pub fn from_planar(x: f64, y: f64, yaw_rad: f64) -> Self {
        Self::new(Vec3::new(x, y, 0.0), Quaternion::from_yaw(yaw_rad))
    }

    /// Compose two transforms.  If `self` = T_A_B and `other` = T_B_C, the
    /// result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation).normalized();
        Self::new(translated, rotated)
    }

    /// T_B_A from T_A_B.
    pub fn inverse(self) -> Self {
        let inv_rot = self.rotation.conjugate();
        Self::new(inv_rot.rotate(self.translation).scale(-1.0), inv_rot)
    }

    /// Map a point expressed in frame B into frame A.
    pub fn apply(self, p: Vec3) -> Vec3 {
        self.translation.add(self.rotation.rotate(p))
    }

    /// Blend towards `other`: translation is lerped, rotation slerped.
    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self::new(
            self.translation.lerp(other.translation, t),
            self.rotation.slerp(other.rotation, t),
        )
    }

    pub fn is_finite(self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite()
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2, PI};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < 1e-9, "x should be ~0, got {}", r.x);
        assert!(close(r.y, 1.0), "y should be ~1, got {}", r.y);
        assert!(r.z.abs() < 1e-9);
    }

    #[test]
    fn from_yaw_matches_yaw_accessor() {
        for yaw in [-3.0, -1.0, 0.0, 0.5, FRAC_PI_2, 3.0] {
            assert!(close(Quaternion::from_yaw(yaw).yaw(), yaw), "yaw {yaw}");
        }
    }

    #[test]
    fn compose_with_inverse_is_identity() {
        let t = Transform3D::new(
            Vec3::new(1.0, -2.0, 0.3),
            Quaternion::from_axis_angle(Vec3::new(0.2, 1.0, 0.5), 0.7),
        );
        let id = t.compose(t.inverse());
        assert!(id.translation.norm() < 1e-9);
        assert!(id.rotation.angle_to(Quaternion::identity()) < 1e-6);
    }

    #[test]
    fn compose_respects_rotation() {
        // Robot at origin facing +Y; camera 1 m ahead of the robot.
        let world_to_robot = Transform3D::from_planar(0.0, 0.0, FRAC_PI_2);
        let robot_to_camera = Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity());
        let t = world_to_robot.compose(robot_to_camera);
        assert!(t.translation.x.abs() < 1e-9);
        assert!(close(t.translation.y, 1.0));
    }

    #[test]
    fn slerp_halfway_between_yaws() {
        let a = Quaternion::from_yaw(0.0);
        let b = Quaternion::from_yaw(FRAC_PI_2);
        assert!(close(a.slerp(b, 0.5).yaw(), FRAC_PI_2 / 2.0));
        assert!(close(a.slerp(b, 0.0).yaw(), 0.0));
        assert!(close(a.slerp(b, 1.0).yaw(), FRAC_PI_2));
    }

    #[test]
    fn slerp_takes_shortest_arc() {
        let a = Quaternion::from_yaw(PI - 0.1);
        let b = Quaternion::from_yaw(-PI + 0.1);
        let mid = a.slerp(b, 0.5);
        assert!(close(mid.yaw().abs(), PI), "got {}", mid.yaw());
    }

    #[test]
    fn angle_to_is_symmetric() {
        let a = Quaternion::from_yaw(0.2);
        let b = Quaternion::from_yaw(-0.3);
        assert!(close(a.angle_to(b), 0.5));
        assert!(close(b.angle_to(a), 0.5));
    }

    #[test]
    fn zero_quaternion_normalises_to_identity() {
        let q = Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized();
        assert_eq!(q, Quaternion::identity());
    }

    #[test]
    fn transform_deserialises_from_arrays() {
        let json = r#"{"translation":[0.3,0.0,0.5],"rotation":[2.0,0.0,0.0,0.0]}"#;
        let t: Transform3D = serde_json::from_str(json).unwrap();
        assert!(close(t.translation.x, 0.3));
        // Rotation is normalised on the way in.
        assert_eq!(t.rotation, Quaternion::identity());
    }

    #[test]
    fn non_finite_transform_detected() {
        let t = Transform3D::new(Vec3::new(f64::NAN, 0.0, 0.0), Quaternion::identity());
        assert!(!t.is_finite());
        assert!(Transform3D::identity().is_finite());
    }
}
