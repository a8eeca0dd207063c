//! Rigid and similarity transforms
//!
//! Poses coming from the device are rigid (rotation + translation). Scene nodes
//! additionally carry a scale, so the scene graph and the manipulation solver
//! work with [`Transform`] (translation, rotation, per-axis scale).
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::f32::consts::PI;

use nalgebra::{Isometry3, Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Lengths below this are treated as zero when normalising
const NORMALIZE_EPSILON: f32 = 1e-8;

/// Pose of a trackable space at one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Rigid transform from the trackable space into the reference space
    pub transform: Isometry3<f32>,

    /// Set when the runtime estimated the position instead of tracking it
    pub emulated_position: bool,
}

impl Pose {
    pub fn new(position: Vector3<f32>, orientation: UnitQuaternion<f32>) -> Self {
        Self {
            transform: Isometry3::from_parts(Translation3::from(position), orientation),
            emulated_position: false,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }

    pub fn position(&self) -> Vector3<f32> {
        self.transform.translation.vector
    }

    pub fn orientation(&self) -> UnitQuaternion<f32> {
        self.transform.rotation
    }

    /// Column-major 4x4 matrix, applied verbatim as a node's local matrix
    pub fn to_matrix(&self) -> Matrix4<f32> {
        self.transform.to_homogeneous()
    }
}

/// Translation, rotation and scale of a scene node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::repeat(1.0),
        }
    }

    pub fn from_position(position: Vector3<f32>) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    pub fn from_parts(
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        scale: Vector3<f32>,
    ) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Compose as `T * R * S`
    pub fn to_matrix(&self) -> Matrix4<f32> {
        let mut m = self.rotation.to_homogeneous();
        for col in 0..3 {
            for row in 0..3 {
                m[(row, col)] *= self.scale[col];
            }
        }
        m[(0, 3)] = self.position.x;
        m[(1, 3)] = self.position.y;
        m[(2, 3)] = self.position.z;
        m
    }

    /// Decompose an affine matrix into translation, rotation and scale.
    ///
    /// A negative determinant is folded into the x scale, mirroring how most
    /// scene graphs decompose reflected matrices.
    pub fn from_matrix(m: &Matrix4<f32>) -> Self {
        let position = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
        let basis: Matrix3<f32> = m.fixed_view::<3, 3>(0, 0).into_owned();

        let mut scale = Vector3::new(
            basis.column(0).norm(),
            basis.column(1).norm(),
            basis.column(2).norm(),
        );
        if basis.determinant() < 0.0 {
            scale.x = -scale.x;
        }

        let mut rotation_basis = basis;
        for col in 0..3 {
            if scale[col].abs() > NORMALIZE_EPSILON {
                let inv = 1.0 / scale[col];
                for row in 0..3 {
                    rotation_basis[(row, col)] *= inv;
                }
            }
        }
        let rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_basis));

        Self {
            position,
            rotation,
            scale,
        }
    }
}

impl From<Pose> for Transform {
    fn from(pose: Pose) -> Self {
        Transform {
            position: pose.position(),
            rotation: pose.orientation(),
            scale: Vector3::repeat(1.0),
        }
    }
}

/// Shortest-arc rotation taking unit vector `from` onto unit vector `to`.
///
/// Opposite vectors have no unique shortest arc; any half turn about an axis
/// perpendicular to `from` is returned.
pub fn shortest_arc(from: &Vector3<f32>, to: &Vector3<f32>) -> UnitQuaternion<f32> {
    if let Some(rotation) = UnitQuaternion::rotation_between(from, to) {
        return rotation;
    }
    let fallback = if from.x.abs() > from.z.abs() {
        Vector3::new(-from.y, from.x, 0.0)
    } else {
        Vector3::new(0.0, -from.z, from.y)
    };
    match nalgebra::Unit::try_new(fallback, NORMALIZE_EPSILON) {
        Some(axis) => UnitQuaternion::from_axis_angle(&axis, PI),
        None => UnitQuaternion::identity(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_matrix_roundtrip_preserves_parts() {
        let t = Transform::from_parts(
            Vector3::new(1.0, -2.0, 3.5),
            UnitQuaternion::from_euler_angles(0.3, -0.7, 1.1),
            Vector3::new(2.0, 2.0, 2.0),
        );
        let back = Transform::from_matrix(&t.to_matrix());

        assert_relative_eq!(back.position, t.position, epsilon = 1e-5);
        assert_relative_eq!(back.scale, t.scale, epsilon = 1e-5);
        assert!(back.rotation.angle_to(&t.rotation) < 1e-4);
    }

    #[test]
    fn test_pose_matrix_is_rigid() {
        let pose = Pose::new(
            Vector3::new(0.0, 1.6, -1.0),
            UnitQuaternion::from_euler_angles(0.0, 1.0, 0.0),
        );
        let decomposed = Transform::from_matrix(&pose.to_matrix());

        assert_relative_eq!(decomposed.scale, Vector3::new(1.0, 1.0, 1.0), epsilon = 1e-5);
        assert_relative_eq!(decomposed.position, pose.position(), epsilon = 1e-6);
    }

    #[test]
    fn test_shortest_arc_maps_vectors() {
        let from = Vector3::x();
        let to = Vector3::new(0.0, 1.0, 1.0).normalize();
        let rotation = shortest_arc(&from, &to);

        assert_relative_eq!(rotation * from, to, epsilon = 1e-5);
    }

    #[test]
    fn test_shortest_arc_handles_opposite_vectors() {
        let from = Vector3::z();
        let rotation = shortest_arc(&from, &(-from));

        assert_relative_eq!(rotation * from, -from, epsilon = 1e-5);
    }
}
