//! Rigid-transform helpers: quaternion/matrix conversion, homogeneous transforms and relative
//! poses.
//!
//! Quaternions are plain `[x, y, z, w]` arrays. Every 4x4 input is assumed to be a rigid
//! transform with an orthonormal rotation block; other inputs give unspecified results.
use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Quaternion in `[x, y, z, w]` order.
pub type QuatXyzw = [f64; 4];

/// Pose of one frame expressed in another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativePose {
    pub position: [f64; 3],
    pub orientation: QuatXyzw,
}

/// Intrinsic yaw-pitch-roll angles in radians, `R = Rz(yaw) Ry(pitch) Rx(roll)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerZyx {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerZyx {
    pub fn from_rotation(r: &na::Matrix3<f64>) -> Self {
        Self {
            yaw: r[(1, 0)].atan2(r[(0, 0)]),
            pitch: (-r[(2, 0)]).atan2(r[(0, 0)].hypot(r[(1, 0)])),
            roll: r[(2, 1)].atan2(r[(2, 2)]),
        }
    }

    /// `(roll, pitch, yaw)` in degrees.
    pub fn to_degrees(self) -> (f64, f64, f64) {
        (
            self.roll.to_degrees(),
            self.pitch.to_degrees(),
            self.yaw.to_degrees(),
        )
    }
}

pub fn quat_to_matrix(q: QuatXyzw) -> na::Matrix3<f64> {
    let [x, y, z, w] = q;
    let (xx, yy, zz) = (x * x, y * y, z * z);
    let (xy, xz, yz) = (x * y, x * z, y * z);
    let (wx, wy, wz) = (w * x, w * y, w * z);

    na::Matrix3::new(
        1.0 - 2.0 * (yy + zz),
        2.0 * (xy - wz),
        2.0 * (xz + wy),
        2.0 * (xy + wz),
        1.0 - 2.0 * (xx + zz),
        2.0 * (yz - wx),
        2.0 * (xz - wy),
        2.0 * (yz + wx),
        1.0 - 2.0 * (xx + yy),
    )
}

/// Rotation matrix to quaternion, branching on the trace and then on the largest diagonal
/// element so the square root argument stays well away from zero.
pub fn matrix_to_quat(m: &na::Matrix3<f64>) -> QuatXyzw {
    let trace = m.trace();
    if trace > 0.0 {
        let s = 0.5 / (trace + 1.0).sqrt();
        [
            (m[(2, 1)] - m[(1, 2)]) * s,
            (m[(0, 2)] - m[(2, 0)]) * s,
            (m[(1, 0)] - m[(0, 1)]) * s,
            0.25 / s,
        ]
    } else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
        let s = 2.0 * (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt();
        [
            0.25 * s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
            (m[(2, 1)] - m[(1, 2)]) / s,
        ]
    } else if m[(1, 1)] > m[(2, 2)] {
        let s = 2.0 * (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt();
        [
            (m[(0, 1)] + m[(1, 0)]) / s,
            0.25 * s,
            (m[(1, 2)] + m[(2, 1)]) / s,
            (m[(0, 2)] - m[(2, 0)]) / s,
        ]
    } else {
        let s = 2.0 * (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt();
        [
            (m[(0, 2)] + m[(2, 0)]) / s,
            (m[(1, 2)] + m[(2, 1)]) / s,
            0.25 * s,
            (m[(1, 0)] - m[(0, 1)]) / s,
        ]
    }
}

/// Homogeneous transform from a position and an `[x, y, z, w]` quaternion.
pub fn to_matrix(position: [f64; 3], orientation: QuatXyzw) -> na::Matrix4<f64> {
    let mut t = na::Matrix4::identity();
    t.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&quat_to_matrix(orientation));
    t.fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&na::Vector3::from(position));
    t
}

pub fn from_matrix(t: &na::Matrix4<f64>) -> ([f64; 3], QuatXyzw) {
    let rotation = t.fixed_view::<3, 3>(0, 0).into_owned();
    (
        [t[(0, 3)], t[(1, 3)], t[(2, 3)]],
        matrix_to_quat(&rotation),
    )
}

/// Inverse of a rigid transform: `[Rᵀ | -Rᵀt]`.
pub fn rigid_inverse(t: &na::Matrix4<f64>) -> na::Matrix4<f64> {
    let rt = t.fixed_view::<3, 3>(0, 0).transpose();
    let trans = -(rt * t.fixed_view::<3, 1>(0, 3));
    let mut inv = na::Matrix4::identity();
    inv.fixed_view_mut::<3, 3>(0, 0).copy_from(&rt);
    inv.fixed_view_mut::<3, 1>(0, 3).copy_from(&trans);
    inv
}

/// `T_A_B = inverse(T_world_A) · T_world_B`, the pose of frame B seen from frame A.
pub fn relative_pose(t_world_a: &na::Matrix4<f64>, t_world_b: &na::Matrix4<f64>) -> RelativePose {
    let (position, orientation) = from_matrix(&(rigid_inverse(t_world_a) * t_world_b));
    RelativePose {
        position,
        orientation,
    }
}

/// Pose of a socket in the tool frame, given both poses in the world frame.
pub fn relative_pose_from_components(
    tcp_position: [f64; 3],
    tcp_orientation: QuatXyzw,
    socket_position: [f64; 3],
    socket_orientation: QuatXyzw,
) -> RelativePose {
    relative_pose(
        &to_matrix(tcp_position, tcp_orientation),
        &to_matrix(socket_position, socket_orientation),
    )
}

/// Axis-angle vector of a rotation matrix.
pub fn rotation_to_rvec(r: &na::Matrix3<f64>) -> na::Vector3<f64> {
    na::Rotation3::from_matrix(r).scaled_axis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_unit_quat(rng: &mut StdRng) -> QuatXyzw {
        let v = na::Vector4::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        )
        .normalize();
        [v.x, v.y, v.z, v.w]
    }

    #[test]
    fn test_quaternion_roundtrip_up_to_sign() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut samples: Vec<QuatXyzw> = (0..200).map(|_| random_unit_quat(&mut rng)).collect();
        // Half-turns exercise every non-trace branch.
        samples.extend([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);

        for q in samples {
            let back = matrix_to_quat(&quat_to_matrix(q));
            let dot: f64 = q.iter().zip(back.iter()).map(|(a, b)| a * b).sum();
            let sign = dot.signum();
            for (a, b) in q.iter().zip(back.iter()) {
                assert_relative_eq!(*a, sign * b, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_matches_nalgebra_rotation() {
        let q = na::UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        let ours = quat_to_matrix([q.i, q.j, q.k, q.w]);
        assert_relative_eq!(ours, q.to_rotation_matrix().into_inner(), epsilon = 1e-12);
    }

    #[test]
    fn test_relative_pose_of_self_is_identity() {
        let t = to_matrix([0.4, -1.2, 2.5], [0.1, 0.7, -0.2, 0.6]);
        let rel = relative_pose(&t, &t);
        for p in rel.position {
            assert_relative_eq!(p, 0.0, epsilon = 1e-12);
        }
        let r = quat_to_matrix(rel.orientation);
        assert_relative_eq!(r, na::Matrix3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn test_relative_pose_from_components() {
        let identity = [0.0, 0.0, 0.0, 1.0];
        let rel = relative_pose_from_components([1.0, 2.0, 3.0], identity, [1.5, 2.0, 2.0], identity);
        assert_relative_eq!(rel.position[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(rel.position[2], -1.0, epsilon = 1e-12);
        assert_relative_eq!(rel.orientation[3].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_euler_zyx_recovers_angles() {
        let (roll, pitch, yaw) = (0.2, -0.4, 1.3);
        let r = na::Rotation3::from_euler_angles(roll, pitch, yaw).into_inner();
        let e = EulerZyx::from_rotation(&r);
        assert_relative_eq!(e.roll, roll, epsilon = 1e-12);
        assert_relative_eq!(e.pitch, pitch, epsilon = 1e-12);
        assert_relative_eq!(e.yaw, yaw, epsilon = 1e-12);
    }
}
