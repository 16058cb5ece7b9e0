use nalgebra::{Rotation3, UnitQuaternion};
use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, Result};

use crate::mesh::{Matrix3, Matrix4};

/// Gates deciding whether the face is close enough to the capture
/// pose. Defaults suit a handheld front camera at arm's length.
#[derive(Clone, StructOpt)]
pub struct PoseTolerances {
    #[structopt(
        help = "Max head rotation from straight ahead, in degrees",
        long,
        default_value = "5.0"
    )]
    pub facing_tolerance_deg: f32,

    #[structopt(
        help = "Max vertical face offset from the frame center, in meters",
        long,
        default_value = "0.02"
    )]
    pub center_x_tolerance: f32,

    #[structopt(
        help = "Max horizontal face offset from the frame center, in meters",
        long,
        default_value = "0.05"
    )]
    pub center_y_tolerance: f32,

    #[structopt(
        help = "Horizontal offset of the ideal face position, in meters",
        long,
        default_value = "0.04"
    )]
    pub center_y_offset: f32,
}

impl Default for PoseTolerances {
    fn default() -> Self {
        PoseTolerances {
            facing_tolerance_deg: 5.0,
            center_x_tolerance: 0.02,
            center_y_tolerance: 0.05,
            center_y_offset: 0.04,
        }
    }
}

fn relative_transform(
    face_transform: &Matrix4,
    camera_transform: &Matrix4,
) -> Result<Matrix4> {
    let inverse = camera_transform.try_inverse().ok_or_else(|| {
        Error::new(
            InconsistentState,
            "camera transform is not invertible".to_string(),
        )
    })?;
    Ok(inverse * face_transform)
}

/// Distance from the camera to the face along the camera's view axis,
/// in centimeters.
pub fn face_distance_cm(
    face_transform: &Matrix4,
    camera_transform: &Matrix4,
) -> Result<f32> {
    let relative = relative_transform(face_transform, camera_transform)?;
    Ok(-relative[(2, 3)] * 100.0)
}

/// Whether the head is rotated less than the tolerance away from
/// looking straight into the camera, on all three axes.
pub fn is_facing_straight(
    face_transform: &Matrix4,
    camera_transform: &Matrix4,
    tolerances: &PoseTolerances,
) -> Result<bool> {
    let relative = relative_transform(face_transform, camera_transform)?;
    let rotation: Matrix3 = relative.fixed_slice::<3, 3>(0, 0).into_owned();
    let quat = UnitQuaternion::from_rotation_matrix(
        &Rotation3::from_matrix_unchecked(rotation),
    );
    let (pitch, yaw, roll) = euler_angles(&quat);

    let yaw_deg = yaw.to_degrees();
    // In portrait the camera frame is rolled a quarter turn relative
    // to the face.
    let roll_deg = roll.to_degrees() - 90.0;
    let pitch_deg = pitch.to_degrees();

    let tolerance = tolerances.facing_tolerance_deg;
    Ok(yaw_deg.abs() < tolerance
        && roll_deg.abs() < tolerance
        && pitch_deg.abs() < tolerance)
}

/// Whether the face sits close enough to the frame center. In portrait
/// the camera's x axis runs vertically on screen, so the x tolerance
/// gates vertical drift and the y tolerance horizontal drift.
pub fn is_face_centered(
    face_transform: &Matrix4,
    camera_transform: &Matrix4,
    tolerances: &PoseTolerances,
) -> Result<bool> {
    let relative = relative_transform(face_transform, camera_transform)?;
    let face_x = relative[(1, 3)];
    let face_y = relative[(0, 3)] - tolerances.center_y_offset;
    Ok(face_x.abs() < tolerances.center_x_tolerance
        && face_y.abs() < tolerances.center_y_tolerance)
}

/// Tait-Bryan angles (pitch, yaw, roll) in radians. The yaw sine is
/// clamped so a slightly denormalized quaternion cannot produce NaN.
fn euler_angles(quat: &UnitQuaternion<f32>) -> (f32, f32, f32) {
    let (w, x, y, z) = (quat.w, quat.i, quat.j, quat.k);
    let ysqr = y * y;

    let t0 = 2.0 * (w * x + y * z);
    let t1 = 1.0 - 2.0 * (x * x + ysqr);
    let pitch = t0.atan2(t1);

    let t2 = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0);
    let yaw = t2.asin();

    let t4 = 2.0 * (w * z + x * y);
    let t5 = 1.0 - 2.0 * (ysqr + z * z);
    let roll = t4.atan2(t5);

    (pitch, yaw, roll)
}
