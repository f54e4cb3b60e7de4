//! Head-pose estimation from landmark geometry.
//!
//! Best-effort angle scoring for capture-angle diversity, not calibrated pose
//! estimation. Yaw and pitch are ratios scaled by a fixed factor; roll is the
//! eye-line slope.

use serde::{Deserialize, Serialize};

use crate::landmarks::Landmarks;

/// Degrees per unit of normalized nose displacement.
const ANGLE_SCALE: f32 = 30.0;
pub const DEFAULT_DIVERSITY_THRESHOLD: f32 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceAngle {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl FaceAngle {
    /// Euclidean distance in (yaw, pitch, roll) space.
    pub fn distance(&self, other: &FaceAngle) -> f32 {
        ((self.yaw - other.yaw).powi(2)
            + (self.pitch - other.pitch).powi(2)
            + (self.roll - other.roll).powi(2))
        .sqrt()
    }
}

pub fn calculate_face_angle(landmarks: &Landmarks) -> FaceAngle {
    let nose = landmarks.nose_tip();
    let left_eye = landmarks.left_eye_center();
    let right_eye = landmarks.right_eye_center();
    let mouth = landmarks.mouth_center();

    let eye_distance = right_eye.x - left_eye.x;
    let nose_to_left = nose.x - left_eye.x;
    let nose_to_right = right_eye.x - nose.x;
    let yaw = ratio(nose_to_right - nose_to_left, eye_distance) * ANGLE_SCALE;

    let eye_mid_y = (left_eye.y + right_eye.y) / 2.0;
    let face_height = mouth.y - eye_mid_y;
    let nose_tilt = nose.y - eye_mid_y;
    let pitch = ratio(nose_tilt, face_height) * ANGLE_SCALE;

    let roll = (right_eye.y - left_eye.y)
        .atan2(right_eye.x - left_eye.x)
        .to_degrees();

    FaceAngle {
        yaw: round1(yaw),
        pitch: round1(pitch),
        roll: round1(roll),
    }
}

/// True when `candidate` is at least `threshold` degrees away from every
/// previously accepted angle. An empty history always accepts.
pub fn is_angle_different(candidate: &FaceAngle, previous: &[FaceAngle], threshold: f32) -> bool {
    previous.iter().all(|p| candidate.distance(p) >= threshold)
}

// Degenerate landmark sets (coincident eyes) score as frontal.
fn ratio(num: f32, denom: f32) -> f32 {
    if denom.abs() < f32::EPSILON { 0.0 } else { num / denom }
}

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Point;

    fn five(nose: (f32, f32), left: (f32, f32), right: (f32, f32)) -> Landmarks {
        Landmarks::FivePoint([
            Point::new(left.0, left.1),
            Point::new(right.0, right.1),
            Point::new(nose.0, nose.1),
            Point::new(40.0, 100.0),
            Point::new(60.0, 100.0),
        ])
    }

    #[test]
    fn test_frontal_face_is_zero_yaw_and_roll() {
        let a = calculate_face_angle(&five((50.0, 70.0), (30.0, 40.0), (70.0, 40.0)));
        assert_eq!(a.yaw, 0.0);
        assert_eq!(a.roll, 0.0);
        // nose tilt 30 over face height 60 → 0.5 * 30
        assert_eq!(a.pitch, 15.0);
    }

    #[test]
    fn test_nose_shifted_right_gives_negative_yaw() {
        // nose 10px right of centre over 40px eye distance → (10 - 30)/40 * 30
        let a = calculate_face_angle(&five((60.0, 70.0), (30.0, 40.0), (70.0, 40.0)));
        assert_eq!(a.yaw, -15.0);
    }

    #[test]
    fn test_roll_from_eye_slope() {
        let a = calculate_face_angle(&five((50.0, 70.0), (30.0, 40.0), (70.0, 80.0)));
        assert!((a.roll - 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_values_rounded_to_one_decimal() {
        let a = calculate_face_angle(&five((51.0, 70.0), (30.0, 40.0), (73.0, 41.0)));
        for v in [a.yaw, a.pitch, a.roll] {
            assert!(((v * 10.0).round() - v * 10.0).abs() < 1e-3, "{v}");
        }
    }

    #[test]
    fn test_coincident_eyes_do_not_divide_by_zero() {
        let a = calculate_face_angle(&five((50.0, 70.0), (50.0, 40.0), (50.0, 40.0)));
        assert!(a.yaw.is_finite());
        assert_eq!(a.yaw, 0.0);
    }

    #[test]
    fn test_is_angle_different_empty_history() {
        assert!(is_angle_different(&FaceAngle::default(), &[], DEFAULT_DIVERSITY_THRESHOLD));
    }

    #[test]
    fn test_is_angle_different_rejects_near_duplicate() {
        let prev = [FaceAngle { yaw: 10.0, pitch: 0.0, roll: 0.0 }];
        let near = FaceAngle { yaw: 14.0, pitch: 3.0, roll: 0.0 }; // distance 5
        let far = FaceAngle { yaw: 20.0, pitch: 0.0, roll: 0.0 };
        assert!(!is_angle_different(&near, &prev, 7.0));
        assert!(is_angle_different(&far, &prev, 7.0));
    }

    #[test]
    fn test_is_angle_different_checks_every_previous() {
        let prev = [
            FaceAngle { yaw: -20.0, pitch: 0.0, roll: 0.0 },
            FaceAngle { yaw: 0.0, pitch: 0.0, roll: 0.0 },
        ];
        let candidate = FaceAngle { yaw: 2.0, pitch: 0.0, roll: 0.0 };
        assert!(!is_angle_different(&candidate, &prev, 7.0));
    }
}
