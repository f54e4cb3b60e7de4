//! Debug overlay for enrollment previews.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::angle::FaceAngle;
use crate::landmarks::Landmarks;
use crate::types::BoundingBox;

const AXIS_LENGTH: f32 = 80.0;
const STROKE: i32 = 3;
const CENTER_RADIUS: i32 = 5;

const YAW_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const PITCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ROLL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const CENTER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const BOX_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Draw the face box and the yaw/pitch/roll axes anchored at the nose tip.
pub fn draw_face_axis(frame: &mut RgbImage, landmarks: &Landmarks, angle: &FaceAngle, bbox: &BoundingBox) {
    let nose = landmarks.nose_tip();
    let center = (nose.x, nose.y);
    let (yaw, pitch, roll) = (
        angle.yaw.to_radians(),
        angle.pitch.to_radians(),
        angle.roll.to_radians(),
    );

    if bbox.width >= 1.0 && bbox.height >= 1.0 {
        let rect = Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.width as u32, bbox.height as u32);
        draw_hollow_rect_mut(frame, rect, BOX_COLOR);
    }

    let [yaw_end, pitch_end, roll_end] = axis_endpoints(center, yaw, pitch, roll);
    thick_line(frame, center, yaw_end, YAW_COLOR);
    thick_line(frame, center, pitch_end, PITCH_COLOR);
    thick_line(frame, center, roll_end, ROLL_COLOR);

    draw_filled_circle_mut(frame, (center.0 as i32, center.1 as i32), CENTER_RADIUS, CENTER_COLOR);
}

/// `Yaw: 12.3°` style readouts shown next to the overlay.
pub fn angle_labels(angle: &FaceAngle) -> [String; 3] {
    [
        format!("Yaw: {:.1}°", angle.yaw),
        format!("Pitch: {:.1}°", angle.pitch),
        format!("Roll: {:.1}°", angle.roll),
    ]
}

/// Yaw, pitch and roll axis end points; angles in radians.
fn axis_endpoints(center: (f32, f32), yaw: f32, pitch: f32, roll: f32) -> [(f32, f32); 3] {
    let (cx, cy) = center;
    [
        (cx + AXIS_LENGTH * yaw.cos(), cy + AXIS_LENGTH * yaw.sin()),
        (cx, cy - AXIS_LENGTH * pitch.cos()),
        (cx + AXIS_LENGTH * roll.sin(), cy + AXIS_LENGTH * roll.cos()),
    ]
}

// imageproc lines are one pixel wide.
fn thick_line(frame: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: Rgb<u8>) {
    let half = STROKE / 2;
    for d in -half..=half {
        let off = d as f32;
        draw_line_segment_mut(frame, (from.0 + off, from.1), (to.0 + off, to.1), color);
        draw_line_segment_mut(frame, (from.0, from.1 + off), (to.0, to.1 + off), color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Point;

    fn landmarks_at(x: f32, y: f32) -> Landmarks {
        Landmarks::FivePoint([
            Point::new(x - 20.0, y - 20.0),
            Point::new(x + 20.0, y - 20.0),
            Point::new(x, y),
            Point::new(x - 15.0, y + 20.0),
            Point::new(x + 15.0, y + 20.0),
        ])
    }

    #[test]
    fn test_frontal_axis_endpoints() {
        let [yaw, pitch, roll] = axis_endpoints((100.0, 100.0), 0.0, 0.0, 0.0);
        assert_eq!(yaw, (180.0, 100.0));
        assert_eq!(pitch, (100.0, 20.0));
        assert_eq!(roll, (100.0, 180.0));
    }

    #[test]
    fn test_draw_colors_axes_and_center() {
        let mut frame = RgbImage::new(200, 200);
        let bbox = BoundingBox { x: 60.0, y: 60.0, width: 80.0, height: 80.0, confidence: 0.9, keypoints: None };
        draw_face_axis(&mut frame, &landmarks_at(100.0, 100.0), &FaceAngle::default(), &bbox);

        assert_eq!(*frame.get_pixel(100, 100), CENTER_COLOR);
        assert_eq!(*frame.get_pixel(170, 100), YAW_COLOR);
        assert_eq!(*frame.get_pixel(100, 30), PITCH_COLOR);
        assert_eq!(*frame.get_pixel(100, 170), ROLL_COLOR);
        assert_eq!(*frame.get_pixel(60, 75), BOX_COLOR);
    }

    #[test]
    fn test_axes_clip_at_frame_edge() {
        let mut frame = RgbImage::new(50, 50);
        let bbox = BoundingBox { x: 0.0, y: 0.0, width: 0.0, height: 0.0, confidence: 0.9, keypoints: None };
        draw_face_axis(&mut frame, &landmarks_at(45.0, 5.0), &FaceAngle::default(), &bbox);
        assert_eq!(*frame.get_pixel(45, 5), CENTER_COLOR);
    }

    #[test]
    fn test_angle_labels() {
        let labels = angle_labels(&FaceAngle { yaw: 12.34, pitch: -3.0, roll: 0.06 });
        assert_eq!(labels[0], "Yaw: 12.3°");
        assert_eq!(labels[1], "Pitch: -3.0°");
        assert_eq!(labels[2], "Roll: 0.1°");
    }
}
