//! Facial landmark layouts.
//!
//! The detector yields five keypoints per face; the optional landmark model
//! yields the 68-point iBUG layout. Angle estimation only needs the eye
//! centres, the nose tip and the mouth centre, which both layouts provide.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

// iBUG 68-point index ranges.
const NOSE: std::ops::Range<usize> = 27..36;
const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;
const MOUTH: std::ops::Range<usize> = 48..68;
/// Index of the nose tip within the nose group.
const NOSE_TIP_IN_GROUP: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Landmarks {
    /// [left_eye, right_eye, nose, left_mouth, right_mouth].
    FivePoint([Point; 5]),
    /// iBUG order. Build from a `Vec` with [`Landmarks::sixty_eight`].
    SixtyEight(Box<[Point; 68]>),
}

impl Landmarks {
    /// Build a 68-point set, rejecting any other length.
    pub fn sixty_eight(points: Vec<Point>) -> Option<Self> {
        let points: Box<[Point; 68]> = points.into_boxed_slice().try_into().ok()?;
        Some(Landmarks::SixtyEight(points))
    }

    pub fn nose_tip(&self) -> Point {
        match self {
            Landmarks::FivePoint(p) => p[2],
            Landmarks::SixtyEight(p) => p[NOSE][NOSE_TIP_IN_GROUP],
        }
    }

    pub fn left_eye_center(&self) -> Point {
        match self {
            Landmarks::FivePoint(p) => p[0],
            Landmarks::SixtyEight(p) => centroid(&p[LEFT_EYE]),
        }
    }

    pub fn right_eye_center(&self) -> Point {
        match self {
            Landmarks::FivePoint(p) => p[1],
            Landmarks::SixtyEight(p) => centroid(&p[RIGHT_EYE]),
        }
    }

    pub fn mouth_center(&self) -> Point {
        match self {
            Landmarks::FivePoint(p) => centroid(&p[3..5]),
            Landmarks::SixtyEight(p) => centroid(&p[MOUTH]),
        }
    }

    pub fn points(&self) -> &[Point] {
        match self {
            Landmarks::FivePoint(p) => p,
            Landmarks::SixtyEight(p) => &p[..],
        }
    }
}

/// Mean of a non-empty point group.
pub fn centroid(points: &[Point]) -> Point {
    if points.is_empty() {
        return Point::default();
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}
