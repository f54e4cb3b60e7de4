use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::angle::FaceAngle;
use crate::landmarks::{Landmarks, Point};

/// Enrolled person category. Selects the role-specific fields everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Staff => "staff",
        }
    }

    /// Column label for the role's grouping field.
    pub fn group_label(&self) -> &'static str {
        match self {
            Role::Student => "Course",
            Role::Staff => "Department",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "staff" => Ok(Role::Staff),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Face bounding box in frame coordinates, with the detector's five keypoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub keypoints: Option<[Point; 5]>,
}

/// Face descriptor vector produced by the recognition model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model that produced the descriptor (e.g. "w600k_r50").
    pub model_version: Option<String>,
}

impl Descriptor {
    /// Cosine similarity in [-1, 1].
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Similarity score as reported to operators: `1 - euclidean distance`.
    pub fn compare(&self, other: &Descriptor) -> f32 {
        1.0 - self.euclidean_distance(other)
    }
}

/// Everything the face processor extracts from one frame.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub descriptor: Descriptor,
    pub landmarks: Landmarks,
    pub angle: FaceAngle,
    pub bbox: BoundingBox,
    pub score: f32,
}

/// `/attendance/status` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringStatus {
    pub is_running: bool,
    #[serde(default)]
    pub is_busy: bool,
    #[serde(default)]
    pub known_faces_count: u32,
    #[serde(default)]
    pub monitoring_since: Option<String>,
}

/// `/attendance/today-summary` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodaySummary {
    #[serde(default)]
    pub students_present: u32,
    #[serde(default)]
    pub students_total: u32,
    #[serde(default)]
    pub staff_present: u32,
    #[serde(default)]
    pub staff_total: u32,
    #[serde(default)]
    pub total_enrolled: u32,
}

/// A person known to the recognition system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledPerson {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub sem: Option<String>,
    #[serde(default)]
    pub dep: Option<String>,
}

impl EnrolledPerson {
    /// Course with semester for students, department for staff.
    pub fn group(&self) -> String {
        let base = self
            .course
            .as_deref()
            .or(self.dep.as_deref())
            .unwrap_or_default();
        match &self.sem {
            Some(sem) if !sem.is_empty() => format!("{base} - Sem {sem}"),
            _ => base.to_string(),
        }
    }
}

/// `/enrollment/list` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrolledList {
    #[serde(default)]
    pub students: Vec<EnrolledPerson>,
    #[serde(default)]
    pub staff: Vec<EnrolledPerson>,
}

/// One row of the flat attendance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub sem: Option<String>,
    #[serde(default)]
    pub dep: Option<String>,
    pub date: String,
    #[serde(default)]
    pub check_in: Option<String>,
    #[serde(default)]
    pub check_out: Option<String>,
}

/// `/reports/attendance` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub role: Role,
    #[serde(default)]
    pub data: Vec<AttendanceRecord>,
    #[serde(default)]
    pub count: usize,
}

/// Row header of the attendance sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetPerson {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub dep: Option<String>,
}

impl SheetPerson {
    pub fn group(&self) -> &str {
        self.course
            .as_deref()
            .or(self.dep.as_deref())
            .unwrap_or_default()
    }
}

/// A single `(person, date)` cell of the attendance sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetEntry {
    #[serde(default)]
    pub check_in: Option<String>,
    #[serde(default)]
    pub check_out: Option<String>,
}

/// `/reports/attendance-sheet` payload: persons × dates pivot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSheet {
    pub role: Role,
    #[serde(default)]
    pub persons: Vec<SheetPerson>,
    #[serde(default)]
    pub dates: Vec<String>,
    /// Keyed by `"<id>_<date>"`.
    #[serde(default)]
    pub attendance: HashMap<String, SheetEntry>,
}

impl AttendanceSheet {
    pub fn key(person_id: &str, date: &str) -> String {
        format!("{person_id}_{date}")
    }

    /// Check-in time for the cell, if the person was present that day.
    pub fn check_in(&self, person_id: &str, date: &str) -> Option<&str> {
        self.attendance
            .get(&Self::key(person_id, date))
            .and_then(|e| e.check_in.as_deref())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: Vec<f32>) -> Descriptor {
        Descriptor { values, model_version: None }
    }

    #[test]
    fn test_similarity_identical() {
        let a = desc(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = desc(vec![0.0, 0.0]);
        let b = desc(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_compare_is_one_minus_distance() {
        let a = desc(vec![0.0, 0.0]);
        let b = desc(vec![0.3, 0.4]);
        assert!((a.compare(&b) - 0.5).abs() < 1e-6);
        assert!((a.compare(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_role_parse_and_labels() {
        assert_eq!("Staff".parse::<Role>().unwrap(), Role::Staff);
        assert!("admin".parse::<Role>().is_err());
        assert_eq!(Role::Student.group_label(), "Course");
        assert_eq!(Role::Staff.group_label(), "Department");
    }

    #[test]
    fn test_enrolled_person_numeric_semester() {
        let p: EnrolledPerson = serde_json::from_str(
            r#"{"id":"S1","name":"Ann","course":"BCA","sem":3,"role":"student"}"#,
        )
        .unwrap();
        assert_eq!(p.sem.as_deref(), Some("3"));
        assert_eq!(p.group(), "BCA - Sem 3");
    }

    #[test]
    fn test_staff_group_is_department() {
        let p: EnrolledPerson =
            serde_json::from_str(r#"{"id":"T9","name":"Raj","dep":"Physics","role":"staff"}"#)
                .unwrap();
        assert_eq!(p.group(), "Physics");
    }

    #[test]
    fn test_status_defaults_missing_fields() {
        let s: MonitoringStatus = serde_json::from_str(r#"{"is_running":true}"#).unwrap();
        assert!(s.is_running);
        assert!(!s.is_busy);
        assert_eq!(s.known_faces_count, 0);
    }

    #[test]
    fn test_sheet_check_in_lookup() {
        let sheet: AttendanceSheet = serde_json::from_str(
            r#"{"role":"staff","persons":[],"dates":["2026-10-01"],
                "attendance":{"T1_2026-10-01":{"check_in":"09:01:00","check_out":null}}}"#,
        )
        .unwrap();
        assert_eq!(sheet.check_in("T1", "2026-10-01"), Some("09:01:00"));
        assert_eq!(sheet.check_in("T1", "2026-10-02"), None);
    }
}
