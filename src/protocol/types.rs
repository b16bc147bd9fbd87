//! Wire types exchanged over proctor channels.
//!
//! Student agents send [`ProctorEvent`]s; the evaluator answers teachers with
//! [`StudentProctorSnapshot`]s and may nudge students with [`StudentNotice`]s.
//! Only three landmark points per face ever leave the student machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in normalized frame coordinates, both axes in `[0, 1]`.
///
/// Serialized as a two-element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    /// Create a point, clamping both coordinates into `[0, 1]`.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

impl From<[f64; 2]> for NormalizedPoint {
    fn from([x, y]: [f64; 2]) -> Self {
        Self::new(x, y)
    }
}

impl From<NormalizedPoint> for [f64; 2] {
    fn from(p: NormalizedPoint) -> Self {
        [p.x, p.y]
    }
}

/// The three landmark points extracted for one detected face.
///
/// A sample is always complete: a face missing any point is dropped upstream
/// rather than sent partially filled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarkSample {
    pub left_eye: NormalizedPoint,
    pub right_eye: NormalizedPoint,
    pub nose_tip: NormalizedPoint,
}

/// Event sent from a student agent to the evaluator.
///
/// The send time is assigned by the server, never by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ProctorEvent {
    /// One detection tick with at least one face.
    Face { landmarks: Vec<FaceLandmarkSample> },
    /// The page became hidden.
    TabSwitch,
    /// The window lost focus.
    WindowBlur,
}

impl ProctorEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProctorEvent::Face { .. } => "face",
            ProctorEvent::TabSwitch => "tab_switch",
            ProctorEvent::WindowBlur => "window_blur",
        }
    }
}

/// Categorical suspicion computed by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspicionLevel {
    Low,
    Medium,
    High,
}

impl SuspicionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspicionLevel::Low => "low",
            SuspicionLevel::Medium => "medium",
            SuspicionLevel::High => "high",
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, SuspicionLevel::High)
    }
}

impl std::fmt::Display for SuspicionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole-state update for one student, pushed to teacher dashboards.
///
/// Each arrival replaces the previous snapshot for the same student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProctorSnapshot {
    pub student: String,
    #[serde(default)]
    pub status: String,
    pub suspicion_level: SuspicionLevel,
    pub suspicion_score: f64,
    #[serde(with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Feedback frame the evaluator may push back to a student agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspicion_level: Option<SuspicionLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl StudentNotice {
    /// Whether the student should see the suspicious-activity warning.
    pub fn raises_warning(&self) -> bool {
        self.suspicion_level.is_some_and(|l| l.is_high())
    }
}

/// ISO-8601 timestamps as produced by the evaluator.
///
/// Accepts RFC 3339 as well as offset-less timestamps, which are read as UTC.
pub mod iso_timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid ISO-8601 timestamp: {raw}")))
    }

    /// Parse an RFC 3339 or naive ISO-8601 timestamp.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
