//! Face landmark detection capability.
//!
//! The vision model itself is external. The agent depends on it through
//! [`DetectorLoader`] and [`LandmarkDetector`], and reduces every detected face
//! mesh to the three points that go on the wire.

use super::camera::VideoFrame;
use crate::protocol::{FaceLandmarkSample, NormalizedPoint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Mesh index of the outer left eye corner.
pub const LEFT_EYE: usize = 33;
/// Mesh index of the outer right eye corner.
pub const RIGHT_EYE: usize = 263;
/// Mesh index of the nose tip.
pub const NOSE_TIP: usize = 1;

const LEFT_EYE_FALLBACK: usize = 1;
const RIGHT_EYE_FALLBACK: usize = 5;
const NOSE_TIP_FALLBACK: usize = 4;

/// Model options passed to the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorOptions {
    /// Upper bound on faces reported per frame
    pub max_faces: usize,
    pub refine_landmarks: bool,
    pub min_detection_confidence: f64,
    pub min_tracking_confidence: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            max_faces: 2,
            refine_landmarks: true,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectorLoadError {
    #[error("failed to load landmark model: {0}")]
    Load(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectError {
    #[error("landmark detection failed: {0}")]
    Failed(String),
    #[error("detector already closed")]
    Closed,
}

/// A single mesh landmark in normalized frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// Full landmark mesh of one detected face.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceMesh {
    pub landmarks: Vec<Landmark>,
}

impl FaceMesh {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self { landmarks }
    }

    fn point(&self, index: usize, fallback: usize) -> Option<NormalizedPoint> {
        self.landmarks
            .get(index)
            .or_else(|| self.landmarks.get(fallback))
            .map(|l| NormalizedPoint::new(l.x, l.y))
    }

    /// Reduce the mesh to eyes and nose tip, or `None` if any is missing.
    pub fn to_sample(&self) -> Option<FaceLandmarkSample> {
        Some(FaceLandmarkSample {
            left_eye: self.point(LEFT_EYE, LEFT_EYE_FALLBACK)?,
            right_eye: self.point(RIGHT_EYE, RIGHT_EYE_FALLBACK)?,
            nose_tip: self.point(NOSE_TIP, NOSE_TIP_FALLBACK)?,
        })
    }
}

/// Samples for at most `max_faces` faces, skipping incomplete meshes.
pub fn extract_samples(faces: &[FaceMesh], max_faces: usize) -> Vec<FaceLandmarkSample> {
    faces
        .iter()
        .take(max_faces)
        .filter_map(FaceMesh::to_sample)
        .collect()
}

/// A loaded landmark model.
#[async_trait]
pub trait LandmarkDetector: Send + Sync {
    /// Detect faces in one frame. May complete after the session ended.
    async fn detect(&self, frame: &VideoFrame) -> Result<Vec<FaceMesh>, DetectError>;

    /// Release the model.
    fn close(&self);
}

/// Loads a [`LandmarkDetector`].
#[async_trait]
pub trait DetectorLoader: Send + Sync {
    async fn load(
        &self,
        options: &DetectorOptions,
    ) -> Result<Arc<dyn LandmarkDetector>, DetectorLoadError>;
}

/// Loader for [`SyntheticDetector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticDetectorLoader;

#[async_trait]
impl DetectorLoader for SyntheticDetectorLoader {
    async fn load(
        &self,
        _options: &DetectorOptions,
    ) -> Result<Arc<dyn LandmarkDetector>, DetectorLoadError> {
        Ok(Arc::new(SyntheticDetector::default()))
    }
}

/// Reports one centred, forward-facing face for every frame.
#[derive(Debug, Default)]
pub struct SyntheticDetector {
    closed: AtomicBool,
}

impl SyntheticDetector {
    /// Mesh with eyes level and the nose between them.
    pub fn centred_face() -> FaceMesh {
        let mut landmarks = vec![Landmark::new(0.5, 0.5); RIGHT_EYE + 1];
        landmarks[LEFT_EYE] = Landmark::new(0.42, 0.45);
        landmarks[RIGHT_EYE] = Landmark::new(0.58, 0.45);
        landmarks[NOSE_TIP] = Landmark::new(0.5, 0.46);
        FaceMesh::new(landmarks)
    }
}

#[async_trait]
impl LandmarkDetector for SyntheticDetector {
    async fn detect(&self, _frame: &VideoFrame) -> Result<Vec<FaceMesh>, DetectError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DetectError::Closed);
        }
        Ok(vec![Self::centred_face()])
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
