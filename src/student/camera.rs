//! Camera capability consumed by the student agent.
//!
//! The real camera lives in the host environment; the agent only needs to
//! acquire a stream, read the current frame and stop the tracks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Camera acquisition failures. Always recoverable: proctoring is disabled,
/// the exam goes on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera device available")]
    NoDevice,
    #[error("camera unavailable: {0}")]
    Other(String),
}

/// One captured video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGBA pixels
    pub pixels: Arc<[u8]>,
    pub captured_at: DateTime<Utc>,
}

impl VideoFrame {
    /// A black frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 4;
        Self {
            width,
            height,
            pixels: vec![0u8; len].into(),
            captured_at: Utc::now(),
        }
    }
}

/// A live camera stream.
pub trait MediaStream: Send + Sync {
    /// The frame currently shown, if the stream has produced one.
    fn current_frame(&self) -> Option<VideoFrame>;

    /// Number of tracks still running.
    fn active_tracks(&self) -> usize;

    /// Stop every track. Idempotent.
    fn stop_tracks(&self);
}

/// Grants access to a camera stream.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn MediaStream>, MediaAccessError>;
}

/// Camera for hosts without a video device.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCamera;

#[async_trait]
impl Camera for UnavailableCamera {
    async fn acquire(&self) -> Result<Arc<dyn MediaStream>, MediaAccessError> {
        Err(MediaAccessError::NoDevice)
    }
}

/// Camera producing blank frames, for local smoke runs.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticCamera {
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

#[async_trait]
impl Camera for SyntheticCamera {
    async fn acquire(&self) -> Result<Arc<dyn MediaStream>, MediaAccessError> {
        Ok(Arc::new(SyntheticStream {
            width: self.width,
            height: self.height,
            tracks: AtomicUsize::new(1),
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    tracks: AtomicUsize,
}

impl MediaStream for SyntheticStream {
    fn current_frame(&self) -> Option<VideoFrame> {
        if self.active_tracks() == 0 {
            return None;
        }
        Some(VideoFrame::blank(self.width, self.height))
    }

    fn active_tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    fn stop_tracks(&self) {
        self.tracks.store(0, Ordering::SeqCst);
    }
}
