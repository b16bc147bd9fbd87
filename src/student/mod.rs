//! Student side of the pipeline: capture behavioural signals during an exam
//! attempt and stream them to the evaluator.

pub mod agent;
pub mod camera;
pub mod detector;
pub mod session;
pub mod signals;

pub use agent::{
    AgentConfig, AgentError, StudentProctorAgent, DEFAULT_SAMPLE_INTERVAL,
    MIN_SAMPLE_INTERVAL,
};
pub use camera::{Camera, MediaAccessError, MediaStream, SyntheticCamera, UnavailableCamera, VideoFrame};
pub use detector::{
    extract_samples, DetectError, DetectorLoadError, DetectorLoader, DetectorOptions, FaceMesh,
    Landmark, LandmarkDetector, SyntheticDetector, SyntheticDetectorLoader,
};
pub use session::{DisabledReason, ProctoringStatus, SessionLifecycle, SessionState};
pub use signals::{PageSignal, PageSignalTracker, Visibility};
