//! Proctor Telemetry - real-time exam proctoring signals.
//!
//! Students' exam clients stream lightweight behavioural signals (face
//! landmarks, tab switches, window blur) to an external suspicion evaluator,
//! which republishes per-student snapshots to teacher dashboards.
//!
//! # Privacy Guarantees
//!
//! - **No video leaves the machine**: frames are analysed locally
//! - **Three points per face**: only eye corners and nose tip are sent
//! - **No page content**: only the fact that the tab or window changed
//! - **Transparency**: everything sent is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────────┐
//! │     StudentProctorAgent      │          │      TeacherAggregator       │
//! │  ┌────────┐   ┌──────────┐   │          │  ┌────────┐   ┌──────────┐   │
//! │  │ Camera │──▶│ Detector │   │          │  │ Roster │──▶│   View   │   │
//! │  └────────┘   └──────────┘   │          │  └────────┘   └──────────┘   │
//! │  ┌────────┐        │         │          │       ▲            │         │
//! │  │ Page   │        ▼         │          │       │            ▼         │
//! │  │signals │──▶ ProctorChannel│          │ ProctorChannel   Alert       │
//! │  └────────┘        │         │          │       ▲                      │
//! └────────────────────┼─────────┘          └───────┼──────────────────────┘
//!                      │    ┌───────────────────┐   │
//!                      └───▶│ Suspicion         │───┘
//!                           │ evaluator (extern)│
//!                           └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use proctor_telemetry::{channel, protocol, teacher};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let connector = channel::WebSocketConnector::new(protocol::ServerEndpoint::default());
//! let aggregator = teacher::TeacherAggregator::monitor(
//!     Arc::new(connector),
//!     "t1",
//!     Arc::new(teacher::LogAlert),
//! )
//! .expect("valid test id");
//!
//! let mut updates = aggregator.updates();
//! while updates.changed().await.is_ok() {
//!     println!("{}", aggregator.render(chrono::Duration::seconds(30)));
//! }
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod observability;
pub mod protocol;
pub mod student;
pub mod teacher;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use channel::{ChannelState, Connector, MemoryConnector, ProctorChannel, WebSocketConnector};
pub use config::{Config, ConfigError};
pub use protocol::{
    ChannelAddress, FaceLandmarkSample, ProctorEvent, ServerEndpoint, StudentProctorSnapshot,
    SuspicionLevel,
};
pub use student::{AgentConfig, AgentError, ProctoringStatus, SessionState, StudentProctorAgent};
pub use teacher::{AggregatorError, AlertSink, RosterState, TeacherAggregator};
pub use transparency::{SharedTelemetryLog, TelemetryLog, TelemetryStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice shown to students before proctoring starts.
pub const PROCTORING_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║                EXAM PROCTORING - WHAT IS COLLECTED               ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  While your test is running, this exam uses your webcam to       ║
║  check that you are present and looking at the screen.           ║
║                                                                  ║
║  ✓ WHAT IS SENT:                                                 ║
║    • Eye and nose positions, every 2 seconds, per face           ║
║    • When you switch to another tab                              ║
║    • When the exam window loses focus                            ║
║                                                                  ║
║  ✗ WHAT IS NEVER SENT:                                           ║
║    • Video or images from your camera                            ║
║    • The content of other tabs or applications                   ║
║    • Anything before you start or after you submit               ║
║                                                                  ║
║  If the camera is unavailable, the exam continues without        ║
║  proctoring.                                                     ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proctoring_notice_contents() {
        assert!(PROCTORING_NOTICE.contains("PROCTORING"));
        assert!(PROCTORING_NOTICE.contains("NEVER SENT"));
        assert!(PROCTORING_NOTICE.contains("Video or images"));
    }
}
