//! Auditable proctoring telemetry counters.
//!
//! Tracks what the agent transmitted and what the dashboard received,
//! without storing any frame, landmark or score content.

use crate::protocol::ProctorEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Telemetry counters for one proctoring session.
#[derive(Debug)]
pub struct TelemetryLog {
    /// Face events handed to the channel
    face_events: AtomicU64,
    /// Tab-switch events handed to the channel
    tab_switches: AtomicU64,
    /// Window-blur events handed to the channel
    window_blurs: AtomicU64,
    /// Sampler ticks skipped because a detection was still running
    detections_skipped: AtomicU64,
    /// Detection results that arrived after the session ended
    detections_ignored: AtomicU64,
    /// Snapshots applied to a teacher roster
    snapshots_applied: AtomicU64,
    /// Alerts triggered by high-suspicion snapshots
    alerts_triggered: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self {
            face_events: AtomicU64::new(0),
            tab_switches: AtomicU64::new(0),
            window_blurs: AtomicU64::new(0),
            detections_skipped: AtomicU64::new(0),
            detections_ignored: AtomicU64::new(0),
            snapshots_applied: AtomicU64::new(0),
            alerts_triggered: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    /// Record an event that was handed to the channel.
    pub fn record_event_sent(&self, event: &ProctorEvent) {
        let counter = match event {
            ProctorEvent::Face { .. } => &self.face_events,
            ProctorEvent::TabSwitch => &self.tab_switches,
            ProctorEvent::WindowBlur => &self.window_blurs,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection_skipped(&self) {
        self.detections_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection_ignored(&self) {
        self.detections_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_applied(&self) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts_triggered.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            face_events: self.face_events.load(Ordering::Relaxed),
            tab_switches: self.tab_switches.load(Ordering::Relaxed),
            window_blurs: self.window_blurs.load(Ordering::Relaxed),
            detections_skipped: self.detections_skipped.load(Ordering::Relaxed),
            detections_ignored: self.detections_ignored.load(Ordering::Relaxed),
            snapshots_applied: self.snapshots_applied.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Proctoring Statistics:\n\
             - Face events sent: {}\n\
             - Tab switches sent: {}\n\
             - Window blurs sent: {}\n\
             - Detection ticks skipped (busy): {}\n\
             - Late detections ignored: {}\n\
             - Snapshots applied: {}\n\
             - Alerts triggered: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Transmitted Data:\n\
             - No video frames leave this machine\n\
             - Only eye and nose positions, per detected face\n\
             - Tab and focus changes, without page content",
            stats.face_events,
            stats.tab_switches,
            stats.window_blurs,
            stats.detections_skipped,
            stats.detections_ignored,
            stats.snapshots_applied,
            stats.alerts_triggered,
            stats.session_duration_secs
        )
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of telemetry statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub face_events: u64,
    pub tab_switches: u64,
    pub window_blurs: u64,
    pub detections_skipped: u64,
    pub detections_ignored: u64,
    pub snapshots_applied: u64,
    pub alerts_triggered: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared telemetry log.
pub type SharedTelemetryLog = Arc<TelemetryLog>;

/// Create a new shared telemetry log.
pub fn create_shared_log() -> SharedTelemetryLog {
    Arc::new(TelemetryLog::new())
}
