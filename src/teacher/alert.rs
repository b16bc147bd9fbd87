//! Alert side effects for high-suspicion snapshots.

use crate::protocol::StudentProctorSnapshot;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives one call per high-suspicion snapshot.
pub trait AlertSink: Send + Sync {
    fn alert(&self, snapshot: &StudentProctorSnapshot);
}

/// Rings the terminal bell. Write failures are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

impl AlertSink for TerminalBell {
    fn alert(&self, _snapshot: &StudentProctorSnapshot) {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}

/// Emits a warning log line per alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlert;

impl AlertSink for LogAlert {
    fn alert(&self, snapshot: &StudentProctorSnapshot) {
        tracing::warn!(
            student = %snapshot.student,
            score = snapshot.suspicion_score,
            "high suspicion reported"
        );
    }
}

/// Counts alerts without any other effect.
#[derive(Debug, Default)]
pub struct CountingAlert {
    count: AtomicU64,
}

impl CountingAlert {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl AlertSink for CountingAlert {
    fn alert(&self, _snapshot: &StudentProctorSnapshot) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

impl<A: AlertSink, B: AlertSink> AlertSink for (A, B) {
    fn alert(&self, snapshot: &StudentProctorSnapshot) {
        self.0.alert(snapshot);
        self.1.alert(snapshot);
    }
}
