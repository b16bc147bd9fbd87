//! Teacher-side live aggregation of student snapshots.

use super::alert::AlertSink;
use super::roster::{RosterState, Upsert};
use super::view::{project, render_table, RosterRow};
use crate::channel::{
    ChannelState, ChannelStats, CloseReason, Connector, ProctorChannel, Subscription,
};
use crate::protocol::{ChannelAddress, StudentProctorSnapshot};
use crate::transparency::{create_shared_log, SharedTelemetryLog};
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("test id must not be empty")]
    EmptyTestId,
}

struct Monitor {
    test_id: String,
    roster: RwLock<RosterState>,
    monitoring: AtomicBool,
    updates: watch::Sender<u64>,
    alert: Arc<dyn AlertSink>,
    log: SharedTelemetryLog,
}

impl Monitor {
    fn read(&self) -> RwLockReadGuard<'_, RosterState> {
        self.roster.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RosterState> {
        self.roster.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, snapshot: StudentProctorSnapshot) {
        let mut roster = self.write();
        if !self.monitoring.load(Ordering::SeqCst) {
            return;
        }

        let high = snapshot.suspicion_level.is_high();
        if high {
            self.alert.alert(&snapshot);
            self.log.record_alert();
        }
        tracing::debug!(
            test_id = %self.test_id,
            student = %snapshot.student,
            level = %snapshot.suspicion_level,
            "snapshot received"
        );
        if roster.upsert(snapshot) == Upsert::Inserted {
            tracing::info!(test_id = %self.test_id, students = roster.len(), "new student on roster");
        }
        self.log.record_snapshot_applied();
        self.updates.send_modify(|revision| *revision += 1);
    }
}

/// Live roster of one test.
///
/// Every valid snapshot replaces the student's previous one, and every
/// `high` snapshot fires the alert sink, including consecutive ones.
pub struct TeacherAggregator {
    monitor: Arc<Monitor>,
    channel: ProctorChannel<StudentProctorSnapshot>,
    listener: Option<JoinHandle<()>>,
}

impl TeacherAggregator {
    /// Open the teacher channel for `test_id` and start listening.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn monitor(
        connector: Arc<dyn Connector>,
        test_id: &str,
        alert: Arc<dyn AlertSink>,
    ) -> Result<Self, AggregatorError> {
        let test_id = test_id.trim();
        if test_id.is_empty() {
            return Err(AggregatorError::EmptyTestId);
        }

        let (updates, _) = watch::channel(0);
        let monitor = Arc::new(Monitor {
            test_id: test_id.to_string(),
            roster: RwLock::new(RosterState::new()),
            monitoring: AtomicBool::new(true),
            updates,
            alert,
            log: create_shared_log(),
        });

        let mut channel =
            ProctorChannel::<StudentProctorSnapshot>::open(connector, ChannelAddress::teacher(test_id));
        let listener = channel
            .subscribe()
            .map(|subscription| tokio::spawn(listen(Arc::clone(&monitor), subscription)));
        tracing::info!(test_id, "monitoring test");

        Ok(Self {
            monitor,
            channel,
            listener,
        })
    }

    pub fn test_id(&self) -> &str {
        &self.monitor.test_id
    }

    /// Stop monitoring: close the channel and discard the roster.
    ///
    /// Idempotent. No snapshot is applied after this returns.
    pub fn stop(&mut self) {
        {
            let mut roster = self.monitor.write();
            if !self.monitor.monitoring.swap(false, Ordering::SeqCst) {
                return;
            }
            roster.clear();
        }
        self.channel.close();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        tracing::info!(test_id = %self.monitor.test_id, "stopped monitoring");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.monitoring.load(Ordering::SeqCst)
    }

    /// Copy of the current roster.
    pub fn roster(&self) -> RosterState {
        self.monitor.read().clone()
    }

    pub fn snapshot_of(&self, student: &str) -> Option<StudentProctorSnapshot> {
        self.monitor.read().get(student).cloned()
    }

    /// Rows for the current roster, marking stale ones.
    pub fn rows(&self, stale_after: Duration) -> Vec<RosterRow> {
        project(&self.monitor.read(), Utc::now(), stale_after)
    }

    pub fn render(&self, stale_after: Duration) -> String {
        render_table(
            &self.monitor.test_id,
            &self.rows(stale_after),
            self.connection_state(),
        )
    }

    pub fn connection_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn connection_changes(&self) -> watch::Receiver<ChannelState> {
        self.channel.state_changes()
    }

    /// Wait until the channel is open or has failed.
    pub async fn wait_until_settled(&self) -> ChannelState {
        self.channel.wait_until_settled().await
    }

    /// Whether the data shown can no longer be refreshed.
    pub fn is_stale(&self) -> bool {
        matches!(
            self.channel.close_reason(),
            Some(CloseReason::ClosedUnexpectedly | CloseReason::ConnectFailed)
        )
    }

    /// Revision counter bumped on every applied snapshot.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.monitor.updates.subscribe()
    }

    pub fn alerts_fired(&self) -> u64 {
        self.monitor.log.stats().alerts_triggered
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    pub fn telemetry(&self) -> SharedTelemetryLog {
        Arc::clone(&self.monitor.log)
    }
}

impl Drop for TeacherAggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn listen(monitor: Arc<Monitor>, mut subscription: Subscription<StudentProctorSnapshot>) {
    while let Some(snapshot) = subscription.next().await {
        monitor.apply(snapshot);
    }
    if monitor.monitoring.load(Ordering::SeqCst) {
        tracing::warn!(
            test_id = %monitor.test_id,
            "teacher channel closed, roster will go stale"
        );
    }
}
