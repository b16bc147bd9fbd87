//! Student-side proctoring agent.
//!
//! One agent runs per exam attempt. It owns the camera stream, the landmark
//! detector, the periodic sampler, the page-signal watcher and one
//! [`ProctorChannel`], and turns what it observes into [`ProctorEvent`]s.
//!
//! Proctoring failures never end the attempt. A camera or detector failure
//! moves [`ProctoringStatus`] to `Disabled` while the session stays `Active`
//! until [`StudentProctorAgent::stop`].

use super::camera::{Camera, MediaStream, VideoFrame};
use super::detector::{extract_samples, DetectorLoader, DetectorOptions, LandmarkDetector};
use super::session::{DisabledReason, ProctoringStatus, SessionLifecycle, SessionState};
use super::signals::{PageSignal, PageSignalTracker};
use crate::channel::{ChannelSender, ChannelState, ChannelStats, Connector, ProctorChannel};
use crate::protocol::{ChannelAddress, ProctorEvent, StudentNotice};
use crate::transparency::{create_shared_log, SharedTelemetryLog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Default time between two detection samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(2000);

/// Shortest period the sampler will run at.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Agent settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub sample_interval: Duration,
    pub detector: DetectorOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            detector: DetectorOptions::default(),
        }
    }
}

impl AgentConfig {
    /// Sampling period actually used, never below [`MIN_SAMPLE_INTERVAL`].
    pub fn sample_period(&self) -> Duration {
        self.sample_interval.max(MIN_SAMPLE_INTERVAL)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("test id must not be empty")]
    EmptyTestId,
    #[error("student name must not be empty")]
    EmptyStudentName,
    #[error("proctoring session already {0}")]
    AlreadyStarted(SessionState),
}

/// Everything the agent acquires during an attempt.
#[derive(Default)]
struct SessionResources {
    channel: Option<ProctorChannel<StudentNotice>>,
    notices: Option<JoinHandle<()>>,
    stream: Option<Arc<dyn MediaStream>>,
    detector: Option<Arc<dyn LandmarkDetector>>,
    sampler: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

struct Inner {
    config: AgentConfig,
    attempt: Uuid,
    lifecycle: SessionLifecycle,
    status: watch::Sender<ProctoringStatus>,
    warning: AtomicBool,
    log: SharedTelemetryLog,
    resources: Mutex<SessionResources>,
}

impl Inner {
    fn resources(&self) -> MutexGuard<'_, SessionResources> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `install` under the resource lock if the session is still active.
    ///
    /// `stop()` terminates before taking the lock, so anything installed here
    /// is guaranteed to be seen and released by it.
    fn install_if_active(&self, install: impl FnOnce(&mut SessionResources)) -> bool {
        let mut resources = self.resources();
        if !self.lifecycle.is_active() {
            return false;
        }
        install(&mut resources);
        true
    }

    /// Turn proctoring off for the rest of the attempt.
    fn disable(&self, reason: DisabledReason) {
        let mut resources = self.resources();
        if !self.lifecycle.is_active() {
            return;
        }
        tracing::warn!(attempt = %self.attempt, error = %reason, "proctoring disabled");

        if let Some(detector) = resources.detector.take() {
            detector.close();
        }
        if let Some(channel) = resources.channel.as_ref() {
            channel.close();
        }
        if let Some(notices) = resources.notices.take() {
            notices.abort();
        }
        if let Some(stream) = resources.stream.take() {
            stream.stop_tracks();
        }
        self.status.send_replace(ProctoringStatus::Disabled(reason));
    }
}

/// Proctoring agent for one exam attempt.
///
/// Must be started from within a Tokio runtime. Dropping the agent stops it.
pub struct StudentProctorAgent {
    inner: Arc<Inner>,
    connector: Arc<dyn Connector>,
    camera: Arc<dyn Camera>,
    loader: Arc<dyn DetectorLoader>,
}

impl StudentProctorAgent {
    pub fn new(
        config: AgentConfig,
        connector: Arc<dyn Connector>,
        camera: Arc<dyn Camera>,
        loader: Arc<dyn DetectorLoader>,
    ) -> Self {
        let (status, _) = watch::channel(ProctoringStatus::Pending);
        Self {
            inner: Arc::new(Inner {
                config,
                attempt: Uuid::new_v4(),
                lifecycle: SessionLifecycle::new(),
                status,
                warning: AtomicBool::new(false),
                log: create_shared_log(),
                resources: Mutex::new(SessionResources::default()),
            }),
            connector,
            camera,
            loader,
        }
    }

    /// Begin proctoring an attempt of `test_id` by `student_name`.
    ///
    /// Opens the student channel right away, then acquires the camera and the
    /// detector in the background. Sampling and page watching begin once both
    /// are ready. Page signals are read from `signals`.
    pub fn start(
        &self,
        test_id: &str,
        student_name: &str,
        signals: mpsc::Receiver<PageSignal>,
    ) -> Result<(), AgentError> {
        let test_id = test_id.trim();
        let student_name = student_name.trim();
        if test_id.is_empty() {
            return Err(AgentError::EmptyTestId);
        }
        if student_name.is_empty() {
            return Err(AgentError::EmptyStudentName);
        }
        self.inner
            .lifecycle
            .activate()
            .map_err(AgentError::AlreadyStarted)?;

        let address = ChannelAddress::student(test_id, student_name);
        tracing::info!(
            attempt = %self.inner.attempt,
            address = %address,
            "starting proctoring session"
        );

        let mut channel = ProctorChannel::<StudentNotice>::open(Arc::clone(&self.connector), address);
        let sender = channel.sender();
        let notices = channel
            .subscribe()
            .map(|subscription| tokio::spawn(watch_notices(Arc::clone(&self.inner), subscription)));

        let installed = self.inner.install_if_active(|resources| {
            resources.channel = Some(channel);
            resources.notices = notices;
        });
        if !installed {
            return Ok(());
        }

        tokio::spawn(set_up(
            Arc::clone(&self.inner),
            Arc::clone(&self.camera),
            Arc::clone(&self.loader),
            sender,
            signals,
        ));
        Ok(())
    }

    /// End the attempt and release everything, in order: sampler and
    /// watchers, detector, channel, camera tracks.
    ///
    /// Idempotent. Detections still running when this returns resolve into
    /// nothing.
    pub fn stop(&self) {
        let previous = self.inner.lifecycle.terminate();
        if previous == SessionState::Terminated {
            return;
        }

        let mut resources = self.inner.resources();
        if let Some(sampler) = resources.sampler.take() {
            sampler.abort();
        }
        if let Some(watcher) = resources.watcher.take() {
            watcher.abort();
        }
        if let Some(detector) = resources.detector.take() {
            detector.close();
        }
        if let Some(channel) = resources.channel.as_ref() {
            channel.close();
        }
        if let Some(notices) = resources.notices.take() {
            notices.abort();
        }
        if let Some(stream) = resources.stream.take() {
            stream.stop_tracks();
        }
        drop(resources);

        if previous == SessionState::Active {
            tracing::info!(attempt = %self.inner.attempt, "proctoring session stopped");
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.inner.attempt
    }

    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.state()
    }

    pub fn proctoring_status(&self) -> ProctoringStatus {
        self.inner.status.borrow().clone()
    }

    pub fn status_changes(&self) -> watch::Receiver<ProctoringStatus> {
        self.inner.status.subscribe()
    }

    /// Wait until camera and detector setup has either succeeded or failed.
    pub async fn wait_for_status(&self) -> ProctoringStatus {
        let mut changes = self.inner.status.subscribe();
        let settled = changes
            .wait_for(|status| *status != ProctoringStatus::Pending)
            .await
            .map(|status| status.clone());
        settled.unwrap_or(ProctoringStatus::Pending)
    }

    /// Whether the evaluator flagged this attempt as highly suspicious.
    pub fn warning_active(&self) -> bool {
        self.inner.warning.load(Ordering::SeqCst)
    }

    /// Whether the sampler timer is installed.
    pub fn sampler_active(&self) -> bool {
        self.inner
            .resources()
            .sampler
            .as_ref()
            .is_some_and(|sampler| !sampler.is_finished())
    }

    /// State of the student channel, `None` before `start`.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.inner.resources().channel.as_ref().map(|c| c.state())
    }

    pub fn channel_changes(&self) -> Option<watch::Receiver<ChannelState>> {
        self.inner.resources().channel.as_ref().map(|c| c.state_changes())
    }

    pub fn channel_stats(&self) -> Option<ChannelStats> {
        self.inner.resources().channel.as_ref().map(|c| c.stats())
    }

    pub fn telemetry(&self) -> SharedTelemetryLog {
        Arc::clone(&self.inner.log)
    }
}

impl Drop for StudentProctorAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Acquire camera and detector, then start sampling and watching.
async fn set_up(
    inner: Arc<Inner>,
    camera: Arc<dyn Camera>,
    loader: Arc<dyn DetectorLoader>,
    sender: ChannelSender,
    signals: mpsc::Receiver<PageSignal>,
) {
    let stream = match camera.acquire().await {
        Ok(stream) => stream,
        Err(e) => {
            inner.disable(DisabledReason::MediaAccess(e));
            return;
        }
    };
    if !inner.install_if_active(|r| r.stream = Some(Arc::clone(&stream))) {
        stream.stop_tracks();
        return;
    }
    tracing::debug!(attempt = %inner.attempt, "camera acquired");

    let detector = match loader.load(&inner.config.detector).await {
        Ok(detector) => detector,
        Err(e) => {
            inner.disable(DisabledReason::DetectorLoad(e));
            return;
        }
    };
    if !inner.install_if_active(|r| r.detector = Some(Arc::clone(&detector))) {
        detector.close();
        return;
    }
    tracing::debug!(attempt = %inner.attempt, "landmark detector loaded");

    let started = inner.install_if_active(|r| {
        r.sampler = Some(tokio::spawn(run_sampler(
            Arc::clone(&inner),
            stream,
            detector,
            sender.clone(),
        )));
        r.watcher = Some(tokio::spawn(run_watcher(
            Arc::clone(&inner),
            signals,
            sender,
        )));
        inner.status.send_replace(ProctoringStatus::Enabled);
    });
    if started {
        tracing::info!(attempt = %inner.attempt, "proctoring enabled");
    }
}

/// Clears the in-flight flag when a detection finishes or is dropped.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn run_sampler(
    inner: Arc<Inner>,
    stream: Arc<dyn MediaStream>,
    detector: Arc<dyn LandmarkDetector>,
    sender: ChannelSender,
) {
    let period = inner.config.sample_period();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let in_flight = Arc::new(AtomicBool::new(false));

    loop {
        ticker.tick().await;
        if !inner.lifecycle.is_active() {
            break;
        }
        if in_flight.swap(true, Ordering::SeqCst) {
            inner.log.record_detection_skipped();
            tracing::debug!(attempt = %inner.attempt, "detection still running, skipping tick");
            continue;
        }
        let permit = InFlight(Arc::clone(&in_flight));

        let Some(frame) = stream.current_frame() else {
            tracing::trace!(attempt = %inner.attempt, "no frame available");
            continue;
        };
        tokio::spawn(detect_once(
            Arc::clone(&inner),
            Arc::clone(&detector),
            frame,
            sender.clone(),
            permit,
        ));
    }
}

async fn detect_once(
    inner: Arc<Inner>,
    detector: Arc<dyn LandmarkDetector>,
    frame: VideoFrame,
    sender: ChannelSender,
    _permit: InFlight,
) {
    let result = detector.detect(&frame).await;
    if !inner.lifecycle.is_active() {
        inner.log.record_detection_ignored();
        return;
    }

    let faces = match result {
        Ok(faces) => faces,
        Err(e) => {
            tracing::debug!(attempt = %inner.attempt, error = %e, "landmark detection failed");
            return;
        }
    };
    let landmarks = extract_samples(&faces, inner.config.detector.max_faces);
    if landmarks.is_empty() {
        return;
    }

    let event = ProctorEvent::Face { landmarks };
    if sender.send(&event) {
        inner.log.record_event_sent(&event);
    }
}

async fn run_watcher(
    inner: Arc<Inner>,
    mut signals: mpsc::Receiver<PageSignal>,
    sender: ChannelSender,
) {
    let mut tracker = PageSignalTracker::new();
    // Signals from before enablement only move the tracker.
    while let Ok(signal) = signals.try_recv() {
        tracker.observe(signal);
    }

    while let Some(signal) = signals.recv().await {
        if !inner.lifecycle.is_active() {
            break;
        }
        let Some(event) = tracker.observe(signal) else {
            continue;
        };
        tracing::debug!(attempt = %inner.attempt, event = event.kind(), "page signal");
        if sender.send(&event) {
            inner.log.record_event_sent(&event);
        }
    }
}

async fn watch_notices(
    inner: Arc<Inner>,
    mut subscription: crate::channel::Subscription<StudentNotice>,
) {
    while let Some(notice) = subscription.next().await {
        if !inner.lifecycle.is_active() {
            break;
        }
        let warning = notice.raises_warning();
        if inner.warning.swap(warning, Ordering::SeqCst) != warning {
            tracing::info!(attempt = %inner.attempt, warning, "suspicion warning changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryConnector;
    use crate::student::camera::{SyntheticCamera, UnavailableCamera};
    use crate::student::detector::SyntheticDetectorLoader;

    fn agent_with(camera: Arc<dyn Camera>) -> (StudentProctorAgent, crate::channel::MemoryListener) {
        let (connector, listener) = MemoryConnector::new();
        let agent = StudentProctorAgent::new(
            AgentConfig::default(),
            Arc::new(connector),
            camera,
            Arc::new(SyntheticDetectorLoader),
        );
        (agent, listener)
    }

    #[test]
    fn test_sample_period_has_floor() {
        let zero = AgentConfig {
            sample_interval: Duration::ZERO,
            ..AgentConfig::default()
        };
        assert_eq!(zero.sample_period(), MIN_SAMPLE_INTERVAL);
        assert_eq!(AgentConfig::default().sample_period(), DEFAULT_SAMPLE_INTERVAL);
    }

    #[tokio::test]
    async fn test_start_validates_input() {
        let (agent, _listener) = agent_with(Arc::new(SyntheticCamera::default()));
        let (_tx, rx) = mpsc::channel(4);
        assert_eq!(agent.start("  ", "alice", rx), Err(AgentError::EmptyTestId));
        let (_tx, rx) = mpsc::channel(4);
        assert_eq!(agent.start("t1", "", rx), Err(AgentError::EmptyStudentName));
        assert_eq!(agent.state(), SessionState::NotStarted);
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let (agent, _listener) = agent_with(Arc::new(SyntheticCamera::default()));
        let (_tx, rx) = mpsc::channel(4);
        agent.start("t1", "alice", rx).unwrap();

        let (_tx2, rx2) = mpsc::channel(4);
        assert_eq!(
            agent.start("t1", "alice", rx2),
            Err(AgentError::AlreadyStarted(SessionState::Active))
        );
        assert_eq!(agent.wait_for_status().await, ProctoringStatus::Enabled);
    }

    #[tokio::test]
    async fn test_missing_camera_disables_proctoring() {
        let (agent, _listener) = agent_with(Arc::new(UnavailableCamera));
        let (_tx, rx) = mpsc::channel(4);
        agent.start("t1", "alice", rx).unwrap();

        assert!(matches!(
            agent.wait_for_status().await,
            ProctoringStatus::Disabled(DisabledReason::MediaAccess(_))
        ));
        assert_eq!(agent.state(), SessionState::Active);
        assert_eq!(agent.channel_state(), Some(ChannelState::Closed));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let (agent, _listener) = agent_with(Arc::new(SyntheticCamera::default()));
        agent.stop();
        assert_eq!(agent.state(), SessionState::Terminated);

        let (_tx, rx) = mpsc::channel(4);
        assert_eq!(
            agent.start("t1", "alice", rx),
            Err(AgentError::AlreadyStarted(SessionState::Terminated))
        );
        assert_eq!(agent.channel_state(), None);
    }
}
