//! Integration tests for the student agent lifecycle, on virtual time

use async_trait::async_trait;
use proctor_telemetry::channel::{ChannelState, MemoryConnector, MemoryListener, MemoryPeer};
use proctor_telemetry::student::{
    AgentConfig, Camera, DetectError, DetectorLoadError, DetectorLoader, DetectorOptions,
    DisabledReason, FaceMesh, LandmarkDetector, MediaAccessError, MediaStream, PageSignal,
    ProctoringStatus, SessionState, StudentProctorAgent, SyntheticDetector, VideoFrame, Visibility,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

/// Ordered record of released resources.
///
/// The channel close is noted as soon as a later step sees it, so its
/// position relative to the detector and camera steps is preserved.
#[derive(Default)]
struct TeardownLog {
    steps: Vec<&'static str>,
    channel: Option<watch::Receiver<ChannelState>>,
}

impl TeardownLog {
    fn note_channel(&mut self) {
        let closed = self
            .channel
            .as_ref()
            .is_some_and(|c| *c.borrow() == ChannelState::Closed);
        if closed && !self.steps.contains(&"channel") {
            self.steps.push("channel");
        }
    }

    fn record(&mut self, step: &'static str) {
        self.note_channel();
        self.steps.push(step);
    }
}

type Teardown = Arc<Mutex<TeardownLog>>;

struct FakeStream {
    tracks: AtomicUsize,
    teardown: Teardown,
}

impl MediaStream for FakeStream {
    fn current_frame(&self) -> Option<VideoFrame> {
        (self.active_tracks() > 0).then(|| VideoFrame::blank(2, 2))
    }

    fn active_tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    fn stop_tracks(&self) {
        if self.tracks.swap(0, Ordering::SeqCst) > 0 {
            self.teardown.lock().unwrap().record("camera");
        }
    }
}

struct FakeCamera {
    stream: Arc<FakeStream>,
    error: Option<MediaAccessError>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Camera for FakeCamera {
    async fn acquire(&self) -> Result<Arc<dyn MediaStream>, MediaAccessError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.stream.clone()),
        }
    }
}

/// Detector whose results are fed by the test, one per call.
struct ScriptedDetector {
    results: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<FaceMesh>>>,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    closed: AtomicBool,
    teardown: Teardown,
}

#[async_trait]
impl LandmarkDetector for ScriptedDetector {
    async fn detect(&self, _frame: &VideoFrame) -> Result<Vec<FaceMesh>, DetectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let faces = self.results.lock().await.recv().await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        faces.ok_or(DetectError::Closed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.teardown.lock().unwrap().record("detector");
        }
    }
}

struct ScriptedLoader {
    detector: Arc<ScriptedDetector>,
    error: Option<DetectorLoadError>,
    loads: AtomicUsize,
}

#[async_trait]
impl DetectorLoader for ScriptedLoader {
    async fn load(
        &self,
        _options: &DetectorOptions,
    ) -> Result<Arc<dyn LandmarkDetector>, DetectorLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.detector.clone()),
        }
    }
}

#[derive(Default)]
struct Options {
    camera_error: Option<MediaAccessError>,
    load_error: Option<DetectorLoadError>,
    camera_gate: Option<Arc<Notify>>,
    sample_interval: Option<Duration>,
}

struct Harness {
    agent: StudentProctorAgent,
    listener: MemoryListener,
    signals: mpsc::Sender<PageSignal>,
    signals_rx: Option<mpsc::Receiver<PageSignal>>,
    stream: Arc<FakeStream>,
    detector: Arc<ScriptedDetector>,
    loader: Arc<ScriptedLoader>,
    results: mpsc::UnboundedSender<Vec<FaceMesh>>,
    teardown: Teardown,
}

impl Harness {
    fn new(options: Options) -> Self {
        let teardown: Teardown = Arc::default();
        let stream = Arc::new(FakeStream {
            tracks: AtomicUsize::new(2),
            teardown: teardown.clone(),
        });
        let (results, results_rx) = mpsc::unbounded_channel();
        let detector = Arc::new(ScriptedDetector {
            results: tokio::sync::Mutex::new(results_rx),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            teardown: teardown.clone(),
        });
        let loader = Arc::new(ScriptedLoader {
            detector: detector.clone(),
            error: options.load_error,
            loads: AtomicUsize::new(0),
        });
        let camera = Arc::new(FakeCamera {
            stream: stream.clone(),
            error: options.camera_error,
            gate: options.camera_gate,
        });
        let (connector, listener) = MemoryConnector::new();
        let mut config = AgentConfig::default();
        if let Some(interval) = options.sample_interval {
            config.sample_interval = interval;
        }
        let agent = StudentProctorAgent::new(
            config,
            Arc::new(connector),
            camera,
            loader.clone(),
        );
        let (signals, signals_rx) = mpsc::channel(16);

        Self {
            agent,
            listener,
            signals,
            signals_rx: Some(signals_rx),
            stream,
            detector,
            loader,
            results,
            teardown,
        }
    }

    /// Start the agent as alice on t1 and accept its connection.
    async fn start(&mut self) -> MemoryPeer {
        let signals = self.signals_rx.take().unwrap();
        self.agent.start("t1", "alice", signals).unwrap();
        self.listener.accept().await.unwrap()
    }

    async fn signal(&self, signal: PageSignal) {
        self.signals.send(signal).await.unwrap();
    }
}

fn face_frames(frames: &[String]) -> Vec<serde_json::Value> {
    frames
        .iter()
        .map(|f| serde_json::from_str::<serde_json::Value>(f).unwrap())
        .filter(|v| v["event_type"] == "face")
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_face_event_per_tick() {
    let mut h = Harness::new(Options::default());
    let mut peer = h.start().await;
    assert_eq!(h.agent.wait_for_status().await, ProctoringStatus::Enabled);

    h.results.send(vec![SyntheticDetector::centred_face()]).unwrap();
    tokio::time::sleep(Duration::from_millis(1990)).await;
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let frame = peer.next_frame().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["event_type"], "face");
    assert_eq!(value["landmarks"][0]["left_eye"], serde_json::json!([0.42, 0.45]));
    assert_eq!(value["landmarks"][0]["nose_tip"], serde_json::json!([0.5, 0.46]));
    assert_eq!(h.agent.telemetry().stats().face_events, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_faces_sends_nothing() {
    let mut h = Harness::new(Options::default());
    let mut peer = h.start().await;
    h.agent.wait_for_status().await;

    h.results.send(vec![]).unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);
    assert!(peer.drain().is_empty());
    assert_eq!(h.agent.channel_stats().unwrap().frames_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_faces_capped_and_incomplete_meshes_dropped() {
    let mut h = Harness::new(Options::default());
    let mut peer = h.start().await;
    h.agent.wait_for_status().await;

    let face = SyntheticDetector::centred_face();
    h.results
        .send(vec![FaceMesh::default(), face.clone(), face.clone()])
        .unwrap();
    h.results.send(vec![face.clone(), face.clone(), face]).unwrap();
    tokio::time::sleep(Duration::from_millis(4100)).await;

    let faces = face_frames(&peer.drain());
    assert_eq!(faces.len(), 2);
    // First face of the first tick is incomplete, the third is beyond the cap.
    assert_eq!(faces[0]["landmarks"].as_array().unwrap().len(), 1);
    assert_eq!(faces[1]["landmarks"].as_array().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_detection_in_flight() {
    let mut h = Harness::new(Options::default());
    let mut peer = h.start().await;
    h.agent.wait_for_status().await;

    // Ticks at 2s, 4s, 6s and 8s; the first detection never finishes.
    tokio::time::sleep(Duration::from_millis(8100)).await;
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.agent.telemetry().stats().detections_skipped, 3);

    h.results.send(vec![SyntheticDetector::centred_face()]).unwrap();
    settle().await;
    assert_eq!(face_frames(&peer.drain()).len(), 1);

    h.results.send(vec![]).unwrap();
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.detector.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_detection_is_silent() {
    let mut h = Harness::new(Options::default());
    let mut peer = h.start().await;
    h.agent.wait_for_status().await;

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(h.detector.running.load(Ordering::SeqCst), 1);

    h.agent.stop();
    assert_eq!(h.agent.state(), SessionState::Terminated);
    assert_eq!(h.stream.active_tracks(), 0);
    assert!(!h.agent.sampler_active());
    assert_eq!(h.agent.channel_state(), Some(ChannelState::Closed));

    h.results.send(vec![SyntheticDetector::centred_face()]).unwrap();
    settle().await;
    assert_eq!(h.detector.running.load(Ordering::SeqCst), 0);
    assert_eq!(h.agent.telemetry().stats().detections_ignored, 1);
    assert!(face_frames(&peer.drain()).is_empty());
    assert!(peer.next_frame().await.is_none());

    tokio::time::sleep(Duration::from_millis(10_000)).await;
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_order_and_idempotence() {
    let mut h = Harness::new(Options::default());
    let _peer = h.start().await;
    h.agent.wait_for_status().await;
    assert!(h.agent.sampler_active());
    h.teardown.lock().unwrap().channel = h.agent.channel_changes();

    h.agent.stop();
    assert!(!h.agent.sampler_active());
    h.agent.stop();
    h.teardown.lock().unwrap().note_channel();

    assert_eq!(
        h.teardown.lock().unwrap().steps,
        vec!["detector", "channel", "camera"]
    );
    assert!(h.detector.closed.load(Ordering::SeqCst));
    assert_eq!(h.agent.channel_state(), Some(ChannelState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_zero_sample_interval_still_samples() {
    let mut h = Harness::new(Options {
        sample_interval: Some(Duration::ZERO),
        ..Options::default()
    });
    let mut peer = h.start().await;
    assert_eq!(h.agent.wait_for_status().await, ProctoringStatus::Enabled);

    h.results.send(vec![SyntheticDetector::centred_face()]).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(h.agent.sampler_active());
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(face_frames(&peer.drain()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_everything() {
    let mut h = Harness::new(Options::default());
    let mut peer = h.start().await;
    h.agent.wait_for_status().await;

    let Harness {
        agent,
        stream,
        detector,
        ..
    } = h;
    drop(agent);

    assert_eq!(stream.active_tracks(), 0);
    assert!(detector.closed.load(Ordering::SeqCst));
    assert!(peer.next_frame().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_camera_denied_disables_proctoring() {
    let mut h = Harness::new(Options {
        camera_error: Some(MediaAccessError::PermissionDenied),
        ..Options::default()
    });
    let mut peer = h.start().await;

    assert_eq!(
        h.agent.wait_for_status().await,
        ProctoringStatus::Disabled(DisabledReason::MediaAccess(
            MediaAccessError::PermissionDenied
        ))
    );
    assert_eq!(h.agent.state(), SessionState::Active);
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 0);
    assert_eq!(h.agent.channel_state(), Some(ChannelState::Closed));
    assert!(peer.next_frame().await.is_none());

    // Page signals go nowhere and nothing breaks.
    let _ = h.signals.try_send(PageSignal::Visibility(Visibility::Hidden));
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(h.agent.telemetry().stats().tab_switches, 0);

    h.agent.stop();
    assert_eq!(h.agent.state(), SessionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_detector_load_failure_releases_camera() {
    let mut h = Harness::new(Options {
        load_error: Some(DetectorLoadError::Load("model missing".into())),
        ..Options::default()
    });
    let _peer = h.start().await;

    assert!(matches!(
        h.agent.wait_for_status().await,
        ProctoringStatus::Disabled(DisabledReason::DetectorLoad(_))
    ));
    assert_eq!(h.stream.active_tracks(), 0);
    assert_eq!(h.agent.state(), SessionState::Active);
    assert!(!h.agent.sampler_active());
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_camera_pending() {
    let gate = Arc::new(Notify::new());
    let mut h = Harness::new(Options {
        camera_gate: Some(gate.clone()),
        ..Options::default()
    });
    let _peer = h.start().await;
    assert_eq!(h.agent.proctoring_status(), ProctoringStatus::Pending);

    h.agent.stop();
    gate.notify_one();
    settle().await;

    // The late stream is released and nothing else is set up.
    assert_eq!(h.stream.active_tracks(), 0);
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 0);
    assert_eq!(h.agent.proctoring_status(), ProctoringStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_page_signals_fire_once_per_edge() {
    let mut h = Harness::new(Options::default());
    let mut peer = h.start().await;
    h.agent.wait_for_status().await;
    settle().await;

    let hidden = PageSignal::Visibility(Visibility::Hidden);
    let visible = PageSignal::Visibility(Visibility::Visible);
    for signal in [hidden, hidden, visible, hidden, PageSignal::Blur, PageSignal::Blur] {
        h.signal(signal).await;
    }

    assert_eq!(peer.next_frame().await.unwrap(), r#"{"event_type":"tab_switch"}"#);
    assert_eq!(peer.next_frame().await.unwrap(), r#"{"event_type":"tab_switch"}"#);
    assert_eq!(peer.next_frame().await.unwrap(), r#"{"event_type":"window_blur"}"#);
    settle().await;
    assert!(peer.drain().is_empty());

    let stats = h.agent.telemetry().stats();
    assert_eq!(stats.tab_switches, 2);
    assert_eq!(stats.window_blurs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_page_events_before_enabled() {
    let gate = Arc::new(Notify::new());
    let mut h = Harness::new(Options {
        camera_gate: Some(gate.clone()),
        ..Options::default()
    });
    let mut peer = h.start().await;

    h.signal(PageSignal::Visibility(Visibility::Hidden)).await;
    h.signal(PageSignal::Blur).await;
    settle().await;
    assert!(peer.drain().is_empty());

    gate.notify_one();
    assert_eq!(h.agent.wait_for_status().await, ProctoringStatus::Enabled);
    settle().await;
    assert!(peer.drain().is_empty());

    // Still hidden, so the next edge needs a visible first.
    h.signal(PageSignal::Visibility(Visibility::Hidden)).await;
    h.signal(PageSignal::Visibility(Visibility::Visible)).await;
    h.signal(PageSignal::Visibility(Visibility::Hidden)).await;
    assert_eq!(peer.next_frame().await.unwrap(), r#"{"event_type":"tab_switch"}"#);
    settle().await;
    assert!(peer.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_high_suspicion_notice_raises_warning() {
    let mut h = Harness::new(Options::default());
    let peer = h.start().await;
    h.agent.wait_for_status().await;
    assert!(!h.agent.warning_active());

    peer.push(r#"{"suspicion_level":"high","status":"flagged"}"#);
    settle().await;
    assert!(h.agent.warning_active());

    peer.push("{{not json");
    peer.push(r#"{"suspicion_level":"low"}"#);
    settle().await;
    assert!(!h.agent.warning_active());
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected() {
    let mut h = Harness::new(Options::default());
    let _peer = h.start().await;

    let (_tx, rx) = mpsc::channel(1);
    assert!(h.agent.start("t1", "alice", rx).is_err());
    assert_eq!(h.agent.wait_for_status().await, ProctoringStatus::Enabled);
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 1);
}
