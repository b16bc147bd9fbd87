//! Per-attempt session lifecycle.
//!
//! `NotStarted → Active → Terminated`, one instance per exam attempt. Every
//! asynchronous continuation holds a clone and checks [`is_active`] before
//! touching shared state or sending.
//!
//! [`is_active`]: SessionLifecycle::is_active

use super::camera::MediaAccessError;
use super::detector::DetectorLoadError;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Active,
    Terminated,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::NotStarted,
            1 => SessionState::Active,
            _ => SessionState::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::NotStarted => 0,
            SessionState::Active => 1,
            SessionState::Terminated => 2,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "not started"),
            SessionState::Active => write!(f, "active"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Shared lifecycle flag of one exam attempt.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    state: Arc<AtomicU8>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(SessionState::NotStarted.as_u8())),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Enter `Active`. Succeeds exactly once, and only from `NotStarted`.
    pub fn activate(&self) -> Result<(), SessionState> {
        self.state
            .compare_exchange(
                SessionState::NotStarted.as_u8(),
                SessionState::Active.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(SessionState::from_u8)
    }

    /// Enter `Terminated`, returning the previous state.
    pub fn terminate(&self) -> SessionState {
        SessionState::from_u8(
            self.state
                .swap(SessionState::Terminated.as_u8(), Ordering::SeqCst),
        )
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the proctoring feature is running for the current attempt.
///
/// Independent of [`SessionState`]: an attempt stays `Active` with
/// proctoring `Disabled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProctoringStatus {
    /// Camera and detector setup still in progress.
    Pending,
    /// Sampling and page watchers are running.
    Enabled,
    /// Proctoring is off for this attempt; the exam continues.
    Disabled(DisabledReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    MediaAccess(MediaAccessError),
    DetectorLoad(DetectorLoadError),
}

impl std::fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisabledReason::MediaAccess(e) => write!(f, "{e}"),
            DisabledReason::DetectorLoad(e) => write!(f, "{e}"),
        }
    }
}
