//! Page visibility and focus signals.
//!
//! The host reports raw visibility and focus changes; [`PageSignalTracker`]
//! turns them into at most one event per edge.

use crate::protocol::ProctorEvent;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// A raw signal from the page hosting the exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    Visibility(Visibility),
    Focus,
    Blur,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown page signal: {0}")]
pub struct UnknownSignal(pub String);

impl FromStr for PageSignal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hidden" => Ok(PageSignal::Visibility(Visibility::Hidden)),
            "visible" => Ok(PageSignal::Visibility(Visibility::Visible)),
            "blur" => Ok(PageSignal::Blur),
            "focus" => Ok(PageSignal::Focus),
            other => Err(UnknownSignal(other.to_string())),
        }
    }
}

/// Edge detector over page signals. Starts visible and focused.
#[derive(Debug, Clone)]
pub struct PageSignalTracker {
    visible: bool,
    focused: bool,
}

impl PageSignalTracker {
    pub fn new() -> Self {
        Self {
            visible: true,
            focused: true,
        }
    }

    /// Feed one signal; returns the event for a hide or blur edge.
    pub fn observe(&mut self, signal: PageSignal) -> Option<ProctorEvent> {
        match signal {
            PageSignal::Visibility(Visibility::Hidden) => {
                let edge = self.visible;
                self.visible = false;
                edge.then_some(ProctorEvent::TabSwitch)
            }
            PageSignal::Visibility(Visibility::Visible) => {
                self.visible = true;
                None
            }
            PageSignal::Blur => {
                let edge = self.focused;
                self.focused = false;
                edge.then_some(ProctorEvent::WindowBlur)
            }
            PageSignal::Focus => {
                self.focused = true;
                None
            }
        }
    }
}

impl Default for PageSignalTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signals() {
        assert_eq!(
            "hidden".parse::<PageSignal>().unwrap(),
            PageSignal::Visibility(Visibility::Hidden)
        );
        assert_eq!(" Blur\n".parse::<PageSignal>().unwrap(), PageSignal::Blur);
        let err = "submit".parse::<PageSignal>().unwrap_err();
        assert_eq!(err.to_string(), "unknown page signal: submit");
    }

    #[test]
    fn test_hidden_fires_once_per_edge() {
        let mut tracker = PageSignalTracker::new();
        let hidden = PageSignal::Visibility(Visibility::Hidden);

        assert_eq!(tracker.observe(hidden), Some(ProctorEvent::TabSwitch));
        assert_eq!(tracker.observe(hidden), None);
        assert_eq!(tracker.observe(PageSignal::Visibility(Visibility::Visible)), None);
        assert_eq!(tracker.observe(hidden), Some(ProctorEvent::TabSwitch));
    }

    #[test]
    fn test_blur_and_visibility_are_independent() {
        let mut tracker = PageSignalTracker::new();

        assert_eq!(tracker.observe(PageSignal::Blur), Some(ProctorEvent::WindowBlur));
        assert_eq!(
            tracker.observe(PageSignal::Visibility(Visibility::Hidden)),
            Some(ProctorEvent::TabSwitch)
        );
        assert_eq!(tracker.observe(PageSignal::Blur), None);
        assert_eq!(tracker.observe(PageSignal::Focus), None);
        assert_eq!(tracker.observe(PageSignal::Blur), Some(ProctorEvent::WindowBlur));
    }
}
