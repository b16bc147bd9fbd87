//! Channel addressing.
//!
//! Student endpoints live at `proctor/{testId}/{studentName}`, teacher
//! endpoints at `teacher/{testId}`, both under the backend's `/ws` prefix.

use serde::{Deserialize, Serialize};

/// Default backend used when nothing is configured.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8001";

/// Logical endpoint a [`ProctorChannel`](crate::channel::ProctorChannel) binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelAddress {
    /// Duplex endpoint of one student agent.
    Student {
        test_id: String,
        student_name: String,
    },
    /// Dashboard endpoint for one monitored test.
    Teacher { test_id: String },
}

impl ChannelAddress {
    pub fn student(test_id: impl Into<String>, student_name: impl Into<String>) -> Self {
        ChannelAddress::Student {
            test_id: test_id.into(),
            student_name: student_name.into(),
        }
    }

    pub fn teacher(test_id: impl Into<String>) -> Self {
        ChannelAddress::Teacher {
            test_id: test_id.into(),
        }
    }

    pub fn test_id(&self) -> &str {
        match self {
            ChannelAddress::Student { test_id, .. } | ChannelAddress::Teacher { test_id } => {
                test_id
            }
        }
    }

    /// Relative path with each segment percent-encoded.
    pub fn path(&self) -> String {
        match self {
            ChannelAddress::Student {
                test_id,
                student_name,
            } => format!(
                "proctor/{}/{}",
                encode_component(test_id),
                encode_component(student_name)
            ),
            ChannelAddress::Teacher { test_id } => {
                format!("teacher/{}", encode_component(test_id))
            }
        }
    }

    /// Full WebSocket URL of this address on `endpoint`.
    pub fn url(&self, endpoint: &ServerEndpoint) -> String {
        format!("{}/ws/{}", endpoint.ws_base(), self.path())
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Base URL of the evaluator backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    base_url: String,
}

impl ServerEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// The base URL with its scheme mapped to the WebSocket equivalent.
    ///
    /// `http` becomes `ws`, `https` becomes `wss`; `ws`/`wss` pass through and
    /// a bare host gets `ws://`. Trailing slashes are removed.
    pub fn ws_base(&self) -> String {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_string()
        } else {
            format!("ws://{trimmed}")
        }
    }
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

/// Percent-encode a path segment, leaving the same characters untouched as
/// `encodeURIComponent`.
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
