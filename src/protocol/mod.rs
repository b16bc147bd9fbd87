//! Shared protocol types for student and teacher endpoints.

pub mod address;
pub mod types;

pub use address::{encode_component, ChannelAddress, ServerEndpoint, DEFAULT_SERVER_URL};
pub use types::{
    FaceLandmarkSample, NormalizedPoint, ProctorEvent, StudentNotice, StudentProctorSnapshot,
    SuspicionLevel,
};
