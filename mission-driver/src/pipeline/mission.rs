use std::fmt;

use crate::error::MissionError;

/// Per-session mission sequence number, assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MissionId(pub(crate) u64);

impl MissionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Outbound mission. The payload is opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionRequest {
    pub payload: Vec<u8>,
    /// When set, a response of any other length fails the mission with a
    /// short-transfer error instead of being delivered. Must lie within
    /// `1..=max_transfer_size`.
    pub exact_response_len: Option<usize>,
}

impl MissionRequest {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        MissionRequest { payload: payload.into(), exact_response_len: None }
    }

    pub fn with_exact_response_len(mut self, len: usize) -> Self {
        self.exact_response_len = Some(len);
        self
    }
}

impl From<Vec<u8>> for MissionRequest {
    fn from(payload: Vec<u8>) -> Self {
        MissionRequest::new(payload)
    }
}

/// What the device returned on bulk-in for one mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionResponse {
    pub mission: MissionId,
    pub data: Vec<u8>,
}

pub type MissionResult = Result<MissionResponse, MissionError>;
