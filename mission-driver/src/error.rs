//! Error taxonomy for the mission pipeline.
//!
//! Transfer-level failures ([`TransferError`]) are produced by the host I/O
//! target and surface unchanged inside [`MissionError::TransferFailed`]; the
//! pipeline never retries on the caller's behalf.

use shared::Endpoint;
use thiserror::Error;

use crate::pipeline::SessionState;

/// Why one transfer on one endpoint did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("endpoint stalled")]
    Stall,

    #[error("pipe halted")]
    PipeHalted,

    #[error("transfer timed out")]
    Timeout,

    #[error("device removed")]
    DeviceRemoved,

    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("transfer cancelled")]
    Cancelled,
}

/// The only error type a mission caller ever sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissionError {
    #[error("device session is {state}, not active")]
    SessionNotActive { state: SessionState },

    #[error("{endpoint} transfer failed: {reason}")]
    TransferFailed {
        endpoint: Endpoint,
        #[source]
        reason: TransferError,
    },

    #[error("mission cancelled")]
    Cancelled,

    #[error("mission payload of {len} bytes exceeds the {max} byte transfer limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("mission payload is empty")]
    EmptyPayload,

    #[error("exact response length {len} outside 1..={max} bytes")]
    InvalidResponseLength { len: usize, max: usize },
}

impl MissionError {
    pub(crate) fn transfer(endpoint: Endpoint, reason: TransferError) -> Self {
        MissionError::TransferFailed { endpoint, reason }
    }

    /// `true` when the failure was caused by surprise removal, whichever
    /// stage the mission had reached.
    pub fn is_device_removed(&self) -> bool {
        matches!(
            self,
            MissionError::SessionNotActive { state: SessionState::Removed }
                | MissionError::TransferFailed { reason: TransferError::DeviceRemoved, .. }
        )
    }

    /// Short label used for metrics and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            MissionError::SessionNotActive { .. } => "session_not_active",
            MissionError::TransferFailed { .. } => "transfer_failed",
            MissionError::Cancelled => "cancelled",
            MissionError::PayloadTooLarge { .. } => "payload_too_large",
            MissionError::EmptyPayload => "empty_payload",
            MissionError::InvalidResponseLength { .. } => "invalid_response_length",
        }
    }
}
