//! Interrupt endpoint decoding
//! ===========================
//! The device pushes a little-endian `u32` on every interrupt transfer.
//! Only [`NOTIFY_MISSION_READY`] moves the mission handshake forward;
//! every other value (the `0x11` pending pulse included) is inert so that
//! firmware can add status codes without breaking older drivers.

use thiserror::Error;

use crate::constants::{NOTIFICATION_LEN, NOTIFY_MISSION_PENDING, NOTIFY_MISSION_READY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The mission response is waiting on bulk-in.
    Ready,
    /// Anything else; carries the raw value for logging.
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("notification needs 4 bytes, got {0}")]
    Truncated(usize),
}

impl Notification {
    /// Decode the first four bytes of an interrupt read. Trailing bytes are
    /// ignored; shorter reads cannot be classified.
    pub fn decode(buf: &[u8]) -> Result<Self, NotificationError> {
        let raw: [u8; NOTIFICATION_LEN] = buf
            .get(..NOTIFICATION_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(NotificationError::Truncated(buf.len()))?;
        Ok(Self::from_raw(u32::from_le_bytes(raw)))
    }

    pub const fn from_raw(value: u32) -> Self {
        match value {
            NOTIFY_MISSION_READY => Notification::Ready,
            other => Notification::Other(other),
        }
    }

    pub const fn raw(self) -> u32 {
        match self {
            Notification::Ready => NOTIFY_MISSION_READY,
            Notification::Other(v) => v,
        }
    }

    pub const fn is_ready(self) -> bool {
        matches!(self, Notification::Ready)
    }

    /// `true` for the documented "still working" pulse.
    pub const fn is_pending_pulse(self) -> bool {
        matches!(self, Notification::Other(NOTIFY_MISSION_PENDING))
    }

    /// Wire encoding, used by emulated devices.
    pub const fn to_bytes(self) -> [u8; NOTIFICATION_LEN] {
        self.raw().to_le_bytes()
    }
}
