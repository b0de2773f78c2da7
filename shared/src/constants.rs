//! Device contract constants for the UDEFX2 virtual device.

/// Size of every message pushed on the interrupt endpoint.
pub const NOTIFICATION_LEN: usize = 4;

/// Interrupt value announcing that the mission response can be read.
pub const NOTIFY_MISSION_READY: u32 = 0x10;

/// Interrupt value the device pulses while a mission is still running.
pub const NOTIFY_MISSION_PENDING: u32 = 0x11;

/// Largest bulk transfer the driver will format (64 KiB).
pub const MAX_TRANSFER_SIZE: usize = 64 * 1024;

/// Endpoint addresses as exposed by the emulated UDEFX2 interface.
pub const BULK_OUT_ADDRESS: u8 = 0x01;
pub const BULK_IN_ADDRESS: u8 = 0x81;
pub const INTERRUPT_IN_ADDRESS: u8 = 0x82;
