use core::fmt;

use crate::constants::{BULK_IN_ADDRESS, BULK_OUT_ADDRESS, INTERRUPT_IN_ADDRESS};

/// The three pipes of the UDEFX2 interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Outgoing missions.
    BulkOut,
    /// Incoming mission responses.
    BulkIn,
    /// 4-byte completion notifications.
    Interrupt,
}

impl Endpoint {
    /// USB endpoint address (direction bit included).
    pub const fn address(self) -> u8 {
        match self {
            Endpoint::BulkOut => BULK_OUT_ADDRESS,
            Endpoint::BulkIn => BULK_IN_ADDRESS,
            Endpoint::Interrupt => INTERRUPT_IN_ADDRESS,
        }
    }

    /// Device-to-host.
    pub const fn is_in(self) -> bool {
        self.address() & 0x80 != 0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Endpoint::BulkOut => "bulk-out",
            Endpoint::BulkIn => "bulk-in",
            Endpoint::Interrupt => "interrupt-in",
        };
        write!(f, "{name}(0x{:02x})", self.address())
    }
}
