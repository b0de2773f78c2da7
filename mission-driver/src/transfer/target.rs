//! Host I/O seam
//! =============
//! A [`UsbTarget`] is whatever actually moves bytes: the framework's pipe
//! objects in a kernel build, a user-mode USB stack, or one of the devices in
//! [`crate::sim`]. The pipeline only ever talks to this trait.

use crate::error::TransferError;
use crate::transfer::PendingTransfer;

pub trait UsbTarget: Send + Sync + 'static {
    /// Queue one transfer. Must not block.
    ///
    /// The target owns the transfer from here on and must call
    /// [`PendingTransfer::complete`] exactly once, possibly before `submit`
    /// returns. Targets that can abort in-progress I/O should register a
    /// routine with [`PendingTransfer::set_cancel_routine`].
    fn submit(&self, transfer: PendingTransfer);

    /// Mark the device interface as restricted. Only called when the host
    /// reported support for device interface property data.
    fn set_interface_restricted(&self, _restricted: bool) -> Result<(), TransferError> {
        Ok(())
    }
}
