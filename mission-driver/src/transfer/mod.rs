//! Transfer primitive and the host I/O seam it is submitted through.

pub mod primitive;
pub mod target;

pub use primitive::{
    Completion, PendingTransfer, Transfer, TransferBuffer, TransferHandle, TransferId,
    TransferOutcome, TransferResult,
};
pub use target::UsbTarget;
