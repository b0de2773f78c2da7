use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use shared::{Endpoint, Notification};

use crate::error::TransferError;
use crate::transfer::{Completion, PendingTransfer, TransferBuffer, TransferResult, UsbTarget};

/// A target that never completes anything by itself.
///
/// Submitted transfers wait per endpoint in FIFO order until completed
/// through one of the helper methods. Cancellation completes the transfer
/// as [`TransferError::Cancelled`] at once, the way a host stack's cancel
/// routine would, unless built with [`ScriptedTarget::ignoring_cancel`].
#[derive(Default)]
pub struct ScriptedTarget {
    script: Mutex<Script>,
    ignore_cancel: bool,
}

#[derive(Default)]
struct Script {
    parked: HashMap<Endpoint, VecDeque<(PendingTransfer, TransferBuffer)>>,
    submitted: HashMap<Endpoint, usize>,
    written: Vec<Vec<u8>>,
    restricted: Option<bool>,
    restrict_error: Option<TransferError>,
}

impl ScriptedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// A target without cancel routines: a cancelled transfer stays parked
    /// until completed by hand, like hardware that already finished it.
    pub fn ignoring_cancel() -> Self {
        ScriptedTarget { ignore_cancel: true, ..Self::default() }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transfers submitted on `endpoint` and not yet completed.
    pub fn outstanding(&self, endpoint: Endpoint) -> usize {
        self.script()
            .parked
            .get(&endpoint)
            .map_or(0, |q| q.iter().filter(|(t, _)| !t.is_complete()).count())
    }

    /// Transfers ever submitted on `endpoint`.
    pub fn submitted(&self, endpoint: Endpoint) -> usize {
        self.script().submitted.get(&endpoint).copied().unwrap_or(0)
    }

    /// Every bulk-out payload, in submission order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.script().written.clone()
    }

    /// Last value passed to `set_interface_restricted`, if any.
    pub fn interface_restricted(&self) -> Option<bool> {
        self.script().restricted
    }

    /// Make the next `set_interface_restricted` call fail.
    pub fn fail_interface_restriction(&self, err: TransferError) {
        self.script().restrict_error = Some(err);
    }

    /// Complete the oldest outstanding transfer on `endpoint`. Returns
    /// `false` if there was none.
    pub fn complete_next(&self, endpoint: Endpoint, result: TransferResult) -> bool {
        match self.take_next(endpoint) {
            Some((transfer, _)) => transfer.complete(result),
            None => false,
        }
    }

    /// Finish the oldest bulk-out write in full.
    pub fn write_ok(&self) -> bool {
        match self.take_next(Endpoint::BulkOut) {
            Some((transfer, buffer)) => transfer.complete(Ok(Completion::written(buffer.len()))),
            None => false,
        }
    }

    /// Deliver a 4-byte notification on the oldest interrupt read.
    pub fn notify(&self, code: u32) -> bool {
        let bytes = Notification::from_raw(code).to_bytes().to_vec();
        self.complete_next(Endpoint::Interrupt, Ok(Completion::read(bytes)))
    }

    /// Answer the oldest bulk-in read. Data beyond the read's capacity is
    /// cut off, as the device could not have sent it.
    pub fn respond(&self, data: &[u8]) -> bool {
        match self.take_next(Endpoint::BulkIn) {
            Some((transfer, buffer)) => {
                let n = data.len().min(buffer.len());
                transfer.complete(Ok(Completion::read(data[..n].to_vec())))
            }
            None => false,
        }
    }

    pub fn fail(&self, endpoint: Endpoint, err: TransferError) -> bool {
        self.complete_next(endpoint, Err(err))
    }

    fn take_next(&self, endpoint: Endpoint) -> Option<(PendingTransfer, TransferBuffer)> {
        let mut script = self.script();
        let queue = script.parked.get_mut(&endpoint)?;
        while let Some(entry) = queue.pop_front() {
            if !entry.0.is_complete() {
                return Some(entry);
            }
        }
        None
    }
}

impl UsbTarget for ScriptedTarget {
    fn submit(&self, transfer: PendingTransfer) {
        let endpoint = transfer.endpoint();
        let Some(buffer) = transfer.take_buffer() else {
            log::warn!("{transfer:?} submitted without a buffer");
            return;
        };
        {
            let mut script = self.script();
            *script.submitted.entry(endpoint).or_default() += 1;
            if let TransferBuffer::Write(data) = &buffer {
                script.written.push(data.clone());
            }
            script.parked.entry(endpoint).or_default().push_back((transfer.clone(), buffer));
        }

        if self.ignore_cancel {
            return;
        }
        let aborter = transfer.clone();
        transfer.set_cancel_routine(move || {
            aborter.complete(Err(TransferError::Cancelled));
        });
    }

    fn set_interface_restricted(&self, restricted: bool) -> Result<(), TransferError> {
        let mut script = self.script();
        if let Some(err) = script.restrict_error.take() {
            return Err(err);
        }
        script.restricted = Some(restricted);
        Ok(())
    }
}
