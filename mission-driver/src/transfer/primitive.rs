//! One asynchronous read or write against one endpoint.
//!
//! The primitive is split in three views over the same shared slot:
//!
//! * [`Transfer`]: built by the pipeline, consumed by [`Transfer::start`].
//! * [`TransferHandle`]: kept by the pipeline to request cancellation.
//! * [`PendingTransfer`]: handed to the [`UsbTarget`], which completes it.
//!
//! Completion is delivered exactly once. Whichever of `complete` or the
//! cancel path gets to the slot first wins; later calls are dropped here so
//! that neither the target nor the pipeline needs to deduplicate.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use shared::Endpoint;

use crate::error::TransferError;
use crate::transfer::UsbTarget;

static NEXT_TRANSFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique transfer identifier, used in logs and for stale-completion
/// checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    fn next() -> Self {
        TransferId(NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// What the transfer carries to or from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferBuffer {
    /// Host-to-device bytes.
    Write(Vec<u8>),
    /// Device-to-host read of at most `capacity` bytes.
    Read { capacity: usize },
}

impl TransferBuffer {
    pub fn len(&self) -> usize {
        match self {
            TransferBuffer::Write(data) => data.len(),
            TransferBuffer::Read { capacity } => *capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Successful completion. `data` is empty for writes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub bytes_transferred: usize,
    pub data: Vec<u8>,
}

impl Completion {
    pub fn written(bytes: usize) -> Self {
        Completion { bytes_transferred: bytes, data: Vec::new() }
    }

    pub fn read(data: Vec<u8>) -> Self {
        Completion { bytes_transferred: data.len(), data }
    }
}

pub type TransferResult = Result<Completion, TransferError>;

/// Delivered to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub id: TransferId,
    pub endpoint: Endpoint,
    pub result: TransferResult,
}

type CompletionFn = Box<dyn FnOnce(TransferOutcome) + Send>;
type CancelFn = Box<dyn FnOnce() + Send>;

struct Slot {
    buffer: Option<TransferBuffer>,
    on_complete: Option<CompletionFn>,
    cancel_routine: Option<CancelFn>,
    cancel_requested: bool,
}

struct Inner {
    id: TransferId,
    endpoint: Endpoint,
    slot: Mutex<Slot>,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, result: TransferResult) -> bool {
        let callback = {
            let mut slot = self.slot();
            slot.cancel_routine = None;
            slot.on_complete.take()
        };
        match callback {
            Some(cb) => {
                log::trace!("{} on {} completed", self.id, self.endpoint);
                cb(TransferOutcome { id: self.id, endpoint: self.endpoint, result });
                true
            }
            None => {
                log::debug!("{} on {}: duplicate completion dropped", self.id, self.endpoint);
                false
            }
        }
    }
}

/// A transfer that has not been handed to a target yet.
pub struct Transfer {
    inner: Arc<Inner>,
}

impl Transfer {
    pub fn new<F>(endpoint: Endpoint, buffer: TransferBuffer, on_complete: F) -> Self
    where
        F: FnOnce(TransferOutcome) + Send + 'static,
    {
        debug_assert_eq!(
            endpoint.is_in(),
            matches!(buffer, TransferBuffer::Read { .. }),
            "{endpoint} given a buffer of the wrong direction"
        );
        let inner = Inner {
            id: TransferId::next(),
            endpoint,
            slot: Mutex::new(Slot {
                buffer: Some(buffer),
                on_complete: Some(Box::new(on_complete)),
                cancel_routine: None,
                cancel_requested: false,
            }),
        };
        Transfer { inner: Arc::new(inner) }
    }

    /// Build, start, and return the cancellation handle in one step.
    pub fn submit<F>(
        target: &dyn UsbTarget,
        endpoint: Endpoint,
        buffer: TransferBuffer,
        on_complete: F,
    ) -> TransferHandle
    where
        F: FnOnce(TransferOutcome) + Send + 'static,
    {
        let transfer = Transfer::new(endpoint, buffer, on_complete);
        let handle = transfer.handle();
        transfer.start(target);
        handle
    }

    pub fn id(&self) -> TransferId {
        self.inner.id
    }

    pub fn handle(&self) -> TransferHandle {
        TransferHandle { inner: Arc::clone(&self.inner) }
    }

    /// Hand the transfer to `target`. A transfer cancelled before this point
    /// completes as [`TransferError::Cancelled`] and never reaches the target.
    pub fn start(self, target: &dyn UsbTarget) {
        let cancelled = self.inner.slot().cancel_requested;
        if cancelled {
            log::debug!("{} cancelled before submission", self.inner.id);
            self.inner.complete(Err(TransferError::Cancelled));
            return;
        }
        target.submit(PendingTransfer { inner: self.inner });
    }
}

/// Cancellation handle held by the issuer.
#[derive(Clone)]
pub struct TransferHandle {
    inner: Arc<Inner>,
}

impl TransferHandle {
    pub fn id(&self) -> TransferId {
        self.inner.id
    }

    pub fn endpoint(&self) -> Endpoint {
        self.inner.endpoint
    }

    pub fn is_complete(&self) -> bool {
        self.inner.slot().on_complete.is_none()
    }

    /// Request cancellation. Completion still arrives through the callback;
    /// this never completes the transfer synchronously by itself unless the
    /// target's cancel routine does.
    pub fn cancel(&self) {
        let routine = {
            let mut slot = self.inner.slot();
            if slot.on_complete.is_none() || slot.cancel_requested {
                return;
            }
            slot.cancel_requested = true;
            slot.cancel_routine.take()
        };
        log::debug!("{} on {}: cancel requested", self.inner.id, self.inner.endpoint);
        if let Some(routine) = routine {
            routine();
        }
    }
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .finish()
    }
}

/// The target's view of a submitted transfer.
#[derive(Clone)]
pub struct PendingTransfer {
    inner: Arc<Inner>,
}

impl PendingTransfer {
    pub fn id(&self) -> TransferId {
        self.inner.id
    }

    pub fn endpoint(&self) -> Endpoint {
        self.inner.endpoint
    }

    /// Take the buffer description. Returns `None` on the second call.
    pub fn take_buffer(&self) -> Option<TransferBuffer> {
        self.inner.slot().buffer.take()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.slot().cancel_requested
    }

    /// `true` once a result has been delivered, by this view or the cancel path.
    pub fn is_complete(&self) -> bool {
        self.inner.slot().on_complete.is_none()
    }

    /// Register the routine that aborts this transfer. If cancellation was
    /// already requested the routine runs immediately on this thread.
    pub fn set_cancel_routine<F>(&self, routine: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut slot = self.inner.slot();
            if slot.on_complete.is_none() {
                return;
            }
            if !slot.cancel_requested {
                slot.cancel_routine = Some(Box::new(routine));
                return;
            }
        }
        routine();
    }

    /// Deliver the result. Returns `false` if the transfer had already
    /// completed and this result was discarded.
    pub fn complete(&self, result: TransferResult) -> bool {
        self.inner.complete(result)
    }
}

impl fmt::Debug for PendingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransfer")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .finish()
    }
}
