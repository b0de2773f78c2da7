//! Interrupt watch: keeps exactly one 4-byte read armed on the interrupt-in
//! endpoint while the session is active and reports what each read carried.

use shared::Notification;
use shared::constants::NOTIFICATION_LEN;

use crate::error::TransferError;
use crate::pipeline::effects::Effects;
use crate::pipeline::session::Ctx;
use crate::transfer::{TransferHandle, TransferOutcome};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WatchEvent {
    Notification(Notification),
    /// Completed with fewer than four bytes.
    Undecodable(usize),
    /// The read ended because the watch was stopped.
    Stopped,
    /// The pipe failed; no further reads until restarted.
    Lost(TransferError),
    /// Completion of a read this watch no longer tracks.
    Stale,
}

#[derive(Default)]
pub(crate) struct InterruptWatch {
    running: bool,
    current: Option<TransferHandle>,
    lost: Option<TransferError>,
}

impl InterruptWatch {
    pub(crate) fn start(&mut self, cx: &Ctx<'_>, fx: &mut Effects) {
        self.lost = None;
        self.running = true;
        self.arm(cx, fx);
    }

    /// Issue a read unless one is outstanding.
    pub(crate) fn arm(&mut self, cx: &Ctx<'_>, fx: &mut Effects) {
        if !self.running || self.current.is_some() || self.lost.is_some() {
            return;
        }
        let transfer = cx.interrupt_read(NOTIFICATION_LEN);
        log::trace!("interrupt read {} armed", transfer.id());
        self.current = Some(transfer.handle());
        fx.start(transfer);
    }

    pub(crate) fn stop(&mut self, fx: &mut Effects) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(h) = &self.current {
            fx.cancel(h.clone());
        }
    }

    pub(crate) fn on_complete(&mut self, outcome: TransferOutcome) -> WatchEvent {
        if self.current.as_ref().map(|h| h.id()) != Some(outcome.id) {
            return WatchEvent::Stale;
        }
        self.current = None;

        match outcome.result {
            Ok(c) => match Notification::decode(&c.data) {
                Ok(n) => WatchEvent::Notification(n),
                Err(_) => WatchEvent::Undecodable(c.data.len()),
            },
            Err(_) if !self.running => WatchEvent::Stopped,
            Err(reason) => {
                self.running = false;
                self.lost = Some(reason.clone());
                WatchEvent::Lost(reason)
            }
        }
    }

    /// Forget a previous loss. The watch stays stopped until started.
    pub(crate) fn reset(&mut self) {
        self.lost = None;
    }

    pub(crate) fn lost(&self) -> Option<&TransferError> {
        self.lost.as_ref()
    }

    /// No read outstanding.
    pub(crate) fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.current.is_some()
    }
}
