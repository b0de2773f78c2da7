//! UDEFX2 firmware emulator.
//! -----------------------------------------------------------------------------
//! Bulk-out writes complete at once and are handed to a firmware thread over a
//! crossbeam channel (standing in for the board's endpoint FIFO). For every
//! mission the firmware waits `response_delay`, sends `pending_pulses` ×
//! `0x11`, stages the response for bulk-in and then signals `0x10`.
//!
//! Interrupt and bulk-in reads are parked until the firmware has something
//! for them; notifications sent with no read outstanding wait in a small
//! queue, like a device NAKing until the host polls.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
};

use crossbeam::channel::{Receiver, Sender, unbounded};
use shared::{
    Endpoint, Notification,
    constants::{NOTIFY_MISSION_PENDING, NOTIFY_MISSION_READY},
};

use crate::config::EmulatorConfig;
use crate::error::TransferError;
use crate::transfer::{Completion, PendingTransfer, TransferBuffer, TransferResult, UsbTarget};

type Responder = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

// ============================================================================
// 0 ▸ Firmware inbox
// ============================================================================

enum DeviceEvent {
    Mission(Vec<u8>),
    Shutdown,
}

// ============================================================================
// 1 ▸ Shared board state
// ============================================================================

#[derive(Default)]
struct Board {
    interrupt_reads: VecDeque<PendingTransfer>,
    bulk_in_reads: VecDeque<(PendingTransfer, usize)>,
    notifications: VecDeque<u32>,
    /// One response buffer; an unread response is overwritten by the next.
    response: Option<Vec<u8>>,
    restricted: bool,
    removed: bool,
}

struct Firmware {
    board: Mutex<Board>,
    config: EmulatorConfig,
    responder: Responder,
}

impl Firmware {
    fn board(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, inbox: Receiver<DeviceEvent>) {
        while let Ok(DeviceEvent::Mission(payload)) = inbox.recv() {
            thread::sleep(self.config.response_delay);
            if self.board().removed {
                break;
            }
            for _ in 0..self.config.pending_pulses {
                self.notify(NOTIFY_MISSION_PENDING);
            }
            let response = (self.responder)(&payload);
            log::trace!("firmware: mission of {} bytes answered with {}", payload.len(), response.len());
            self.stage_response(response);
            self.notify(NOTIFY_MISSION_READY);
        }
        log::debug!("firmware thread exiting");
    }

    /// Parked reads may already be cancelled; such a read refuses the code,
    /// which then goes to the next read or waits for one.
    fn notify(&self, code: u32) {
        loop {
            let read = {
                let mut board = self.board();
                match board.interrupt_reads.pop_front() {
                    Some(read) => read,
                    None => {
                        board.notifications.push_back(code);
                        return;
                    }
                }
            };
            if read.complete(Ok(notification(code))) {
                return;
            }
        }
    }

    fn stage_response(&self, data: Vec<u8>) {
        loop {
            let (read, capacity) = {
                let mut board = self.board();
                match board.bulk_in_reads.pop_front() {
                    Some(entry) => entry,
                    None => {
                        board.response = Some(data);
                        return;
                    }
                }
            };
            if read.complete(Ok(truncated(data.clone(), capacity))) {
                return;
            }
        }
    }
}

fn notification(code: u32) -> Completion {
    Completion::read(Notification::from_raw(code).to_bytes().to_vec())
}

fn truncated(mut data: Vec<u8>, capacity: usize) -> Completion {
    data.truncate(capacity);
    Completion::read(data)
}

// ============================================================================
// 2 ▸ Host-facing target
// ============================================================================

/// A software UDEFX2 that answers missions by itself.
pub struct Udefx2Emulator {
    firmware: Arc<Firmware>,
    inbox: Sender<DeviceEvent>,
}

impl Udefx2Emulator {
    /// Start an emulator that echoes every mission back.
    pub fn spawn(config: EmulatorConfig) -> std::io::Result<Self> {
        Self::with_responder(config, |payload: &[u8]| payload.to_vec())
    }

    /// Start an emulator whose firmware computes responses with `responder`.
    pub fn with_responder<F>(config: EmulatorConfig, responder: F) -> std::io::Result<Self>
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        let firmware = Arc::new(Firmware {
            board: Mutex::new(Board::default()),
            config,
            responder: Box::new(responder),
        });
        let (inbox, rx) = unbounded();
        let fw = Arc::clone(&firmware);
        thread::Builder::new()
            .name("udefx2-firmware".into())
            .spawn(move || fw.run(rx))?;
        Ok(Udefx2Emulator { firmware, inbox })
    }

    /// Yank the cable: every parked read fails with `DeviceRemoved` and all
    /// later submissions fail the same way.
    pub fn surprise_remove(&self) {
        let (interrupts, bulk_ins) = {
            let mut board = self.firmware.board();
            board.removed = true;
            board.notifications.clear();
            board.response = None;
            (
                std::mem::take(&mut board.interrupt_reads),
                std::mem::take(&mut board.bulk_in_reads),
            )
        };
        let _ = self.inbox.send(DeviceEvent::Shutdown);
        for read in interrupts.into_iter().chain(bulk_ins.into_iter().map(|(t, _)| t)) {
            read.complete(Err(TransferError::DeviceRemoved));
        }
    }

    pub fn interface_restricted(&self) -> bool {
        self.firmware.board().restricted
    }

    fn park_interrupt(&self, read: PendingTransfer) {
        let ready: Option<TransferResult> = {
            let mut board = self.firmware.board();
            match board.notifications.pop_front() {
                Some(code) => Some(Ok(notification(code))),
                None => {
                    board.interrupt_reads.push_back(read.clone());
                    None
                }
            }
        };
        match ready {
            Some(result) => {
                read.complete(result);
            }
            None => cancellable(read),
        }
    }

    fn park_bulk_in(&self, read: PendingTransfer, capacity: usize) {
        let staged = {
            let mut board = self.firmware.board();
            match board.response.take() {
                Some(data) => Some(data),
                None => {
                    board.bulk_in_reads.push_back((read.clone(), capacity));
                    None
                }
            }
        };
        match staged {
            Some(data) => {
                read.complete(Ok(truncated(data, capacity)));
            }
            None => cancellable(read),
        }
    }
}

fn cancellable(read: PendingTransfer) {
    let aborter = read.clone();
    read.set_cancel_routine(move || {
        aborter.complete(Err(TransferError::Cancelled));
    });
}

impl UsbTarget for Udefx2Emulator {
    fn submit(&self, transfer: PendingTransfer) {
        if self.firmware.board().removed {
            transfer.complete(Err(TransferError::DeviceRemoved));
            return;
        }
        match (transfer.endpoint(), transfer.take_buffer()) {
            (Endpoint::BulkOut, Some(TransferBuffer::Write(payload))) => {
                let len = payload.len();
                if self.inbox.send(DeviceEvent::Mission(payload)).is_err() {
                    transfer.complete(Err(TransferError::PipeHalted));
                    return;
                }
                transfer.complete(Ok(Completion::written(len)));
            }
            (Endpoint::Interrupt, Some(TransferBuffer::Read { .. })) => self.park_interrupt(transfer),
            (Endpoint::BulkIn, Some(TransferBuffer::Read { capacity })) => self.park_bulk_in(transfer, capacity),
            (endpoint, buffer) => {
                log::warn!("emulator: {:?} on {endpoint} not supported", buffer);
                transfer.complete(Err(TransferError::Stall));
            }
        }
    }

    fn set_interface_restricted(&self, restricted: bool) -> Result<(), TransferError> {
        let mut board = self.firmware.board();
        if board.removed {
            return Err(TransferError::DeviceRemoved);
        }
        board.restricted = restricted;
        Ok(())
    }
}

impl Drop for Udefx2Emulator {
    fn drop(&mut self) {
        let _ = self.inbox.send(DeviceEvent::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use super::*;
    use crate::transfer::{Transfer, TransferHandle, TransferOutcome};

    fn quiet_board() -> Udefx2Emulator {
        let config = EmulatorConfig { response_delay: Duration::from_secs(60), ..EmulatorConfig::default() };
        Udefx2Emulator::spawn(config).unwrap()
    }

    fn read_interrupt(emu: &Udefx2Emulator) -> (TransferHandle, mpsc::Receiver<TransferOutcome>) {
        let (tx, rx) = mpsc::channel();
        let handle = Transfer::submit(emu, Endpoint::Interrupt, TransferBuffer::Read { capacity: 4 }, move |o| {
            let _ = tx.send(o);
        });
        (handle, rx)
    }

    #[test]
    fn code_for_a_cancelled_read_waits_for_the_next_one() {
        let emu = quiet_board();
        let (stale, stale_rx) = read_interrupt(&emu);
        stale.cancel();
        assert_eq!(stale_rx.try_recv().unwrap().result, Err(TransferError::Cancelled));

        emu.firmware.notify(NOTIFY_MISSION_READY);

        let (_fresh, fresh_rx) = read_interrupt(&emu);
        let outcome = fresh_rx.try_recv().unwrap();
        assert_eq!(outcome.result.unwrap().data, vec![0x10, 0, 0, 0]);
    }

    #[test]
    fn response_skips_a_cancelled_reader_and_is_held() {
        let emu = quiet_board();
        let (tx, rx) = mpsc::channel();
        let stale = Transfer::submit(&emu, Endpoint::BulkIn, TransferBuffer::Read { capacity: 8 }, move |o| {
            let _ = tx.send(o);
        });
        stale.cancel();
        assert_eq!(rx.try_recv().unwrap().result, Err(TransferError::Cancelled));

        emu.firmware.stage_response(b"late".to_vec());

        let (tx, rx) = mpsc::channel();
        Transfer::submit(&emu, Endpoint::BulkIn, TransferBuffer::Read { capacity: 2 }, move |o| {
            let _ = tx.send(o);
        });
        assert_eq!(rx.try_recv().unwrap().result.unwrap().data, b"la");
    }
}
