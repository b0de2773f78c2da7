//! Mission correlator
//! ==================
//! Ties the in-flight mission to the next *ready* notification.
//!
//! ```text
//!            admit                bulk-out ok            ready
//!   Idle ───────────▶ AwaitingWrite ─────────▶ AwaitingNotification ─────▶ RetrievingResponse
//!    ▲                    │ bulk-out failed           │ deadline / cancel        │ bulk-in done
//!    └────────────────────┴───────────────────────────┴──────────────────────────┘
//! ```
//!
//! Only the *ready* value advances the handshake. A *ready* with no mission
//! waiting for one is inert: the device may repeat itself, and nothing here
//! can tell which mission a stray signal belonged to.

use std::fmt;

use shared::Endpoint;
use thiserror::Error;
use tokio::{sync::oneshot, task::AbortHandle};

use crate::error::{MissionError, TransferError};
use crate::pipeline::effects::Effects;
use crate::pipeline::mission::{MissionId, MissionResponse, MissionResult};
use crate::pipeline::queue::QueuedMission;
use crate::pipeline::session::Ctx;
use crate::transfer::{TransferHandle, TransferOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatorState {
    Idle,
    AwaitingWrite,
    AwaitingNotification,
    RetrievingResponse,
}

impl fmt::Display for CorrelatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Device behaviour the handshake tolerates but does not expect. Logged and
/// counted, never reported to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("ready notification with no mission awaiting it (correlator {state})")]
    UncorrelatedReady { state: CorrelatorState },

    #[error("undecodable interrupt payload of {len} bytes")]
    UndecodableNotification { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeadlineKind {
    /// No notification within the configured mission timeout.
    MissionTimeout,
    /// Bound on how long a cancel-pending mission waits for its signal.
    CancelGrace,
}

pub(crate) enum ReadyOutcome {
    Retrieving,
    Resolved,
    Ignored(ProtocolViolation),
}

enum Phase {
    AwaitingWrite(TransferHandle),
    AwaitingNotification,
    RetrievingResponse(TransferHandle),
}

struct InFlight {
    id: MissionId,
    sink: oneshot::Sender<MissionResult>,
    payload_len: usize,
    exact_response_len: Option<usize>,
    phase: Phase,
    cancel_pending: bool,
    /// Sleeping mission-timeout and cancel-grace tasks.
    deadlines: Vec<AbortHandle>,
}

impl InFlight {
    fn clear_deadlines(&mut self) {
        for d in self.deadlines.drain(..) {
            d.abort();
        }
    }
}

#[derive(Default)]
pub(crate) struct Correlator {
    in_flight: Option<InFlight>,
}

impl Correlator {
    pub(crate) fn state(&self) -> CorrelatorState {
        match self.in_flight.as_ref().map(|f| &f.phase) {
            None => CorrelatorState::Idle,
            Some(Phase::AwaitingWrite(_)) => CorrelatorState::AwaitingWrite,
            Some(Phase::AwaitingNotification) => CorrelatorState::AwaitingNotification,
            Some(Phase::RetrievingResponse(_)) => CorrelatorState::RetrievingResponse,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    pub(crate) fn current(&self) -> Option<MissionId> {
        self.in_flight.as_ref().map(|f| f.id)
    }

    /// Idle → AwaitingWrite.
    pub(crate) fn begin(&mut self, mission: QueuedMission, cx: &Ctx<'_>, fx: &mut Effects) {
        debug_assert!(self.in_flight.is_none(), "admitted {} while busy", mission.id);
        let QueuedMission { id, request, sink, .. } = mission;
        let payload_len = request.payload.len();
        let transfer = cx.bulk_out(id, request.payload);
        log::debug!("{id}: admitted, bulk-out {} ({payload_len} bytes)", transfer.id());

        self.in_flight = Some(InFlight {
            id,
            sink,
            payload_len,
            exact_response_len: request.exact_response_len,
            phase: Phase::AwaitingWrite(transfer.handle()),
            cancel_pending: false,
            deadlines: Vec::new(),
        });
        fx.start(transfer);
    }

    /// AwaitingWrite → AwaitingNotification, or → Idle on failure.
    ///
    /// A cancelled write that still went through leaves the mission with the
    /// device, so it waits for its ready (bounded by the cancel grace) like a
    /// mission cancelled after the write.
    pub(crate) fn on_bulk_out_complete(
        &mut self,
        mission: MissionId,
        outcome: TransferOutcome,
        watch_lost: Option<&TransferError>,
        cx: &Ctx<'_>,
        fx: &mut Effects,
    ) {
        let Some(f) = self.matching(mission, |p| matches!(p, Phase::AwaitingWrite(h) if h.id() == outcome.id)) else {
            log::debug!("{mission}: stale bulk-out completion {} ignored", outcome.id);
            return;
        };

        let failure = match outcome.result {
            Ok(c) if c.bytes_transferred < f.payload_len => Some(MissionError::transfer(
                Endpoint::BulkOut,
                TransferError::ShortTransfer { expected: f.payload_len, actual: c.bytes_transferred },
            )),
            Ok(_) => watch_lost.map(|reason| MissionError::transfer(Endpoint::Interrupt, reason.clone())),
            Err(reason) => Some(MissionError::transfer(Endpoint::BulkOut, reason)),
        };

        if let Some(err) = failure {
            let err = if f.cancel_pending { MissionError::Cancelled } else { err };
            log::info!("{mission}: bulk-out stage failed: {err}");
            self.finish(Err(err), fx);
            return;
        }

        f.phase = Phase::AwaitingNotification;
        if f.cancel_pending {
            log::debug!("{mission}: written despite cancel, holding for its notification");
            fx.arm_deadline(mission, cx.config.cancel_grace, DeadlineKind::CancelGrace);
        } else {
            log::debug!("{mission}: written, awaiting notification");
            if let Some(after) = cx.config.mission_timeout {
                fx.arm_deadline(mission, after, DeadlineKind::MissionTimeout);
            }
        }
    }

    /// Interrupt watch saw *ready*. Called inside the interrupt completion.
    pub(crate) fn on_device_ready(&mut self, cx: &Ctx<'_>, fx: &mut Effects) -> ReadyOutcome {
        let state = self.state();
        let Some(f) = self.in_flight.as_mut().filter(|_| state == CorrelatorState::AwaitingNotification) else {
            return ReadyOutcome::Ignored(ProtocolViolation::UncorrelatedReady { state });
        };

        if f.cancel_pending {
            log::info!("{}: ready arrived for cancelled mission; response left unread", f.id);
            self.finish(Err(MissionError::Cancelled), fx);
            return ReadyOutcome::Resolved;
        }

        let capacity = f.exact_response_len.unwrap_or(cx.config.max_transfer_size);
        let transfer = cx.bulk_in(f.id, capacity);
        log::debug!("{}: ready, bulk-in {} ({capacity} bytes max)", f.id, transfer.id());
        f.phase = Phase::RetrievingResponse(transfer.handle());
        f.clear_deadlines();
        fx.start(transfer);
        ReadyOutcome::Retrieving
    }

    /// RetrievingResponse → Idle.
    pub(crate) fn on_bulk_in_complete(&mut self, mission: MissionId, outcome: TransferOutcome, fx: &mut Effects) {
        let Some(f) = self.matching(mission, |p| matches!(p, Phase::RetrievingResponse(h) if h.id() == outcome.id)) else {
            log::debug!("{mission}: stale bulk-in completion {} ignored", outcome.id);
            return;
        };

        let result = if f.cancel_pending {
            Err(MissionError::Cancelled)
        } else {
            match (outcome.result, f.exact_response_len) {
                (Ok(c), Some(expected)) if c.data.len() != expected => Err(MissionError::transfer(
                    Endpoint::BulkIn,
                    TransferError::ShortTransfer { expected, actual: c.data.len() },
                )),
                (Ok(c), _) => Ok(MissionResponse { mission, data: c.data }),
                (Err(reason), _) => Err(MissionError::transfer(Endpoint::BulkIn, reason)),
            }
        };
        self.finish(result, fx);
    }

    /// Caller cancel of the in-flight mission. Returns `false` if `mission`
    /// is not the one in flight.
    pub(crate) fn cancel(&mut self, mission: MissionId, cx: &Ctx<'_>, fx: &mut Effects) -> bool {
        let Some(f) = self.in_flight.as_mut().filter(|f| f.id == mission) else {
            return false;
        };
        if f.cancel_pending {
            return true;
        }
        f.cancel_pending = true;
        match &f.phase {
            Phase::AwaitingWrite(h) | Phase::RetrievingResponse(h) => fx.cancel(h.clone()),
            Phase::AwaitingNotification => {
                // Nothing to abort; wait for the signal so the next mission
                // cannot consume this one's notification.
                fx.arm_deadline(mission, cx.config.cancel_grace, DeadlineKind::CancelGrace);
            }
        }
        log::debug!("{mission}: cancel pending");
        true
    }

    pub(crate) fn on_deadline(&mut self, mission: MissionId, kind: DeadlineKind, fx: &mut Effects) {
        let Some(f) = self.matching(mission, |p| matches!(p, Phase::AwaitingNotification)) else {
            return;
        };
        let err = match (f.cancel_pending, kind) {
            (true, _) => MissionError::Cancelled,
            (false, DeadlineKind::MissionTimeout) => MissionError::transfer(Endpoint::Interrupt, TransferError::Timeout),
            (false, DeadlineKind::CancelGrace) => return,
        };
        log::info!("{mission}: {kind:?} expired: {err}");
        self.finish(Err(err), fx);
    }

    /// Keep the abort handle of a deadline task spawned for `mission`. Hands
    /// it back if that mission is no longer waiting for its notification.
    pub(crate) fn attach_deadline(&mut self, mission: MissionId, deadline: AbortHandle) -> Option<AbortHandle> {
        match self.matching(mission, |p| matches!(p, Phase::AwaitingNotification)) {
            Some(f) => {
                f.deadlines.push(deadline);
                None
            }
            None => Some(deadline),
        }
    }

    /// The notification pipe is gone; a mission waiting on it can never
    /// complete.
    pub(crate) fn on_watch_lost(&mut self, reason: &TransferError, fx: &mut Effects) {
        if self.state() != CorrelatorState::AwaitingNotification {
            return;
        }
        let err = match self.in_flight.as_ref() {
            Some(f) if f.cancel_pending => MissionError::Cancelled,
            _ => MissionError::transfer(Endpoint::Interrupt, reason.clone()),
        };
        self.finish(Err(err), fx);
    }

    /// Suspend path: abort whatever is in flight. A mission waiting for its
    /// notification resolves at once because the watch is about to stop.
    pub(crate) fn cancel_for_suspend(&mut self, fx: &mut Effects) {
        let Some(f) = self.in_flight.as_mut() else {
            return;
        };
        let handle = match &f.phase {
            Phase::AwaitingWrite(h) | Phase::RetrievingResponse(h) => h.clone(),
            Phase::AwaitingNotification => {
                log::info!("{}: cancelled by suspend while awaiting notification", f.id);
                self.finish(Err(MissionError::Cancelled), fx);
                return;
            }
        };
        if !f.cancel_pending {
            f.cancel_pending = true;
            log::info!("{}: cancelling {} for suspend", f.id, handle.id());
            fx.cancel(handle);
        }
    }

    /// Surprise removal: fail the in-flight mission immediately. Completions
    /// of the aborted transfers arrive later and are dropped as stale.
    pub(crate) fn abort_removed(&mut self, fx: &mut Effects) {
        let Some(mut f) = self.in_flight.take() else {
            return;
        };
        f.clear_deadlines();
        let endpoint = match &f.phase {
            Phase::AwaitingWrite(h) => {
                fx.cancel(h.clone());
                Endpoint::BulkOut
            }
            Phase::AwaitingNotification => Endpoint::Interrupt,
            Phase::RetrievingResponse(h) => {
                fx.cancel(h.clone());
                Endpoint::BulkIn
            }
        };
        fx.resolve(f.id, f.sink, Err(MissionError::transfer(endpoint, TransferError::DeviceRemoved)));
    }

    fn matching(&mut self, mission: MissionId, phase: impl Fn(&Phase) -> bool) -> Option<&mut InFlight> {
        self.in_flight.as_mut().filter(|f| f.id == mission && phase(&f.phase))
    }

    fn finish(&mut self, result: MissionResult, fx: &mut Effects) {
        if let Some(mut f) = self.in_flight.take() {
            f.clear_deadlines();
            fx.resolve(f.id, f.sink, result);
        }
    }
}
