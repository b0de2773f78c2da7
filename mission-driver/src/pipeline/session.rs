//! Device session
//! ==============
//! Owns every piece of per-device pipeline state behind one mutex and drives
//! it from three directions: caller submissions, transfer completions, and
//! host lifecycle callbacks (see `lifecycle.rs`).
//!
//! Each entry point runs a short critical section that mutates [`Shared`]
//! and collects [`Effects`]; the effects run after the guard is dropped, so
//! no transfer submission, cancel routine or caller wake-up ever happens
//! under the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use shared::Endpoint;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::config::{HostCapabilities, PipelineConfig};
use crate::error::MissionError;
use crate::pipeline::correlator::{Correlator, CorrelatorState, DeadlineKind, ProtocolViolation, ReadyOutcome};
use crate::pipeline::effects::{Effect, Effects};
use crate::pipeline::handle::MissionHandle;
use crate::pipeline::lifecycle::{Lifecycle, SessionState};
use crate::pipeline::mission::{MissionId, MissionRequest};
use crate::pipeline::queue::{MissionQueue, QueuedMission};
use crate::pipeline::watch::{InterruptWatch, WatchEvent};
use crate::telemetry;
use crate::transfer::{Transfer, TransferBuffer, TransferOutcome, UsbTarget};

/// Point-in-time view of a session, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub correlator: CorrelatorState,
    pub in_flight: Option<MissionId>,
    pub queued: usize,
    pub watch_armed: bool,
    pub watch_lost: bool,
}

/// Handle to one device instance's pipeline. Cheap to clone.
#[derive(Clone)]
pub struct DeviceSession {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    me: Weak<SessionInner>,
    target: Arc<dyn UsbTarget>,
    pub(crate) config: PipelineConfig,
    pub(crate) caps: HostCapabilities,
    runtime: Option<Handle>,
    shared: Mutex<Shared>,
}

pub(crate) struct Shared {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) queue: MissionQueue,
    pub(crate) correlator: Correlator,
    pub(crate) watch: InterruptWatch,
    next_mission: u64,
}

/// What a critical section needs to build transfers: a way back to the
/// session for completions, and the pipeline limits.
pub(crate) struct Ctx<'a> {
    me: &'a Weak<SessionInner>,
    pub(crate) config: &'a PipelineConfig,
}

impl Ctx<'_> {
    fn route<F>(&self, endpoint: Endpoint, buffer: TransferBuffer, handler: F) -> Transfer
    where
        F: FnOnce(&SessionInner, TransferOutcome) + Send + 'static,
    {
        let me = self.me.clone();
        Transfer::new(endpoint, buffer, move |outcome| match me.upgrade() {
            Some(inner) => handler(&inner, outcome),
            None => log::debug!("{} completed after its session was dropped", outcome.id),
        })
    }

    pub(crate) fn bulk_out(&self, mission: MissionId, payload: Vec<u8>) -> Transfer {
        self.route(Endpoint::BulkOut, TransferBuffer::Write(payload), move |s, o| {
            s.on_bulk_out_complete(mission, o)
        })
    }

    pub(crate) fn bulk_in(&self, mission: MissionId, capacity: usize) -> Transfer {
        self.route(Endpoint::BulkIn, TransferBuffer::Read { capacity }, move |s, o| {
            s.on_bulk_in_complete(mission, o)
        })
    }

    pub(crate) fn interrupt_read(&self, capacity: usize) -> Transfer {
        self.route(Endpoint::Interrupt, TransferBuffer::Read { capacity }, |s, o| {
            s.on_interrupt_complete(o)
        })
    }
}

impl DeviceSession {
    /// Create a session for a device that is attached but not yet running.
    /// Call [`DeviceSession::on_device_arrived`] to start it.
    ///
    /// Deadlines (mission timeout, cancel grace) are spawned on the tokio
    /// runtime current at construction, if any.
    pub fn new<T: UsbTarget>(target: Arc<T>, config: PipelineConfig, caps: HostCapabilities) -> Self {
        let target: Arc<dyn UsbTarget> = target;
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            log::warn!("device session created outside a tokio runtime; mission deadlines are disabled");
        }
        let inner = Arc::new_cyclic(|me| SessionInner {
            me: me.clone(),
            target,
            config,
            caps,
            runtime,
            shared: Mutex::new(Shared {
                lifecycle: Lifecycle::default(),
                queue: MissionQueue::default(),
                correlator: Correlator::default(),
                watch: InterruptWatch::default(),
                next_mission: 0,
            }),
        });
        DeviceSession { inner }
    }

    /// Queue a mission. The returned handle resolves with the device's
    /// response once the full write / notify / read handshake has run.
    pub fn submit_mission(&self, payload: impl Into<Vec<u8>>) -> Result<MissionHandle, MissionError> {
        self.submit_mission_with(MissionRequest::new(payload))
    }

    pub fn submit_mission_with(&self, request: MissionRequest) -> Result<MissionHandle, MissionError> {
        let max = self.inner.config.max_transfer_size;
        let len = request.payload.len();
        if len == 0 {
            return Err(MissionError::EmptyPayload);
        }
        if len > max {
            return Err(MissionError::PayloadTooLarge { len, max });
        }
        match request.exact_response_len {
            Some(expected) if !(1..=max).contains(&expected) => {
                return Err(MissionError::InvalidResponseLength { len: expected, max });
            }
            _ => {}
        }

        let (sink, rx) = oneshot::channel();
        let id = self.inner.update(|s, _, _| {
            let state = s.lifecycle.state;
            if state != SessionState::Active {
                return Err(MissionError::SessionNotActive { state });
            }
            s.next_mission += 1;
            let id = MissionId(s.next_mission);
            s.queue.push(QueuedMission { id, request, sink, cancelled: false });
            Ok(id)
        });

        match id {
            Ok(id) => {
                log::debug!("{id}: submitted ({len} bytes)");
                telemetry::mission_submitted();
                Ok(MissionHandle::new(id, rx, Arc::downgrade(&self.inner)))
            }
            Err(e) => {
                log::debug!("submission rejected: {e}");
                telemetry::mission_rejected(&e);
                Err(e)
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().lifecycle.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.inner.lock();
        SessionSnapshot {
            state: s.lifecycle.state,
            correlator: s.correlator.state(),
            in_flight: s.correlator.current(),
            queued: s.queue.len(),
            watch_armed: s.watch.is_armed(),
            watch_lost: s.watch.lost().is_some(),
        }
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one critical section, settle the queue, then execute the effects
    /// with the lock released.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Shared, &Ctx<'_>, &mut Effects) -> R) -> R {
        let cx = Ctx { me: &self.me, config: &self.config };
        let mut fx = Effects::default();
        let out = {
            let mut guard = self.lock();
            let s = &mut *guard;
            let out = f(s, &cx, &mut fx);
            s.settle(&cx, &mut fx);
            out
        };
        self.run(fx);
        out
    }

    pub(crate) fn cancel_mission(&self, id: MissionId) {
        self.update(|s, cx, fx| {
            if s.queue.mark_cancelled(id) {
                log::debug!("{id}: cancelled while queued");
            } else if !s.correlator.cancel(id, cx, fx) {
                log::trace!("{id}: cancel after resolution ignored");
            }
        });
    }

    fn on_bulk_out_complete(&self, mission: MissionId, outcome: TransferOutcome) {
        self.update(|s, cx, fx| {
            let lost = s.watch.lost().cloned();
            s.correlator.on_bulk_out_complete(mission, outcome, lost.as_ref(), cx, fx);
        });
    }

    fn on_bulk_in_complete(&self, mission: MissionId, outcome: TransferOutcome) {
        self.update(|s, _, fx| {
            s.correlator.on_bulk_in_complete(mission, outcome, fx);
        });
    }

    fn on_interrupt_complete(&self, outcome: TransferOutcome) {
        self.update(|s, cx, fx| {
            match s.watch.on_complete(outcome) {
                WatchEvent::Notification(n) if n.is_ready() => {
                    telemetry::notification(n);
                    if let ReadyOutcome::Ignored(violation) = s.correlator.on_device_ready(cx, fx) {
                        report(violation);
                    }
                }
                WatchEvent::Notification(n) => {
                    telemetry::notification(n);
                    log::debug!("notification {:#06x} ignored", n.raw());
                }
                WatchEvent::Undecodable(len) => report(ProtocolViolation::UndecodableNotification { len }),
                WatchEvent::Stopped => log::debug!("interrupt watch stopped"),
                WatchEvent::Lost(reason) => {
                    udefx_log!(log::Level::Warn, "watch", "interrupt watch lost: {}", reason);
                    telemetry::watch_lost();
                    s.correlator.on_watch_lost(&reason, fx);
                }
                WatchEvent::Stale => return,
            }
            // Keeps listening through a drain; a stopped watch stays stopped.
            s.watch.arm(cx, fx);
        });
    }

    fn on_deadline(&self, mission: MissionId, kind: DeadlineKind) {
        self.update(|s, _, fx| {
            s.correlator.on_deadline(mission, kind, fx);
        });
    }

    fn arm_deadline(&self, mission: MissionId, after: Duration, kind: DeadlineKind) {
        let Some(rt) = &self.runtime else {
            log::warn!("{mission}: no runtime, {kind:?} deadline not armed");
            return;
        };
        let me = self.me.clone();
        let task = rt.spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = me.upgrade() {
                inner.on_deadline(mission, kind);
            }
        });
        // The mission may have resolved between recording the effect and now.
        if let Some(orphan) = self.lock().correlator.attach_deadline(mission, task.abort_handle()) {
            orphan.abort();
        }
    }

    fn run(&self, fx: Effects) {
        for effect in fx {
            match effect {
                Effect::Start(transfer) => transfer.start(&*self.target),
                Effect::Cancel(handle) => handle.cancel(),
                Effect::Resolve { mission, sink, result } => {
                    match &result {
                        Ok(r) => log::debug!("{mission}: completed with {} bytes", r.data.len()),
                        Err(e) => log::info!("{mission}: failed: {e}"),
                    }
                    telemetry::mission_resolved(&result);
                    if sink.send(result).is_err() {
                        log::trace!("{mission}: caller no longer waiting");
                    }
                }
                Effect::ArmDeadline { mission, after, kind } => self.arm_deadline(mission, after, kind),
                Effect::WakeSuspend(waiters) => {
                    for w in waiters {
                        let _ = w.send(());
                    }
                }
                Effect::MarkInterfaceRestricted => {
                    if let Err(e) = self.target.set_interface_restricted(true) {
                        log::warn!("could not mark device interface restricted: {e}");
                    }
                }
            }
        }
    }
}

impl Shared {
    fn settle(&mut self, cx: &Ctx<'_>, fx: &mut Effects) {
        self.admit_next(cx, fx);
        self.check_quiescent(fx);
        telemetry::queue_depth(self.queue.len());
    }

    /// Admit queue heads while the correlator is free. Caller-cancelled
    /// heads are resolved even while the session is not active.
    fn admit_next(&mut self, cx: &Ctx<'_>, fx: &mut Effects) {
        while self.correlator.is_idle() {
            let head_cancelled = match self.queue.front() {
                Some(m) => m.cancelled,
                None => break,
            };
            if !head_cancelled && self.lifecycle.state != SessionState::Active {
                break;
            }
            let Some(m) = self.queue.pop() else { break };

            if m.cancelled {
                fx.resolve(m.id, m.sink, Err(MissionError::Cancelled));
            } else if let Some(reason) = self.watch.lost() {
                // Its ready signal could never be observed.
                let err = MissionError::transfer(Endpoint::Interrupt, reason.clone());
                fx.resolve(m.id, m.sink, Err(err));
            } else {
                self.correlator.begin(m, cx, fx);
            }
        }
    }

    /// Finish a pending suspend once nothing is in flight and the watch's
    /// last read has come back.
    fn check_quiescent(&mut self, fx: &mut Effects) {
        if self.lifecycle.state != SessionState::Suspending || !self.correlator.is_idle() {
            return;
        }
        self.watch.stop(fx);
        if self.watch.is_idle() {
            self.lifecycle.state = SessionState::Suspended;
            udefx_log!(log::Level::Info, "lifecycle", "session suspended, {} mission(s) held", self.queue.len());
            fx.wake_suspend(std::mem::take(&mut self.lifecycle.drain_waiters));
        }
    }
}

fn report(violation: ProtocolViolation) {
    udefx_log!(log::Level::Warn, "correlator", "protocol violation: {}", violation);
    telemetry::protocol_violation(&violation);
}
