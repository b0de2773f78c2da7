//! Deferred side effects.
//!
//! Collected while the session lock is held, executed in order after it is
//! released. Resolutions are pushed before transfer starts by construction
//! (a mission finishes before the next one is admitted), which keeps caller
//! completions in FIFO order even when a target completes synchronously.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::pipeline::correlator::DeadlineKind;
use crate::pipeline::mission::{MissionId, MissionResult};
use crate::transfer::{Transfer, TransferHandle};

pub(crate) enum Effect {
    Start(Transfer),
    Cancel(TransferHandle),
    Resolve {
        mission: MissionId,
        sink: oneshot::Sender<MissionResult>,
        result: MissionResult,
    },
    ArmDeadline {
        mission: MissionId,
        after: Duration,
        kind: DeadlineKind,
    },
    WakeSuspend(Vec<oneshot::Sender<()>>),
    MarkInterfaceRestricted,
}

#[derive(Default)]
pub(crate) struct Effects(Vec<Effect>);

impl Effects {
    pub(crate) fn start(&mut self, transfer: Transfer) {
        self.0.push(Effect::Start(transfer));
    }

    pub(crate) fn cancel(&mut self, handle: TransferHandle) {
        self.0.push(Effect::Cancel(handle));
    }

    pub(crate) fn resolve(
        &mut self,
        mission: MissionId,
        sink: oneshot::Sender<MissionResult>,
        result: MissionResult,
    ) {
        self.0.push(Effect::Resolve { mission, sink, result });
    }

    pub(crate) fn arm_deadline(&mut self, mission: MissionId, after: Duration, kind: DeadlineKind) {
        self.0.push(Effect::ArmDeadline { mission, after, kind });
    }

    pub(crate) fn wake_suspend(&mut self, waiters: Vec<oneshot::Sender<()>>) {
        if !waiters.is_empty() {
            self.0.push(Effect::WakeSuspend(waiters));
        }
    }

    pub(crate) fn mark_interface_restricted(&mut self) {
        self.0.push(Effect::MarkInterfaceRestricted);
    }
}

impl IntoIterator for Effects {
    type Item = Effect;
    type IntoIter = std::vec::IntoIter<Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
