use std::{
    future::Future,
    pin::Pin,
    sync::Weak,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::error::MissionError;
use crate::pipeline::lifecycle::SessionState;
use crate::pipeline::mission::{MissionId, MissionResult};
use crate::pipeline::session::SessionInner;

/// Caller's side of a submitted mission. Resolves exactly once.
///
/// Dropping the handle before it resolves cancels the mission.
#[must_use = "dropping a MissionHandle cancels the mission"]
pub struct MissionHandle {
    id: MissionId,
    rx: oneshot::Receiver<MissionResult>,
    session: Weak<SessionInner>,
    resolved: bool,
}

impl MissionHandle {
    pub(crate) fn new(id: MissionId, rx: oneshot::Receiver<MissionResult>, session: Weak<SessionInner>) -> Self {
        MissionHandle { id, rx, session, resolved: false }
    }

    pub fn id(&self) -> MissionId {
        self.id
    }

    /// Request cancellation. The handle still resolves, normally with
    /// [`MissionError::Cancelled`]; a mission whose response was already on
    /// its way may complete successfully instead.
    pub fn cancel(&self) {
        if self.resolved {
            return;
        }
        if let Some(inner) = self.session.upgrade() {
            inner.cancel_mission(self.id);
        }
    }
}

impl Future for MissionHandle {
    type Output = MissionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let out = match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            // The session went away without resolving us.
            Poll::Ready(Err(_)) => Err(MissionError::SessionNotActive { state: SessionState::Removed }),
        };
        this.resolved = true;
        Poll::Ready(out)
    }
}

impl Drop for MissionHandle {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        // Resolved but never polled: nothing left to cancel.
        if !matches!(self.rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            return;
        }
        self.cancel();
    }
}

impl std::fmt::Debug for MissionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissionHandle").field("id", &self.id).field("resolved", &self.resolved).finish()
    }
}
