//! FIFO of missions waiting for the device.
//!
//! Admission policy (one in flight, hold while not active) lives with the
//! session; the queue itself only keeps order and cancellation marks.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::pipeline::mission::{MissionId, MissionRequest, MissionResult};

pub(crate) struct QueuedMission {
    pub(crate) id: MissionId,
    pub(crate) request: MissionRequest,
    pub(crate) sink: oneshot::Sender<MissionResult>,
    /// Cancelled by its caller; resolved when it reaches the head so that
    /// resolution order stays FIFO.
    pub(crate) cancelled: bool,
}

#[derive(Default)]
pub(crate) struct MissionQueue {
    pending: VecDeque<QueuedMission>,
}

impl MissionQueue {
    pub(crate) fn push(&mut self, mission: QueuedMission) {
        self.pending.push_back(mission);
    }

    pub(crate) fn front(&self) -> Option<&QueuedMission> {
        self.pending.front()
    }

    pub(crate) fn pop(&mut self) -> Option<QueuedMission> {
        self.pending.pop_front()
    }

    /// Returns `true` if `id` was waiting in the queue.
    pub(crate) fn mark_cancelled(&mut self, id: MissionId) -> bool {
        match self.pending.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.cancelled = true;
                true
            }
            None => false,
        }
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = QueuedMission> + '_ {
        self.pending.drain(..)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(n: u64) -> (QueuedMission, oneshot::Receiver<MissionResult>) {
        let (sink, rx) = oneshot::channel();
        let m = QueuedMission {
            id: MissionId(n),
            request: MissionRequest::new(vec![n as u8]),
            sink,
            cancelled: false,
        };
        (m, rx)
    }

    #[test]
    fn keeps_insertion_order() {
        let mut q = MissionQueue::default();
        let mut rxs = Vec::new();
        for n in 1..=3 {
            let (m, rx) = queued(n);
            q.push(m);
            rxs.push(rx);
        }
        assert_eq!(q.len(), 3);
        let order: Vec<u64> = std::iter::from_fn(|| q.pop()).map(|m| m.id.get()).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(q.pop().is_none());
    }

    #[test]
    fn cancel_marks_in_place() {
        let mut q = MissionQueue::default();
        let (a, _ra) = queued(1);
        let (b, _rb) = queued(2);
        q.push(a);
        q.push(b);

        assert!(q.mark_cancelled(MissionId(2)));
        assert!(!q.mark_cancelled(MissionId(7)));
        assert!(!q.front().unwrap().cancelled);
        q.pop();
        assert!(q.front().unwrap().cancelled);
    }
}
