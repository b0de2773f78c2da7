// tests/lifecycle.rs

use futures::FutureExt;
use std::sync::Arc;

use udefx::config::{HostCapabilities, PipelineConfig};
use udefx::pipeline::{CorrelatorState, DeviceSession, MissionHandle, MissionResult, SessionState, SuspendPolicy};
use udefx::sim::ScriptedTarget;
use udefx::{Endpoint, MissionError, TransferError};

fn attached(config: PipelineConfig, caps: HostCapabilities) -> (Arc<ScriptedTarget>, DeviceSession) {
    let dev = Arc::new(ScriptedTarget::new());
    let session = DeviceSession::new(Arc::clone(&dev), config, caps);
    (dev, session)
}

fn active() -> (Arc<ScriptedTarget>, DeviceSession) {
    let (dev, s) = attached(PipelineConfig::default(), HostCapabilities::default());
    s.on_device_arrived().unwrap();
    (dev, s)
}

fn poll(handle: &mut MissionHandle) -> Option<MissionResult> {
    handle.now_or_never()
}

#[tokio::test]
async fn nothing_is_admitted_before_arrival() {
    let (dev, s) = attached(PipelineConfig::default(), HostCapabilities::default());
    assert_eq!(s.state(), SessionState::Suspended);
    assert_eq!(
        s.submit_mission(b"M1".to_vec()).unwrap_err(),
        MissionError::SessionNotActive { state: SessionState::Suspended }
    );
    assert_eq!(dev.submitted(Endpoint::Interrupt), 0);

    s.on_device_arrived().unwrap();
    assert_eq!(s.state(), SessionState::Active);
    assert!(s.snapshot().watch_armed);
    // Arrival is idempotent.
    s.on_device_arrived().unwrap();
    assert_eq!(dev.submitted(Endpoint::Interrupt), 1);
}

#[tokio::test]
async fn removal_while_awaiting_notification_fails_everything() {
    let (dev, s) = active();
    let mut m1 = s.submit_mission(b"M1".to_vec()).unwrap();
    let mut m2 = s.submit_mission(b"M2".to_vec()).unwrap();
    assert!(dev.write_ok());

    s.on_device_removed();

    assert_eq!(
        poll(&mut m1).unwrap(),
        Err(MissionError::TransferFailed { endpoint: Endpoint::Interrupt, reason: TransferError::DeviceRemoved })
    );
    let e2 = poll(&mut m2).unwrap().unwrap_err();
    assert_eq!(e2, MissionError::SessionNotActive { state: SessionState::Removed });
    assert!(e2.is_device_removed());

    let snap = s.snapshot();
    assert_eq!(snap.state, SessionState::Removed);
    assert_eq!(snap.correlator, CorrelatorState::Idle);
    assert_eq!(snap.queued, 0);
    assert_eq!(dev.outstanding(Endpoint::Interrupt), 0, "watch stopped");
    assert_eq!(dev.written().len(), 1);
}

#[tokio::test]
async fn removal_reports_the_stage_reached() {
    let (dev, s) = active();
    let mut m1 = s.submit_mission(b"M1".to_vec()).unwrap();
    s.on_device_removed();
    assert_eq!(
        poll(&mut m1).unwrap(),
        Err(MissionError::TransferFailed { endpoint: Endpoint::BulkOut, reason: TransferError::DeviceRemoved })
    );
    assert_eq!(dev.outstanding(Endpoint::BulkOut), 0);
    // A late completion from the aborted write changes nothing.
    assert!(!dev.write_ok());

    let (dev, s) = active();
    let mut m1 = s.submit_mission(b"M1".to_vec()).unwrap();
    assert!(dev.write_ok());
    assert!(dev.notify(0x10));
    s.on_device_removed();
    assert_eq!(
        poll(&mut m1).unwrap(),
        Err(MissionError::TransferFailed { endpoint: Endpoint::BulkIn, reason: TransferError::DeviceRemoved })
    );
}

#[tokio::test]
async fn removed_session_is_terminal() {
    let (_dev, s) = active();
    s.on_device_removed();
    s.on_device_removed();

    assert_eq!(
        s.on_device_arrived().unwrap_err(),
        MissionError::SessionNotActive { state: SessionState::Removed }
    );
    assert_eq!(
        s.submit_mission(b"M".to_vec()).unwrap_err(),
        MissionError::SessionNotActive { state: SessionState::Removed }
    );
    assert!(s.on_device_suspending().await.unwrap_err().is_device_removed());
}

#[tokio::test]
async fn suspend_drains_in_flight_and_holds_the_queue() {
    let (dev, s) = active();
    let mut m1 = s.submit_mission(b"M1".to_vec()).unwrap();
    let mut m2 = s.submit_mission(b"M2".to_vec()).unwrap();
    assert!(dev.write_ok());

    let mut suspend = Box::pin(s.on_device_suspending());
    assert!(suspend.as_mut().now_or_never().is_none());
    assert_eq!(s.state(), SessionState::Suspending);
    assert_eq!(
        s.submit_mission(b"M3".to_vec()).unwrap_err(),
        MissionError::SessionNotActive { state: SessionState::Suspending }
    );

    // The watch keeps listening while the mission drains.
    assert!(dev.notify(0x11));
    assert!(dev.notify(0x10));
    assert!(dev.respond(b"P1"));
    assert_eq!(poll(&mut m1).unwrap().unwrap().data, b"P1");

    suspend.await.unwrap();
    let snap = s.snapshot();
    assert_eq!(snap.state, SessionState::Suspended);
    assert_eq!(snap.queued, 1);
    assert!(!snap.watch_armed);
    assert_eq!(dev.outstanding(Endpoint::Interrupt), 0);
    assert_eq!(dev.written().len(), 1, "M2 held across suspend");
    assert!(poll(&mut m2).is_none());

    // Resume: watch restarted with a single fresh read, held mission admitted.
    let reads_before = dev.submitted(Endpoint::Interrupt);
    s.on_device_arrived().unwrap();
    assert_eq!(dev.outstanding(Endpoint::Interrupt), 1);
    assert_eq!(dev.submitted(Endpoint::Interrupt), reads_before + 1);
    assert_eq!(dev.written(), vec![b"M1".to_vec(), b"M2".to_vec()]);
    assert!(dev.write_ok());
    assert!(dev.notify(0x10));
    assert!(dev.respond(b"P2"));
    assert_eq!(poll(&mut m2).unwrap().unwrap().data, b"P2");
}

#[tokio::test]
async fn suspend_when_idle_completes_immediately() {
    let (dev, s) = active();
    s.on_device_suspending().await.unwrap();
    assert_eq!(s.state(), SessionState::Suspended);
    assert_eq!(dev.outstanding(Endpoint::Interrupt), 0);
    // Already suspended.
    s.on_device_suspending().await.unwrap();
}

#[tokio::test]
async fn cancel_policy_resolves_awaiting_mission_at_once() {
    let config = PipelineConfig { suspend_policy: SuspendPolicy::Cancel, ..PipelineConfig::default() };
    let (dev, s) = attached(config, HostCapabilities::default());
    s.on_device_arrived().unwrap();
    let mut m1 = s.submit_mission(b"M1".to_vec()).unwrap();
    assert!(dev.write_ok());

    s.on_device_suspending().await.unwrap();
    assert_eq!(poll(&mut m1).unwrap(), Err(MissionError::Cancelled));
    assert_eq!(s.state(), SessionState::Suspended);
    assert_eq!(dev.submitted(Endpoint::BulkIn), 0);
}

#[tokio::test(start_paused = true)]
async fn drain_timeout_cancels_a_stuck_mission() {
    let (dev, s) = active();
    let mut m1 = s.submit_mission(b"M1".to_vec()).unwrap();
    // The write never completes on its own.

    s.on_device_suspending().await.unwrap();
    assert_eq!(poll(&mut m1).unwrap(), Err(MissionError::Cancelled));
    assert_eq!(s.state(), SessionState::Suspended);
    assert_eq!(dev.outstanding(Endpoint::BulkOut), 0);
}

#[tokio::test]
async fn removal_during_suspend_fails_the_suspend() {
    let (dev, s) = active();
    let _m1 = s.submit_mission(b"M1".to_vec()).unwrap();
    assert!(dev.write_ok());

    let mut suspend = Box::pin(s.on_device_suspending());
    assert!(suspend.as_mut().now_or_never().is_none());
    assert_eq!(
        s.on_device_arrived().unwrap_err(),
        MissionError::SessionNotActive { state: SessionState::Suspending }
    );

    s.on_device_removed();
    assert_eq!(
        suspend.await.unwrap_err(),
        MissionError::SessionNotActive { state: SessionState::Removed }
    );
}

#[tokio::test]
async fn lost_watch_fails_waiters_until_pipe_reset() {
    let (dev, s) = active();
    let mut m1 = s.submit_mission(b"M1".to_vec()).unwrap();
    assert!(dev.write_ok());

    assert!(dev.fail(Endpoint::Interrupt, TransferError::PipeHalted));
    assert_eq!(
        poll(&mut m1).unwrap(),
        Err(MissionError::TransferFailed { endpoint: Endpoint::Interrupt, reason: TransferError::PipeHalted })
    );
    assert!(s.snapshot().watch_lost);
    assert_eq!(dev.outstanding(Endpoint::Interrupt), 0, "no retry");

    // Its ready could never be seen, so it is not even written.
    let mut m2 = s.submit_mission(b"M2".to_vec()).unwrap();
    assert_eq!(
        poll(&mut m2).unwrap(),
        Err(MissionError::TransferFailed { endpoint: Endpoint::Interrupt, reason: TransferError::PipeHalted })
    );
    assert_eq!(dev.written().len(), 1);

    s.on_pipe_reset();
    assert!(!s.snapshot().watch_lost);
    assert_eq!(dev.outstanding(Endpoint::Interrupt), 1);

    let mut m3 = s.submit_mission(b"M3".to_vec()).unwrap();
    assert!(dev.write_ok());
    assert!(dev.notify(0x10));
    assert!(dev.respond(b"P3"));
    assert_eq!(poll(&mut m3).unwrap().unwrap().data, b"P3");
}

#[tokio::test]
async fn interface_is_marked_restricted_once_when_supported() {
    let caps = HostCapabilities { interface_property_data: true };
    let (dev, s) = attached(PipelineConfig::default(), caps);
    assert_eq!(dev.interface_restricted(), None);
    s.on_device_arrived().unwrap();
    assert_eq!(dev.interface_restricted(), Some(true));

    s.on_device_suspending().await.unwrap();
    s.on_device_arrived().unwrap();
    assert_eq!(dev.interface_restricted(), Some(true));

    let (dev, s) = attached(PipelineConfig::default(), HostCapabilities::default());
    s.on_device_arrived().unwrap();
    assert_eq!(dev.interface_restricted(), None);
}

#[tokio::test]
async fn restriction_failure_does_not_block_arrival() {
    let caps = HostCapabilities { interface_property_data: true };
    let (dev, s) = attached(PipelineConfig::default(), caps);
    dev.fail_interface_restriction(TransferError::PipeHalted);
    s.on_device_arrived().unwrap();
    assert_eq!(s.state(), SessionState::Active);
    assert_eq!(dev.interface_restricted(), None);
}
