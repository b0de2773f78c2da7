//! Device lifecycle
//! ================
//! Host power and PnP callbacks mapped onto the session:
//!
//! ```text
//!   Suspended ──arrived──▶ Active ──suspending──▶ Suspending ──quiescent──▶ Suspended
//!       │                    │                        │
//!       └────────────────────┴──────removed───────────┴──────────────────▶ Removed
//! ```
//!
//! A session starts `Suspended` (attached, not yet in D0). `Removed` is
//! terminal.

use std::{fmt, str::FromStr};

use tokio::sync::oneshot;

use crate::config::ConfigError;
use crate::error::MissionError;
use crate::pipeline::session::DeviceSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Suspending,
    Suspended,
    Removed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Active => "active",
            SessionState::Suspending => "suspending",
            SessionState::Suspended => "suspended",
            SessionState::Removed => "removed",
        })
    }
}

/// What `on_device_suspending` does with a mission still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspendPolicy {
    /// Let it finish, up to the configured drain timeout, then cancel it.
    #[default]
    Drain,
    /// Cancel it at once.
    Cancel,
}

impl FromStr for SuspendPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drain" => Ok(SuspendPolicy::Drain),
            "cancel" => Ok(SuspendPolicy::Cancel),
            other => Err(ConfigError::InvalidSuspendPolicy(other.into())),
        }
    }
}

pub(crate) struct Lifecycle {
    pub(crate) state: SessionState,
    /// Woken when a pending suspend completes; dropped on removal.
    pub(crate) drain_waiters: Vec<oneshot::Sender<()>>,
    interface_marked: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle {
            state: SessionState::Suspended,
            drain_waiters: Vec::new(),
            interface_marked: false,
        }
    }
}

impl DeviceSession {
    /// D0 entry, both first arrival and resume. Restarts the interrupt watch
    /// and admits whatever was held in the queue.
    pub fn on_device_arrived(&self) -> Result<(), MissionError> {
        let caps = self.inner.caps;
        self.inner.update(|s, cx, fx| {
            match s.lifecycle.state {
                SessionState::Active => return Ok(()),
                SessionState::Suspended => {}
                state @ (SessionState::Suspending | SessionState::Removed) => {
                    udefx_log!(log::Level::Warn, "lifecycle", "arrival refused while {}", state);
                    return Err(MissionError::SessionNotActive { state });
                }
            }

            s.lifecycle.state = SessionState::Active;
            if caps.interface_property_data && !s.lifecycle.interface_marked {
                s.lifecycle.interface_marked = true;
                fx.mark_interface_restricted();
            }
            s.watch.start(cx, fx);
            udefx_log!(log::Level::Info, "lifecycle", "session active, {} mission(s) queued", s.queue.len());
            Ok(())
        })
    }

    /// D0 exit. Resolves once the session is `Suspended`: nothing in flight
    /// and the interrupt watch stopped. Queued missions stay queued.
    pub async fn on_device_suspending(&self) -> Result<(), MissionError> {
        let policy = self.inner.config.suspend_policy;
        let (tx, mut rx) = oneshot::channel();

        self.inner.update(|s, _, fx| match s.lifecycle.state {
            SessionState::Removed => Err(MissionError::SessionNotActive { state: SessionState::Removed }),
            SessionState::Suspended => {
                let _ = tx.send(());
                Ok(())
            }
            state => {
                if state == SessionState::Active {
                    udefx_log!(log::Level::Info, "lifecycle", "suspending ({:?})", policy);
                    s.lifecycle.state = SessionState::Suspending;
                    if policy == SuspendPolicy::Cancel {
                        s.correlator.cancel_for_suspend(fx);
                    }
                }
                s.lifecycle.drain_waiters.push(tx);
                Ok(())
            }
        })?;

        if policy == SuspendPolicy::Drain {
            let limit = self.inner.config.suspend_drain_timeout;
            match tokio::time::timeout(limit, &mut rx).await {
                Ok(done) => return done.map_err(|_| removed()),
                Err(_) => {
                    udefx_log!(
                        log::Level::Warn,
                        "lifecycle",
                        "in-flight mission did not drain within {}, cancelling",
                        humantime::format_duration(limit)
                    );
                    self.inner.update(|s, _, fx| {
                        if s.lifecycle.state == SessionState::Suspending {
                            s.correlator.cancel_for_suspend(fx);
                        }
                    });
                }
            }
        }

        rx.await.map_err(|_| removed())
    }

    /// Surprise removal. Fails everything in flight and queued; terminal.
    pub fn on_device_removed(&self) {
        self.inner.update(|s, _, fx| {
            if s.lifecycle.state == SessionState::Removed {
                return;
            }
            udefx_log!(
                log::Level::Warn,
                "lifecycle",
                "device removed ({}, {} queued)",
                s.correlator.current().map_or_else(|| "idle".to_string(), |m| format!("{m} in flight")),
                s.queue.len()
            );
            s.lifecycle.state = SessionState::Removed;
            s.watch.stop(fx);
            s.correlator.abort_removed(fx);
            for m in s.queue.drain() {
                let err = if m.cancelled { MissionError::Cancelled } else { removed() };
                fx.resolve(m.id, m.sink, Err(err));
            }
            // Pending suspends observe the removal through their dropped sender.
            s.lifecycle.drain_waiters.clear();
        });
    }

    /// The host reset the interrupt pipe after a failure. Clears the loss
    /// and, if the session is active, re-arms the watch.
    pub fn on_pipe_reset(&self) {
        self.inner.update(|s, cx, fx| {
            if s.watch.lost().is_none() {
                return;
            }
            s.watch.reset();
            if s.lifecycle.state == SessionState::Active {
                udefx_log!(log::Level::Info, "watch", "interrupt pipe reset, watch restarted");
                s.watch.start(cx, fx);
            }
        });
    }
}

fn removed() -> MissionError {
    MissionError::SessionNotActive { state: SessionState::Removed }
}
