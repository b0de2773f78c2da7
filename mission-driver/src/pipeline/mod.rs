//! Mission pipeline
//! ================
//! Ties the three UDEFX2 pipes into one handshake:
//!
//! ```text
//!   submit ─▶ queue ─▶ bulk-out ─▶ (interrupt 0x10) ─▶ bulk-in ─▶ caller
//! ```
//!
//! Everything mutable for one device lives in a single `Shared` block behind
//! one mutex (see `session.rs`). Handlers only record effects while holding
//! it; the session runs them once the guard is gone.

mod correlator;
mod effects;
mod handle;
mod lifecycle;
mod mission;
mod queue;
mod session;
mod watch;

pub use correlator::{CorrelatorState, ProtocolViolation};
pub use handle::MissionHandle;
pub use lifecycle::{SessionState, SuspendPolicy};
pub use mission::{MissionId, MissionRequest, MissionResponse, MissionResult};
pub use session::{DeviceSession, SessionSnapshot};
