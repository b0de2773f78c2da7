// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod sim;
pub mod telemetry;
pub mod transfer;

pub use error::{MissionError, TransferError};
pub use pipeline::{DeviceSession, MissionHandle, MissionRequest, MissionResponse, SessionState};
pub use shared::{Endpoint, Notification};
