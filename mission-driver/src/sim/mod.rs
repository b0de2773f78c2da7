//! Software stand-ins for the UDEFX2 board.
//!
//! [`ScriptedTarget`] parks every transfer until the caller completes it by
//! hand and is what the pipeline tests drive. [`Udefx2Emulator`] behaves
//! like the real firmware on its own thread and backs the host binary.

pub mod emulator;
pub mod scripted;

pub use emulator::Udefx2Emulator;
pub use scripted::ScriptedTarget;
