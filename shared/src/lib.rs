#![cfg_attr(feature = "kernel", no_std)]

//! Wire-level definitions shared by every UDEFX2 component: which pipes
//! exist, what the interrupt endpoint says, and how large a transfer may be.

pub mod constants;
pub mod endpoint;
pub mod notification;

pub use endpoint::Endpoint;
pub use notification::{Notification, NotificationError};
