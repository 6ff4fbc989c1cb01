//! # Events Module
//!
//! Event-driven delivery of engine output to any UI layer.
//!
//! The engine never calls back into its consumers directly: decoded
//! images, folder snapshots and thumbnail rows all arrive as [`Event`]
//! values on a channel the consumer drains at its own pace.

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::{Event, PresentImage};
