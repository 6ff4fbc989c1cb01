//! # Image Cache Engine
//!
//! An asynchronous image decode and thumbnail caching engine for
//! folder-based image browsers.
//!
//! ## Core Philosophy
//! - **Never block the caller** - every operation is fire-and-forget,
//!   results arrive as events
//! - **Never crash on bad images** - codec faults become per-request
//!   errors, not panics
//! - **One writer per database** - all SQLite access for a folder is
//!   serialized through a single worker thread
//!
//! ## Architecture
//! The library is split into a core engine (GUI-agnostic) and its event
//! surface:
//! - `core` - caches, decoding, persistence and the engine threads
//! - `events` - event-driven result delivery (GUI-ready)
//! - `error` - engine error types

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use crate::core::{DecodingStrategy, EngineConfig, ImageEngine};
pub use error::{EngineError, Result};
pub use events::{Event, EventChannel, EventReceiver, EventSender, PresentImage};

/// Initialize tracing for the library
///
/// This should be called by the application entry point (CLI or GUI).
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default tracing subscriber");
}
