//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → servers stop accepting → sessions closed → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
