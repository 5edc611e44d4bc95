//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Address string
//!     → address.rs (normalise, default port 12457)
//!     → listener.rs (bind, accept loop, connection limits)
//!     → connection.rs (identity, lifecycle states)
//!     → Hand off to the protocol core
//!
//! Connection States:
//!     Connected → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Transport is plain TCP; any other duplex stream can be handed to the
//!   protocol core directly

pub mod address;
pub mod connection;
pub mod listener;
