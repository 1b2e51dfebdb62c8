//! Backend connection supervision.
//!
//! One logical connection per [`crate::context::DataContext`]: the manager
//! owns the handshake, timeout enforcement, and exponential-backoff retry;
//! every transition is published through [`ConnectionState`] so stores can
//! gate their operations on reachability.

mod manager;
mod state;

pub use manager::{backoff_delay, ConnectionManager};
pub use state::{ConnectionPhase, ConnectionState};
