//! Shepherd Data - client-side data-access resilience layer
//!
//! Everything between the UI and the hosted backend lives here:
//!
//! - [`connection`] supervises the single logical backend connection
//!   (handshake, exponential-backoff reconnection, fault reporting) and
//!   publishes [`connection::ConnectionState`] to subscribers.
//! - [`cache`] memoizes read results under logical query keys with TTL
//!   expiry, LRU eviction, and prefix invalidation.
//! - [`dedupe`] collapses concurrent identical requests into one
//!   underlying call.
//! - [`optimistic`] applies local mutations immediately and reconciles
//!   them against eventual server confirmation, with delta-scoped rollback.
//! - [`store`] composes the above into the `fetch/add/update/remove`
//!   surface each feature area consumes.
//! - [`context`] wires the pieces into an explicitly-constructed
//!   [`context::DataContext`] so tests and the app own their instances
//!   instead of sharing hidden globals.

pub mod cache;
pub mod connection;
pub mod context;
pub mod dedupe;
pub mod optimistic;
pub mod store;

pub use cache::{CacheStats, CachedRead, QueryCache};
pub use connection::{ConnectionManager, ConnectionPhase, ConnectionState};
pub use context::{AppStores, DataContext};
pub use dedupe::RequestDeduplicator;
pub use optimistic::{DeltaLedger, DeltaStatus, OptimisticDelta};
pub use store::{EntityStore, StoreRefetch, StoreState};
