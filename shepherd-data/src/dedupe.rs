//! Request deduplication (single-flight).
//!
//! Collapses N concurrent calls for the same logical operation into one
//! underlying call. All waiters receive the identical outcome, which is why
//! [`shepherd_core::DataError`] is `Clone`. Once the in-flight call settles,
//! the key is cleared and a subsequent call starts fresh. Waiters are
//! detachable: the call itself runs on a spawned task, so abandoning every
//! waiter does not cancel it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use shepherd_core::{BackendErrorCode, DataError, DataResult};

/// Outcome shared between all waiters of one in-flight request.
///
/// The value travels behind an `Arc` so fanning out to N waiters never
/// clones the row payload itself.
type SharedOutcome = Shared<BoxFuture<'static, DataResult<Arc<serde_json::Value>>>>;

type InFlightMap = HashMap<String, SharedOutcome>;

/// Collapses concurrent identical in-flight requests into one underlying call.
///
/// At most one in-flight request exists per key at any instant; the entry is
/// created when a request starts and destroyed when it settles, regardless of
/// how many callers awaited it.
#[derive(Default)]
pub struct RequestDeduplicator {
    in_flight: Arc<Mutex<InFlightMap>>,
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests currently in flight.
    pub fn in_flight_count(&self) -> usize {
        lock_map(&self.in_flight).len()
    }

    /// Run `request` under single-flight semantics for `key`.
    ///
    /// If a call for `key` is already in flight, the caller awaits that
    /// call's outcome instead of starting a new one. There is no per-waiter
    /// retry: a rejected call rejects every waiter with the same error.
    ///
    /// The request runs on its own task, so a caller that discards its
    /// future abandons only its wait: the underlying call still settles,
    /// still updates whatever shared state its closure touches, and still
    /// clears the key.
    ///
    /// The check-and-insert happens under one lock acquisition with no
    /// suspension point in between, so two callers can never both conclude
    /// "not in flight" for the same key.
    pub async fn dedupe<F>(&self, key: &str, request: F) -> DataResult<Arc<serde_json::Value>>
    where
        F: Future<Output = DataResult<Arc<serde_json::Value>>> + Send + 'static,
    {
        let shared = {
            let mut map = lock_map(&self.in_flight);
            if let Some(existing) = map.get(key) {
                tracing::debug!(key, "joining in-flight request");
                existing.clone()
            } else {
                let owned_key = key.to_string();
                let registry = Arc::clone(&self.in_flight);
                let panic_key = owned_key.clone();
                let panic_registry = Arc::clone(&registry);
                let task = tokio::spawn(async move {
                    let outcome = request.await;
                    // Clear the key before any waiter observes the outcome,
                    // so the next call for it starts fresh.
                    lock_map(&registry).remove(&owned_key);
                    outcome
                });
                let fut = async move {
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(join_err) => {
                            // The task's own cleanup never ran.
                            lock_map(&panic_registry).remove(&panic_key);
                            Err(DataError::Unknown {
                                code: BackendErrorCode::Internal,
                                reason: format!("in-flight request task failed: {join_err}"),
                            })
                        }
                    }
                }
                .boxed()
                .shared();
                map.insert(key.to_string(), fut.clone());
                fut
            }
        };
        shared.await
    }
}

/// A poisoned map only means another caller panicked mid-insert; the map
/// itself is still a valid key set, so recover rather than propagate.
fn lock_map(map: &Mutex<InFlightMap>) -> MutexGuard<'_, InFlightMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// TESTS
// =============================================================================
