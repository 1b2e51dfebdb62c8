//! Connection manager: handshake, backoff, fault reporting.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use shepherd_core::{Backend, DataError, DataLayerConfig, DataResult};
use tokio::sync::watch;

use super::state::{ConnectionPhase, ConnectionState, StateCell};

/// Owns the singleton backend handle for one data context and shields all
/// other components from raw connection failures.
///
/// State machine: `Disconnected → Connecting → Connected`, back to
/// `Disconnected` on handshake failure (with retry scheduling), detected
/// fault, or intentional [`ConnectionManager::disconnect`].
pub struct ConnectionManager {
    backend: Arc<dyn Backend>,
    config: DataLayerConfig,
    state: StateCell,
    handle: Mutex<Option<Arc<dyn Backend>>>,
    /// Serializes concurrent `initialize` calls so they observe idempotency
    /// instead of racing separate handshakes.
    init_lock: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn Backend>, config: DataLayerConfig) -> Self {
        Self {
            backend,
            config,
            state: StateCell::new(),
            handle: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Establish the connection, retrying transient probe failures with
    /// exponential backoff (`retry_delay * 2^attempt`, up to `max_retries`
    /// retries) under an overall `connection_timeout` ceiling.
    ///
    /// Idempotent: if already connected, returns the existing handle.
    /// Non-retryable failures (for example an expired session) fail
    /// immediately without consuming retry budget. The terminal error is
    /// recorded in [`ConnectionState`] either way.
    pub async fn initialize(&self) -> DataResult<Arc<dyn Backend>> {
        let _guard = self.init_lock.lock().await;
        if self.state.current().is_connected() {
            if let Some(handle) = lock_handle(&self.handle).clone() {
                return Ok(handle);
            }
        }

        let started = Instant::now();
        let ceiling = self.config.connection_timeout();
        self.state.publish(|s| {
            s.phase = ConnectionPhase::Connecting;
            s.error = None;
        });

        let mut attempt: u32 = 0;
        loop {
            self.state.mark_attempt(attempt);
            let remaining = ceiling.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return self.fail(DataError::Connection {
                    reason: format!(
                        "handshake exceeded the {}ms ceiling",
                        self.config.connection_timeout_ms
                    ),
                });
            }

            let err = match tokio::time::timeout(remaining, self.backend.probe()).await {
                Ok(Ok(())) => {
                    *lock_handle(&self.handle) = Some(Arc::clone(&self.backend));
                    self.state.publish(|s| s.phase = ConnectionPhase::Connected);
                    tracing::info!(attempts = attempt + 1, "backend connection established");
                    return Ok(Arc::clone(&self.backend));
                }
                Ok(Err(backend_err)) => DataError::from(backend_err),
                Err(_) => DataError::Connection {
                    reason: format!(
                        "handshake exceeded the {}ms ceiling",
                        self.config.connection_timeout_ms
                    ),
                },
            };

            if !err.is_retryable() {
                tracing::warn!(%err, "non-retryable handshake failure");
                return self.fail(err);
            }
            if attempt >= self.config.max_retries {
                tracing::warn!(attempts = attempt + 1, %err, "retry budget exhausted");
                return self.fail(err);
            }

            let delay = jittered(
                backoff_delay(self.config.retry_delay(), attempt),
                self.config.backoff_jitter_ms,
            );
            if started.elapsed() + delay >= ceiling {
                tracing::warn!(%err, "backoff would exceed the connection ceiling");
                return self.fail(err);
            }
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                %err,
                "probe failed; backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn fail(&self, err: DataError) -> DataResult<Arc<dyn Backend>> {
        self.state.publish(|s| {
            s.phase = ConnectionPhase::Disconnected;
            s.error = Some(err.clone());
        });
        Err(err)
    }

    /// The active backend handle, or `NotInitialized` before a successful
    /// `initialize` (or after a disconnect/fault).
    pub fn client(&self) -> DataResult<Arc<dyn Backend>> {
        if !self.state.current().is_connected() {
            return Err(DataError::NotInitialized);
        }
        lock_handle(&self.handle)
            .clone()
            .ok_or(DataError::NotInitialized)
    }

    pub fn is_connected(&self) -> bool {
        self.state.current().is_connected()
    }

    /// Intentional teardown (e.g. sign-out): releases the handle and resets
    /// the published state to its initial values.
    pub fn disconnect(&self) {
        *lock_handle(&self.handle) = None;
        self.state.publish(|s| *s = ConnectionState::initial());
        tracing::info!("backend connection released");
    }

    /// A store detected a fault on the live connection (session expiry or a
    /// dropped transport): transition `Connected → Disconnected` and record
    /// the error. Reconnection is an explicit `initialize` call, typically
    /// after re-authentication.
    pub fn report_fault(&self, err: DataError) {
        if !self.state.current().is_connected() {
            return;
        }
        tracing::warn!(%err, "connection fault reported");
        *lock_handle(&self.handle) = None;
        self.state.publish(|s| {
            s.phase = ConnectionPhase::Disconnected;
            s.error = Some(err);
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

/// Exponential backoff delay for the given 0-based attempt.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn jittered(delay: Duration, jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return delay;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .subsec_nanos() as u64;
    delay.saturating_add(Duration::from_millis(nanos % jitter_ms))
}

fn lock_handle(
    handle: &Mutex<Option<Arc<dyn Backend>>>,
) -> MutexGuard<'_, Option<Arc<dyn Backend>>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// TESTS
// =============================================================================
