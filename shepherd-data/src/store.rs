//! Typed per-collection stores.
//!
//! An [`EntityStore`] is the public-facing unit each feature area consumes:
//! reads go through the deduplicator and the query cache, writes go through
//! the optimistic delta ledger with scoped rollback, and committed writes
//! invalidate the collection's cache prefix and refresh any declared
//! dependent stores.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::Value;
use shepherd_core::{
    BackendErrorCode, DataError, DataResult, Entity, Filter, WriteOp,
};
use tokio::sync::watch;
use uuid::Uuid;

use crate::context::DataContext;
use crate::optimistic::DeltaLedger;

/// Snapshot of a store's UI-visible state.
///
/// `items` always reflects the last successful fetch plus any
/// currently-pending optimistic deltas layered on top, and never contains
/// two entries with the same identity. A failed refresh leaves `items`
/// untouched and only sets `error`.
#[derive(Debug, Clone)]
pub struct StoreState<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<DataError>,
}

impl<T> Default for StoreState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

/// A store that can be refreshed when another store's mutation affects its
/// denormalized view. Declared explicitly at wiring time, never discovered
/// by accident.
#[async_trait]
pub trait StoreRefetch: Send + Sync {
    fn collection(&self) -> &'static str;
    async fn refetch(&self);
}

struct StoreInner<T> {
    state: StoreState<T>,
    ledger: DeltaLedger<T>,
}

/// Typed store for one backend collection.
pub struct EntityStore<T: Entity> {
    ctx: Arc<DataContext>,
    inner: Mutex<StoreInner<T>>,
    state_tx: watch::Sender<StoreState<T>>,
    dependents: Mutex<Vec<Arc<dyn StoreRefetch>>>,
    /// For background tasks spawned from `&self` methods.
    weak_self: Weak<EntityStore<T>>,
}

impl<T: Entity> EntityStore<T> {
    pub(crate) fn new(ctx: Arc<DataContext>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(StoreState::default());
        Arc::new_cyclic(|weak| Self {
            ctx,
            inner: Mutex::new(StoreInner {
                state: StoreState::default(),
                ledger: DeltaLedger::new(),
            }),
            state_tx,
            dependents: Mutex::new(Vec::new()),
            weak_self: weak.clone(),
        })
    }

    /// Declare that committed mutations on this store must refresh
    /// `dependent` (its denormalized view includes this collection).
    pub fn with_dependent(&self, dependent: Arc<dyn StoreRefetch>) {
        lock(&self.dependents).push(dependent);
    }

    /// Logical query key for the cache and deduplicator.
    fn query_key(filter: Option<&Filter>) -> String {
        match filter {
            Some(filter) => format!("{}:{}", T::collection(), filter.key_fragment()),
            None => format!("{}:all", T::collection()),
        }
    }

    /// Cache prefix covering every read of this collection.
    fn cache_prefix() -> String {
        format!("{}:", T::collection())
    }

    pub fn state(&self) -> StoreState<T> {
        lock(&self.inner).state.clone()
    }

    pub fn items(&self) -> Vec<T> {
        lock(&self.inner).state.items.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreState<T>> {
        self.state_tx.subscribe()
    }

    /// Mutate the inner state under the lock, then broadcast a snapshot.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreInner<T>) -> R) -> R {
        let (result, snapshot) = {
            let mut inner = lock(&self.inner);
            let result = f(&mut inner);
            (result, inner.state.clone())
        };
        self.state_tx.send_replace(snapshot);
        result
    }

    /// Populate `items` from the backend through the dedupe + cache read
    /// path.
    ///
    /// No-op without an active session. On failure the stale `items` stay
    /// visible and only `error` is set; the error is also returned so the
    /// caller can react. A cache hit older than `stale_time` is served
    /// immediately while a background refresh reconciles it.
    pub async fn fetch(&self) -> DataResult<Vec<T>> {
        self.fetch_filtered(None).await
    }

    /// `fetch` with a filter scoping the read (and its cache key).
    pub async fn fetch_filtered(&self, filter: Option<Filter>) -> DataResult<Vec<T>> {
        if !self.ctx.connection().is_connected() {
            tracing::debug!(
                collection = T::collection(),
                "fetch skipped: no active session"
            );
            return Ok(self.items());
        }
        let backend = self.ctx.connection().client()?;
        let key = Self::query_key(filter.as_ref());
        self.mutate(|inner| inner.state.loading = true);

        let request_filter = filter.clone();
        let producer = async move {
            backend
                .read(T::collection(), request_filter.as_ref())
                .await
                .map(Value::Array)
                .map_err(DataError::from)
        };

        let result = self
            .ctx
            .cache()
            .get_or_fetch(&key, None, producer)
            .await
            .and_then(|read| {
                let rows: Vec<T> =
                    serde_json::from_value(read.value().as_ref().clone()).map_err(|err| {
                        DataError::Unknown {
                            code: BackendErrorCode::Internal,
                            reason: format!("undecodable rows for {key}: {err}"),
                        }
                    })?;
                Ok((rows, read.is_stale()))
            });

        match result {
            Ok((rows, is_stale)) => {
                let items = self.mutate(|inner| {
                    let mut items = dedupe_identities(rows);
                    inner.ledger.reapply(&mut items);
                    inner.state.items = items;
                    inner.state.loading = false;
                    inner.state.error = None;
                    inner.state.items.clone()
                });
                if is_stale {
                    self.spawn_revalidate(key, filter);
                }
                Ok(items)
            }
            Err(err) => {
                self.mutate(|inner| {
                    inner.state.loading = false;
                    inner.state.error = Some(err.clone());
                });
                if err == DataError::AuthExpired {
                    self.ctx.connection().report_fault(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Optimistically insert `item` and confirm it against the backend.
    pub async fn add(&self, item: T) -> DataResult<T> {
        let payload = encode(&item)?;
        self.apply_mutation(item.entity_id(), Some(item.clone()), WriteOp::Insert, payload)
            .await?;
        Ok(item)
    }

    /// Optimistically update `item` and confirm it against the backend.
    pub async fn update(&self, item: T) -> DataResult<T> {
        let payload = encode(&item)?;
        let id = item.entity_id();
        self.apply_mutation(id, Some(item.clone()), WriteOp::Update { id }, payload)
            .await?;
        Ok(item)
    }

    /// Optimistically remove the entity and confirm against the backend.
    pub async fn remove(&self, entity_id: Uuid) -> DataResult<()> {
        self.apply_mutation(
            entity_id,
            None,
            WriteOp::Delete { id: entity_id },
            Value::Null,
        )
        .await
    }

    /// The optimistic write protocol shared by add/update/remove.
    async fn apply_mutation(
        &self,
        entity_id: Uuid,
        proposed: Option<T>,
        op: WriteOp,
        payload: Value,
    ) -> DataResult<()> {
        // Writes need a live session up front; failing here means nothing
        // was applied locally.
        let backend = self.ctx.connection().client()?;

        let delta_id = self.mutate(|inner| {
            inner
                .ledger
                .begin(&mut inner.state.items, entity_id, proposed)
        });

        match backend.write(T::collection(), op, payload).await {
            Ok(_ack) => {
                self.mutate(|inner| {
                    inner.ledger.commit(delta_id);
                    inner.state.error = None;
                });
                let dropped = self.ctx.cache().invalidate_prefix(&Self::cache_prefix());
                tracing::debug!(
                    collection = T::collection(),
                    %entity_id,
                    dropped,
                    "optimistic write committed"
                );
                // The ack may carry server-derived fields (timestamps,
                // denormalized joins); reconcile them off the hot path.
                self.spawn_reconcile();
                self.refresh_dependents().await;
                Ok(())
            }
            Err(backend_err) => {
                let err = DataError::from(backend_err);
                self.mutate(|inner| {
                    inner
                        .ledger
                        .rollback(&mut inner.state.items, delta_id);
                    inner.state.error = Some(err.clone());
                });
                tracing::warn!(
                    collection = T::collection(),
                    %entity_id,
                    %err,
                    "optimistic write rolled back"
                );
                if err == DataError::AuthExpired {
                    self.ctx.connection().report_fault(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Background refetch after a commit, reconciling server-derived
    /// fields without blocking the caller.
    fn spawn_reconcile(&self) {
        let Some(store) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = store.fetch().await {
                tracing::warn!(
                    collection = T::collection(),
                    %err,
                    "post-commit reconcile fetch failed"
                );
            }
        });
    }

    /// Background refresh of a stale-but-served cache entry.
    fn spawn_revalidate(&self, key: String, filter: Option<Filter>) {
        let Some(store) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            store.ctx.cache().invalidate(&key);
            if let Err(err) = store.fetch_filtered(filter).await {
                tracing::warn!(key, %err, "stale revalidation failed");
            }
        });
    }

    async fn refresh_dependents(&self) {
        let dependents: Vec<Arc<dyn StoreRefetch>> = lock(&self.dependents).clone();
        for dependent in dependents {
            tracing::debug!(
                collection = T::collection(),
                dependent = dependent.collection(),
                "refreshing dependent store"
            );
            dependent.refetch().await;
        }
    }
}

#[async_trait]
impl<T: Entity> StoreRefetch for EntityStore<T> {
    fn collection(&self) -> &'static str {
        T::collection()
    }

    /// Dependent refresh never propagates its error into the triggering
    /// store; the dependent records it in its own state. Cached reads are
    /// dropped first since the mutation changed server-derived fields this
    /// store denormalizes.
    async fn refetch(&self) {
        self.ctx.cache().invalidate_prefix(&Self::cache_prefix());
        let _ = self.fetch().await;
    }
}

/// Last-wins duplicate suppression preserving first-seen order.
fn dedupe_identities<T: Entity>(rows: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(slot) = out.iter_mut().find(|i| i.entity_id() == row.entity_id()) {
            *slot = row;
        } else {
            out.push(row);
        }
    }
    out
}

fn encode<T: Entity>(item: &T) -> DataResult<Value> {
    serde_json::to_value(item).map_err(|err| DataError::Unknown {
        code: BackendErrorCode::Internal,
        reason: format!("payload serialization failed: {err}"),
    })
}

fn lock<M>(mutex: &Mutex<M>) -> MutexGuard<'_, M> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// TESTS
// =============================================================================
