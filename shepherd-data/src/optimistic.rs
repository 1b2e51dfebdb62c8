//! Optimistic mutation bookkeeping.
//!
//! A mutation is applied to the in-memory items synchronously, recorded as a
//! pending [`OptimisticDelta`], and settled when the remote write resolves:
//! committed deltas are discarded (the items already reflect them), failed
//! deltas roll back. Rollback is scoped to the specific delta: when a later
//! still-pending delta exists for the same entity, the failed delta's
//! `previous` is spliced into it instead of clobbering the visible value.
//! This is implemented once here so every store shares the same rollback
//! semantics.

use shepherd_core::Entity;
use uuid::Uuid;

/// Settlement status of an optimistic delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaStatus {
    Pending,
    Committed,
    RolledBack,
}

/// One local-first mutation awaiting server confirmation.
///
/// `previous`/`proposed` are `None` for absence: an insert is
/// `None → Some`, a removal `Some → None`.
#[derive(Debug, Clone)]
pub struct OptimisticDelta<T> {
    pub delta_id: Uuid,
    pub entity_id: Uuid,
    pub previous: Option<T>,
    pub proposed: Option<T>,
    pub status: DeltaStatus,
    /// Application order; rollback scoping depends on it.
    seq: u64,
}

/// The set of unsettled deltas for one store.
#[derive(Debug)]
pub struct DeltaLedger<T> {
    deltas: Vec<OptimisticDelta<T>>,
    next_seq: u64,
}

impl<T> Default for DeltaLedger<T> {
    fn default() -> Self {
        Self {
            deltas: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<T: Entity> DeltaLedger<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a mutation: capture the currently visible value as `previous`
    /// (which may itself be a still-optimistic value from an earlier
    /// pending delta), apply `proposed` to `items`, and record the delta.
    pub fn begin(&mut self, items: &mut Vec<T>, entity_id: Uuid, proposed: Option<T>) -> Uuid {
        let previous = items.iter().find(|i| i.entity_id() == entity_id).cloned();
        apply_value(items, entity_id, proposed.clone());

        let delta_id = Uuid::now_v7();
        self.deltas.push(OptimisticDelta {
            delta_id,
            entity_id,
            previous,
            proposed,
            status: DeltaStatus::Pending,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        delta_id
    }

    /// The remote write succeeded: the items already reflect the proposed
    /// value, so the delta is discarded. Returns the settled delta, or
    /// `None` if it was unknown.
    pub fn commit(&mut self, delta_id: Uuid) -> Option<OptimisticDelta<T>> {
        let index = self.deltas.iter().position(|d| d.delta_id == delta_id)?;
        let mut delta = self.deltas.remove(index);
        delta.status = DeltaStatus::Committed;
        Some(delta)
    }

    /// The remote write failed: undo exactly this delta's effect.
    ///
    /// If a later still-pending delta exists for the same entity, the
    /// visible value belongs to that delta, so only its `previous` is
    /// rewritten to skip over the failed mutation. Otherwise the visible
    /// value reverts to this delta's `previous`.
    pub fn rollback(&mut self, items: &mut Vec<T>, delta_id: Uuid) -> Option<OptimisticDelta<T>> {
        let index = self.deltas.iter().position(|d| d.delta_id == delta_id)?;
        let mut delta = self.deltas.remove(index);
        delta.status = DeltaStatus::RolledBack;

        let successor = self
            .deltas
            .iter_mut()
            .filter(|d| d.entity_id == delta.entity_id && d.seq > delta.seq)
            .min_by_key(|d| d.seq);
        match successor {
            Some(later) => later.previous = delta.previous.clone(),
            None => apply_value(items, delta.entity_id, delta.previous.clone()),
        }
        Some(delta)
    }

    /// Re-layer all pending deltas over freshly fetched base items, in
    /// application order. Called after a successful fetch so in-flight
    /// mutations stay visible.
    pub fn reapply(&self, items: &mut Vec<T>) {
        for delta in &self.deltas {
            apply_value(items, delta.entity_id, delta.proposed.clone());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.deltas.len()
    }

    pub fn has_pending_for(&self, entity_id: Uuid) -> bool {
        self.deltas.iter().any(|d| d.entity_id == entity_id)
    }
}

/// Replace, insert, or remove the item with the given identity. The items
/// list never ends up with two entries for one identity.
fn apply_value<T: Entity>(items: &mut Vec<T>, entity_id: Uuid, value: Option<T>) {
    match value {
        Some(value) => {
            if let Some(slot) = items.iter_mut().find(|i| i.entity_id() == entity_id) {
                *slot = value;
            } else {
                items.push(value);
            }
        }
        None => items.retain(|i| i.entity_id() != entity_id),
    }
}

// =============================================================================
// TESTS
// =============================================================================
