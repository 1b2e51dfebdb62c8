//! Shepherd Test Utilities
//!
//! Centralized test infrastructure for the Shepherd workspace:
//! - A scriptable in-memory mock backend
//! - Entity fixtures for common scenarios
//! - Proptest generators for configuration and filters

// Re-export core types for convenience
pub use shepherd_core::{
    Backend, BackendError, BackendErrorCode, CheckIn, CheckInId, CheckInMethod, Contact,
    ContactId, DataError, DataLayerConfig, DataResult, Entity, EntityIdType, Filter, FilterOp,
    Journey, JourneyId, JourneyStage, PrayerRequest, PrayerRequestId, PrayerRequestStatus,
    StageId, Timestamp, WriteAck, WriteOp,
};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// MOCK BACKEND
// ============================================================================

/// Scriptable in-memory [`Backend`].
///
/// Collections start empty (or seeded via [`MockBackend::seed`]). Probe and
/// write outcomes can be queued with `script_probe` / `script_write`; once a
/// queue runs dry the call succeeds. Every call is counted so tests can
/// assert how many round trips actually happened.
pub struct MockBackend {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    probe_script: Mutex<VecDeque<Result<(), BackendError>>>,
    read_script: Mutex<VecDeque<Result<(), BackendError>>>,
    write_script: Mutex<VecDeque<Result<(), BackendError>>>,
    probe_count: AtomicUsize,
    read_counts: Mutex<HashMap<String, usize>>,
    write_counts: Mutex<HashMap<String, usize>>,
    read_delay: Mutex<Option<Duration>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            probe_script: Mutex::new(VecDeque::new()),
            read_script: Mutex::new(VecDeque::new()),
            write_script: Mutex::new(VecDeque::new()),
            probe_count: AtomicUsize::new(0),
            read_counts: Mutex::new(HashMap::new()),
            write_counts: Mutex::new(HashMap::new()),
            read_delay: Mutex::new(None),
        }
    }

    /// Queue the outcome of the next unscripted `probe` call.
    pub fn script_probe(&self, outcome: Result<(), BackendError>) {
        lock(&self.probe_script).push_back(outcome);
    }

    /// Queue the outcome of the next unscripted `read` call.
    pub fn script_read(&self, outcome: Result<(), BackendError>) {
        lock(&self.read_script).push_back(outcome);
    }

    /// Queue the outcome of the next unscripted `write` call.
    pub fn script_write(&self, outcome: Result<(), BackendError>) {
        lock(&self.write_script).push_back(outcome);
    }

    /// Replace a collection's rows wholesale.
    pub fn seed(&self, collection: &str, rows: Vec<Value>) {
        lock(&self.collections).insert(collection.to_string(), rows);
    }

    /// Seed a collection from typed entities.
    pub fn seed_entities<T: Entity>(&self, rows: &[T]) {
        let rows = rows
            .iter()
            .map(|row| serde_json::to_value(row).unwrap())
            .collect();
        self.seed(T::collection(), rows);
    }

    /// Make every `read` sleep first, so tests can overlap concurrent reads.
    pub fn set_read_delay(&self, delay: Duration) {
        *lock(&self.read_delay) = Some(delay);
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_count.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self, collection: &str) -> usize {
        lock(&self.read_counts).get(collection).copied().unwrap_or(0)
    }

    pub fn write_calls(&self, collection: &str) -> usize {
        lock(&self.write_counts)
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    /// Current rows of a collection, as the backend stores them.
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        lock(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Does any top-level field of `row` hold this id? Entities name their id
/// field differently per collection, so match by value.
fn row_has_id(row: &Value, id: Uuid) -> bool {
    let id = id.to_string();
    row.as_object()
        .map(|fields| fields.values().any(|v| v.as_str() == Some(id.as_str())))
        .unwrap_or(false)
}

fn filter_matches(row: &Value, filter: &Filter) -> bool {
    let field = row.get(&filter.field);
    match filter.op {
        FilterOp::Eq => field == Some(&filter.value),
        FilterOp::Contains => match (field.and_then(Value::as_str), filter.value.as_str()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        FilterOp::In => filter
            .value
            .as_array()
            .map(|allowed| field.is_some_and(|v| allowed.contains(v)))
            .unwrap_or(false),
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn probe(&self) -> Result<(), BackendError> {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.probe_script).pop_front().unwrap_or(Ok(()))
    }

    async fn read(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Value>, BackendError> {
        let delay = *lock(&self.read_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        *lock(&self.read_counts)
            .entry(collection.to_string())
            .or_insert(0) += 1;
        if let Some(outcome) = lock(&self.read_script).pop_front() {
            outcome?;
        }

        let rows = self.rows(collection);
        Ok(match filter {
            Some(filter) => rows
                .into_iter()
                .filter(|row| filter_matches(row, filter))
                .collect(),
            None => rows,
        })
    }

    async fn write(
        &self,
        collection: &str,
        op: WriteOp,
        payload: Value,
    ) -> Result<WriteAck, BackendError> {
        *lock(&self.write_counts)
            .entry(collection.to_string())
            .or_insert(0) += 1;
        if let Some(outcome) = lock(&self.write_script).pop_front() {
            outcome?;
        }

        let mut collections = lock(&self.collections);
        let rows = collections.entry(collection.to_string()).or_default();
        let id = match op {
            WriteOp::Insert => {
                rows.push(payload);
                Uuid::now_v7()
            }
            WriteOp::Update { id } => {
                if let Some(row) = rows.iter_mut().find(|row| row_has_id(row, id)) {
                    *row = payload;
                } else {
                    return Err(BackendError::new(BackendErrorCode::NotFound, "no such row"));
                }
                id
            }
            WriteOp::Delete { id } => {
                rows.retain(|row| !row_has_id(row, id));
                id
            }
        };

        Ok(WriteAck {
            id,
            server_time: Utc::now(),
        })
    }
}

fn lock<M>(mutex: &Mutex<M>) -> MutexGuard<'_, M> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities for common testing scenarios.

    use super::*;

    pub fn contact(name: &str) -> Contact {
        let now = Utc::now();
        Contact {
            contact_id: ContactId::now_v7(),
            name: name.to_string(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            phone: None,
            journey_id: None,
            stage_id: None,
            last_check_in: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contact_on_journey(name: &str, journey: &Journey) -> Contact {
        let mut contact = contact(name);
        contact.journey_id = Some(journey.journey_id);
        contact.stage_id = journey.stages.first().map(|stage| stage.stage_id);
        contact
    }

    pub fn journey(name: &str, stage_names: &[&str]) -> Journey {
        let now = Utc::now();
        Journey {
            journey_id: JourneyId::now_v7(),
            name: name.to_string(),
            description: None,
            stages: stage_names
                .iter()
                .enumerate()
                .map(|(position, stage)| JourneyStage {
                    stage_id: StageId::now_v7(),
                    name: stage.to_string(),
                    position: position as i32,
                })
                .collect(),
            contact_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn check_in(contact: &Contact, method: CheckInMethod) -> CheckIn {
        let now = Utc::now();
        CheckIn {
            check_in_id: CheckInId::now_v7(),
            contact_id: contact.contact_id,
            method,
            occurred_at: now,
            summary: Some("caught up over coffee".to_string()),
            created_at: now,
        }
    }

    pub fn prayer_request(subject: &str) -> PrayerRequest {
        let now = Utc::now();
        PrayerRequest {
            request_id: PrayerRequestId::now_v7(),
            contact_id: None,
            subject: subject.to_string(),
            details: None,
            status: PrayerRequestStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Strategies for property-based tests.

    use super::*;
    use proptest::prelude::*;

    /// Configurations that pass validation.
    pub fn valid_config() -> impl Strategy<Value = DataLayerConfig> {
        (
            0u32..=8,
            1u64..=5_000,
            1_000u64..=120_000,
            0u64..=1_000,
            1usize..=2_000,
            1u64..=600_000,
        )
            .prop_flat_map(
                |(
                    max_retries,
                    retry_delay_ms,
                    connection_timeout_ms,
                    backoff_jitter_ms,
                    cache_max_entries,
                    cache_default_ttl_ms,
                )| {
                    (0..=cache_default_ttl_ms).prop_map(move |stale_time_ms| DataLayerConfig {
                        max_retries,
                        retry_delay_ms,
                        connection_timeout_ms,
                        backoff_jitter_ms,
                        cache_max_entries,
                        cache_default_ttl_ms,
                        stale_time_ms,
                        touch_on_read: false,
                    })
                },
            )
    }

    pub fn filter() -> impl Strategy<Value = Filter> {
        (
            "[a-z_]{1,12}",
            prop_oneof![
                Just(FilterOp::Eq),
                Just(FilterOp::Contains),
                Just(FilterOp::In)
            ],
            "[a-zA-Z0-9 ]{0,16}",
        )
            .prop_map(|(field, op, value)| Filter::new(field, op, serde_json::json!(value)))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_script_then_default_ok() {
        let backend = MockBackend::new();
        backend.script_probe(Err(BackendError::connection("refused")));

        assert!(backend.probe().await.is_err());
        assert!(backend.probe().await.is_ok());
        assert_eq!(backend.probe_calls(), 2);
    }

    #[tokio::test]
    async fn test_write_round_trip() {
        let backend = MockBackend::new();
        let ada = fixtures::contact("Ada");
        let payload = serde_json::to_value(&ada).unwrap();

        backend
            .write("contacts", WriteOp::Insert, payload.clone())
            .await
            .unwrap();
        assert_eq!(backend.rows("contacts").len(), 1);

        let mut renamed = ada.clone();
        renamed.name = "Ada L.".to_string();
        backend
            .write(
                "contacts",
                WriteOp::Update {
                    id: ada.entity_id(),
                },
                serde_json::to_value(&renamed).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(backend.rows("contacts")[0]["name"], "Ada L.");

        backend
            .write(
                "contacts",
                WriteOp::Delete {
                    id: ada.entity_id(),
                },
                Value::Null,
            )
            .await
            .unwrap();
        assert!(backend.rows("contacts").is_empty());
        assert_eq!(backend.write_calls("contacts"), 3);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let backend = MockBackend::new();
        let err = backend
            .write(
                "contacts",
                WriteOp::Update { id: Uuid::now_v7() },
                Value::Null,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, BackendErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_eq_filter_scopes_read() {
        let backend = MockBackend::new();
        let journey = fixtures::journey("Discipleship", &["New", "Growing"]);
        let on = fixtures::contact_on_journey("Ada", &journey);
        let off = fixtures::contact("Grace");
        backend.seed_entities(&[on.clone(), off]);

        let filter = Filter::eq(
            "journey_id",
            serde_json::json!(journey.journey_id),
        );
        let rows = backend.read("contacts", Some(&filter)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Ada");
    }
}
