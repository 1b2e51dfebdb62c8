//! Shepherd Core - Entity Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains the entity model for the relationship-management
//! domain (contacts, journeys, check-ins, prayer requests), the backend
//! collaborator trait, the client error taxonomy, and configuration.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

pub mod backend;
pub mod config;
pub mod error;

pub use backend::{Backend, Filter, FilterOp, WriteAck, WriteOp};
pub use config::{ConfigError, DataLayerConfig};
pub use error::{BackendError, BackendErrorCode, DataError, DataResult};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Common behavior for strongly-typed entity IDs.
pub trait EntityIdType: Copy + Eq + std::hash::Hash {
    /// Generate a fresh timestamp-sortable ID.
    fn now_v7() -> Self;
    /// Wrap an existing UUID.
    fn from_uuid(id: Uuid) -> Self;
    /// The underlying UUID.
    fn as_uuid(&self) -> Uuid;
}

macro_rules! entity_id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn now_v7() -> Self {
                Self(Uuid::now_v7())
            }

            fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

entity_id_type!(
    /// Identifier for a contact.
    ContactId
);
entity_id_type!(
    /// Identifier for a journey (pipeline).
    JourneyId
);
entity_id_type!(
    /// Identifier for a stage within a journey.
    StageId
);
entity_id_type!(
    /// Identifier for a check-in record.
    CheckInId
);
entity_id_type!(
    /// Identifier for a prayer request.
    PrayerRequestId
);

// ============================================================================
// ENTITY TRAIT
// ============================================================================

/// An entity that lives in a named backend collection and can pass through
/// the cache and store layers.
///
/// The collection name doubles as the cache key prefix for all reads of this
/// entity kind, so invalidating `"contacts:"` drops every cached contact read.
pub trait Entity:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Backend collection this entity kind is stored in.
    fn collection() -> &'static str;

    /// Identity of this instance, used for optimistic delta scoping and
    /// duplicate suppression in store state.
    fn entity_id(&self) -> Uuid;
}

// ============================================================================
// ENUMS
// ============================================================================

/// How a check-in happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInMethod {
    Call,
    Text,
    Visit,
    Email,
    Other,
}

/// Lifecycle of a prayer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrayerRequestStatus {
    Open,
    Answered,
    Archived,
}

// ============================================================================
// ENTITIES
// ============================================================================

/// A person being shepherded.
///
/// `journey_id`/`stage_id` place the contact on a pipeline board;
/// `last_check_in` is denormalized from the check-ins collection by the
/// server, which is why stores that mutate check-ins refetch contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub contact_id: ContactId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub journey_id: Option<JourneyId>,
    pub stage_id: Option<StageId>,
    pub last_check_in: Option<Timestamp>,
    pub notes: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for Contact {
    fn collection() -> &'static str {
        "contacts"
    }

    fn entity_id(&self) -> Uuid {
        self.contact_id.as_uuid()
    }
}

/// A stage within a journey's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyStage {
    pub stage_id: StageId,
    pub name: String,
    /// Board column ordering, left to right.
    pub position: i32,
}

/// A journey (pipeline) that contacts move through stage by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub journey_id: JourneyId,
    pub name: String,
    pub description: Option<String>,
    pub stages: Vec<JourneyStage>,
    /// Denormalized by the server: contacts currently on this journey.
    pub contact_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for Journey {
    fn collection() -> &'static str {
        "journeys"
    }

    fn entity_id(&self) -> Uuid {
        self.journey_id.as_uuid()
    }
}

impl Journey {
    /// Look up a stage by ID.
    pub fn stage(&self, stage_id: StageId) -> Option<&JourneyStage> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }
}

/// A recorded touch-point with a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub check_in_id: CheckInId,
    pub contact_id: ContactId,
    pub method: CheckInMethod,
    pub occurred_at: Timestamp,
    pub summary: Option<String>,
    pub created_at: Timestamp,
}

impl Entity for CheckIn {
    fn collection() -> &'static str {
        "check_ins"
    }

    fn entity_id(&self) -> Uuid {
        self.check_in_id.as_uuid()
    }
}

/// A prayer request, optionally tied to a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrayerRequest {
    pub request_id: PrayerRequestId,
    pub contact_id: Option<ContactId>,
    pub subject: String,
    pub details: Option<String>,
    pub status: PrayerRequestStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entity for PrayerRequest {
    fn collection() -> &'static str {
        "prayer_requests"
    }

    fn entity_id(&self) -> Uuid {
        self.request_id.as_uuid()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let raw = Uuid::now_v7();
        let id = ContactId::from_uuid(raw);
        assert_eq!(id.as_uuid(), raw);
        assert_eq!(Uuid::from(id), raw);
    }

    #[test]
    fn test_entity_ids_are_sortable() {
        let a = ContactId::now_v7();
        let b = ContactId::now_v7();
        assert!(a <= b);
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Contact::collection(), "contacts");
        assert_eq!(Journey::collection(), "journeys");
        assert_eq!(CheckIn::collection(), "check_ins");
        assert_eq!(PrayerRequest::collection(), "prayer_requests");
    }

    #[test]
    fn test_contact_serde_roundtrip() {
        let contact = Contact {
            contact_id: ContactId::now_v7(),
            name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
            phone: None,
            journey_id: Some(JourneyId::now_v7()),
            stage_id: Some(StageId::now_v7()),
            last_check_in: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&contact).unwrap();
        let back: Contact = serde_json::from_value(json).unwrap();
        assert_eq!(back, contact);
        assert_eq!(back.entity_id(), contact.contact_id.as_uuid());
    }

    #[test]
    fn test_journey_stage_lookup() {
        let stage_id = StageId::now_v7();
        let journey = Journey {
            journey_id: JourneyId::now_v7(),
            name: "Membership".to_string(),
            description: None,
            stages: vec![JourneyStage {
                stage_id,
                name: "Trial".to_string(),
                position: 0,
            }],
            contact_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(journey.stage(stage_id).unwrap().name, "Trial");
        assert!(journey.stage(StageId::now_v7()).is_none());
    }
}
