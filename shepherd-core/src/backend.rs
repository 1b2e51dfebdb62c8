//! Backend collaborator trait
//!
//! The data layer treats the hosted backend as an opaque request/response
//! channel keyed by collection name and filter. Concrete transports live
//! outside this workspace and are injected as `Arc<dyn Backend>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackendError;
use crate::Timestamp;

/// Filter operator for read queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equal to
    Eq,
    /// Contains substring (for strings)
    Contains,
    /// In list of values
    In,
}

/// A single-field filter expression for collection reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field to filter on
    pub field: String,
    /// Operator to apply
    pub op: FilterOp,
    /// Value to compare against (JSON value for flexibility)
    pub value: serde_json::Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Equality filter shorthand.
    pub fn eq(field: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Deterministic fragment for logical query keys. Two equal filters
    /// always produce the same fragment, so cached reads collapse.
    pub fn key_fragment(&self) -> String {
        let op = match self.op {
            FilterOp::Eq => "eq",
            FilterOp::Contains => "contains",
            FilterOp::In => "in",
        };
        format!("{}:{}:{}", self.field, op, self.value)
    }
}

/// Mutation kind for `Backend::write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    Insert,
    Update { id: Uuid },
    Delete { id: Uuid },
}

/// Acknowledgement of a committed write.
///
/// `server_time` is a server-computed field the client cannot know locally,
/// which is why committed optimistic writes trigger a reconciling refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteAck {
    pub id: Uuid,
    pub server_time: Timestamp,
}

/// The hosted backend service, reduced to the three calls the data layer
/// needs. Any non-success response carries a stable [`BackendError`] code.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Lightweight reachability and session probe.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Read rows from a named collection, optionally filtered.
    async fn read(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<serde_json::Value>, BackendError>;

    /// Apply a mutation to a named collection.
    async fn write(
        &self,
        collection: &str,
        op: WriteOp,
        payload: serde_json::Value,
    ) -> Result<WriteAck, BackendError>;
}

// =============================================================================
// TESTS
// =============================================================================
