use async_trait::async_trait;
use serde_json::Value;

use crate::error::BzResult;
use crate::patch::PatchOp;
use crate::query::{Condition, ListQuery};
use crate::record::{RecordId, Table};
use crate::Document;

/// How [`RecordStore::array_remove`] picks the elements to drop.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayMatch {
    /// Elements equal to this value.
    Value(Value),
    /// Object elements whose `name` field equals `value`.
    Field { name: String, value: Value },
}

impl ArrayMatch {
    pub fn matches(&self, element: &Value) -> bool {
        match self {
            Self::Value(value) => element == value,
            Self::Field { name, value } => element.get(name) == Some(value),
        }
    }
}

/// Document storage backend. Every mutating call that succeeds publishes
/// exactly one change event once the write is committed.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new document. `id`, `created_at` and `updated_at` are stamped
    /// by the store and override anything in `fields`.
    async fn create(&self, id: &RecordId, fields: Document) -> BzResult<Document>;
    async fn select(&self, id: &RecordId) -> BzResult<Option<Document>>;
    async fn exists(&self, id: &RecordId) -> BzResult<bool>;
    /// Apply patch operations; `NotFound` when the record is missing.
    async fn patch(&self, id: &RecordId, ops: &[PatchOp]) -> BzResult<Document>;
    /// Remove a record, returning its last state.
    async fn delete(&self, id: &RecordId) -> BzResult<Option<Document>>;
    async fn list(&self, query: &ListQuery) -> BzResult<Vec<Document>>;
    async fn count(&self, table: Table, conditions: &[Condition]) -> BzResult<usize>;
    /// Sum of a numeric field across matching records; non-numeric values
    /// count as zero.
    async fn sum(&self, table: Table, field: &str, conditions: &[Condition]) -> BzResult<f64>;
    /// Push onto an array field, creating it when absent. `None` when the
    /// record is missing.
    async fn array_append(
        &self,
        id: &RecordId,
        field: &str,
        value: Value,
    ) -> BzResult<Option<Document>>;
    async fn array_remove(
        &self,
        id: &RecordId,
        field: &str,
        matcher: &ArrayMatch,
    ) -> BzResult<Option<Document>>;
    /// Delete every matching record, returning how many went away.
    async fn delete_where(&self, table: Table, conditions: &[Condition]) -> BzResult<usize>;
}
