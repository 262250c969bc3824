//! The relational execution interface.
//!
//! The engine never talks to a database directly. It hands a [`Scope`] to a
//! [`QueryExecutor`] and gets ids, letter projections, counts or records
//! back. [`PgExecutor`] renders scopes to SQL; [`MemoryExecutor`] evaluates
//! them over in-memory tables.

mod memory;
mod postgres;

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub use memory::{MemoryExecutor, Row};
pub use postgres::PgExecutor;

use crate::error::ExecutionError;
use crate::scope::{FieldExpr, Scope};

/// How an eager-loaded association relates to the parent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeLink {
    /// The parent's `column` holds the child's id.
    BelongsTo { column: &'static str },
    /// Children hold the parent's id in `foreign_column`.
    HasMany { foreign_column: &'static str },
}

/// An association that may be loaded alongside records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub link: IncludeLink,
}

impl IncludeSpec {
    pub const fn belongs_to(name: &'static str, table: &'static str, column: &'static str) -> Self {
        Self {
            name,
            table,
            link: IncludeLink::BelongsTo { column },
        }
    }

    pub const fn has_many(
        name: &'static str,
        table: &'static str,
        foreign_column: &'static str,
    ) -> Self {
        Self {
            name,
            table,
            link: IncludeLink::HasMany { foreign_column },
        }
    }

    /// Child column and parent column that must be equal.
    fn columns(&self) -> (&'static str, &'static str) {
        match self.link {
            IncludeLink::BelongsTo { column } => ("id", column),
            IncludeLink::HasMany { foreign_column } => (foreign_column, "id"),
        }
    }

    /// Child column to match and the distinct keys to match it against.
    pub(crate) fn lookup(&self, parents: &[Record]) -> (&'static str, Vec<i64>) {
        let (child_column, parent_column) = self.columns();
        let mut seen = HashSet::new();
        let keys = parents
            .iter()
            .filter_map(|r| r.fields.get(parent_column).and_then(Value::as_i64))
            .filter(|k| seen.insert(*k))
            .collect();
        (child_column, keys)
    }

    /// Distribute loaded child rows onto their parents. Every parent gets
    /// an entry, empty when nothing matched.
    pub(crate) fn attach(&self, parents: &mut [Record], children: Vec<Map<String, Value>>) {
        let (child_column, parent_column) = self.columns();
        let mut by_key: HashMap<i64, Vec<Value>> = HashMap::new();
        for child in children {
            if let Some(key) = child.get(child_column).and_then(Value::as_i64) {
                by_key.entry(key).or_default().push(Value::Object(child));
            }
        }
        for parent in parents.iter_mut() {
            let matched = parent
                .fields
                .get(parent_column)
                .and_then(Value::as_i64)
                .and_then(|k| by_key.get(&k).cloned())
                .unwrap_or_default();
            parent.included.insert(self.name.to_string(), matched);
        }
    }
}

/// Records of one table for a bounded id set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    pub table: String,
    pub ids: Vec<i64>,
    pub includes: Vec<IncludeSpec>,
}

/// A loaded row plus its eager-loaded associations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: i64,
    pub fields: Map<String, Value>,
    pub included: BTreeMap<String, Vec<Value>>,
}

impl Record {
    /// Decode a JSON object row; the `id` field is required.
    pub fn from_json(value: Value) -> Result<Self, ExecutionError> {
        let Value::Object(fields) = value else {
            return Err(ExecutionError::Corrupt(format!("expected an object row, got {value}")));
        };
        let id = fields
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ExecutionError::Corrupt("row without an integer id".to_string()))?;
        Ok(Self {
            id,
            fields,
            included: BTreeMap::new(),
        })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Loaded association rows; empty if the include was not requested.
    pub fn included(&self, name: &str) -> &[Value] {
        self.included.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

/// A relational store the engine can submit scopes to.
///
/// Every method is a read-only round trip and safe to retry.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Ordered, distinct base ids matching the scope.
    async fn select_ids(&self, scope: &Scope) -> Result<Vec<i64>, ExecutionError>;

    /// Ordered `(id, title prefix)` pairs; the prefix is at most four
    /// characters and absent when the title is NULL.
    async fn select_letter_projection(
        &self,
        scope: &Scope,
        title: &FieldExpr,
    ) -> Result<Vec<(i64, Option<String>)>, ExecutionError>;

    /// Records for `request.ids` in no particular order. Unknown ids are
    /// skipped.
    async fn select_records(&self, request: &RecordRequest) -> Result<Vec<Record>, ExecutionError>;

    /// Number of distinct base ids matching the scope.
    async fn count(&self, scope: &Scope) -> Result<u64, ExecutionError>;
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_json(value).unwrap()
    }

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn rows_need_an_integer_id() {
        assert!(Record::from_json(json!({"name": "x"})).is_err());
        assert!(Record::from_json(json!([1])).is_err());
        assert_eq!(record(json!({"id": 4})).id, 4);
    }

    #[test]
    fn belongs_to_matches_parent_column() {
        let include = IncludeSpec::belongs_to("name", "names", "name_id");
        let mut parents = vec![
            record(json!({"id": 1, "name_id": 10})),
            record(json!({"id": 2, "name_id": 10})),
            record(json!({"id": 3, "name_id": null})),
        ];
        assert_eq!(include.lookup(&parents), ("id", vec![10]));

        include.attach(&mut parents, vec![row(json!({"id": 10, "text_name": "Amanita"}))]);
        assert_eq!(parents[0].included("name").len(), 1);
        assert_eq!(parents[1].included("name")[0]["text_name"], "Amanita");
        assert!(parents[2].included("name").is_empty());
        assert!(parents[2].included.contains_key("name"));
    }

    #[test]
    fn has_many_groups_children_by_foreign_key() {
        let include = IncludeSpec::has_many("sequences", "sequences", "observation_id");
        let mut parents = vec![record(json!({"id": 1})), record(json!({"id": 2}))];
        assert_eq!(include.lookup(&parents), ("observation_id", vec![1, 2]));

        include.attach(
            &mut parents,
            vec![
                row(json!({"id": 7, "observation_id": 2})),
                row(json!({"id": 8, "observation_id": 2})),
            ],
        );
        assert!(parents[0].included("sequences").is_empty());
        assert_eq!(parents[1].included("sequences").len(), 2);
    }
}
