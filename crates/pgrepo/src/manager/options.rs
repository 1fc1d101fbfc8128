use crate::builder::{Direction, JoinKind};
use crate::value::FieldMap;
use serde_json::Value;

/// Filter, ordering and paging for [`EntityManager::find_all`](super::EntityManager::find_all).
///
/// Each filter entry becomes one `column = value` predicate (`IS NULL` for a null
/// value), AND-joined in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub filter: FieldMap,
    pub order_by: Option<String>,
    pub direction: Direction,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one equality filter.
    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(column.to_string(), value.into());
        self
    }

    /// Add every entry of `filter`.
    pub fn filters(mut self, filter: FieldMap) -> Self {
        self.filter.extend(filter);
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl From<FieldMap> for FindOptions {
    fn from(filter: FieldMap) -> Self {
        Self::new().filters(filter)
    }
}

/// Conflict target and update list for an upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    pub conflict_columns: Vec<String>,
    /// Columns overwritten on conflict; `None` means every non-conflict field.
    pub update_columns: Option<Vec<String>>,
}

impl UpsertOptions {
    pub fn on_conflict(columns: &[&str]) -> Self {
        Self {
            conflict_columns: columns.iter().map(|c| c.to_string()).collect(),
            update_columns: None,
        }
    }

    pub fn update_columns(mut self, columns: &[&str]) -> Self {
        self.update_columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

/// A single joined select returning raw field maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOptions {
    pub join_table: String,
    /// `(left, right)` columns of the `ON left = right` condition.
    pub join_condition: (String, String),
    /// Selected columns; empty selects `*`.
    pub select: Vec<String>,
    pub filter: FieldMap,
    pub kind: JoinKind,
}

impl JoinOptions {
    pub fn new(join_table: &str, left: &str, right: &str) -> Self {
        Self {
            join_table: join_table.to_string(),
            join_condition: (left.to_string(), right.to_string()),
            ..Self::default()
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(column.to_string(), value.into());
        self
    }

    pub fn kind(mut self, kind: JoinKind) -> Self {
        self.kind = kind;
        self
    }
}
