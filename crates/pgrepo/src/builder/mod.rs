//! Parameter-safe statement builder.
//!
//! A [`QueryBuilder`] accumulates one statement's clauses and a side-channel
//! [`Params`] map, then renders SELECT/INSERT/UPDATE/DELETE text through one of
//! the `build_*` methods.
//!
//! ## Design
//!
//! - Every literal value is registered under a freshly minted placeholder
//!   (`@param_0`, `@param_1`, ...) and never spliced into the statement text.
//! - The placeholder counter belongs to the builder instance, so filtering the same
//!   column twice, or combining WHERE values with UPDATE/INSERT fields, cannot collide.
//! - Table and column names are trusted identifiers and are emitted as given.
//! - One builder per statement: build a new one for each logical operation.
//!
//! ```ignore
//! use pgrepo::QueryBuilder;
//!
//! let stmt = QueryBuilder::new()
//!     .table("users")
//!     .where_eq("email", "a@x.com")
//!     .limit(1)
//!     .build_select()?;
//! assert_eq!(stmt.sql(), "SELECT * FROM users WHERE email = @param_0 LIMIT 1");
//! ```

pub mod clause;
mod render;

pub use clause::{Conjunction, Direction, JoinKind, Op};
pub use render::Statement;

use crate::params::{PLACEHOLDER_SIGIL, Params, placeholder_name, skip_opaque};
use clause::{Join, OrderBy, Predicate};
use serde_json::Value;

/// Structured, chainable statement builder.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    /// Target table (required before any build)
    table: Option<String>,
    /// SELECT columns (empty renders `*`)
    columns: Vec<String>,
    /// JOIN clauses
    joins: Vec<Join>,
    /// WHERE predicates
    predicates: Vec<Predicate>,
    /// GROUP BY column
    group_by: Option<String>,
    /// HAVING fragments
    having: Vec<String>,
    /// ORDER BY clauses
    order_by: Vec<OrderBy>,
    /// LIMIT
    limit: Option<u64>,
    /// OFFSET
    offset: Option<u64>,
    /// Placeholder name -> value
    params: Params,
    /// Next placeholder number
    param_count: usize,
    /// Build error (reported by the next build)
    build_error: Option<String>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `QueryBuilder::new().table(name)`.
    pub fn from_table(name: &str) -> Self {
        let mut qb = Self::new();
        qb.table(name);
        qb
    }

    /// Set the target table.
    pub fn table(&mut self, name: &str) -> &mut Self {
        self.table = Some(name.to_string());
        self
    }

    /// Append SELECT columns.
    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        self.columns.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    // ==================== Joins ====================

    /// Add a join `<kind> table ON left = right`.
    pub fn join(&mut self, table: &str, left: &str, right: &str, kind: JoinKind) -> &mut Self {
        self.joins.push(Join {
            table: table.to_string(),
            left: left.to_string(),
            right: right.to_string(),
            kind,
        });
        self
    }

    /// Add INNER JOIN.
    pub fn inner_join(&mut self, table: &str, left: &str, right: &str) -> &mut Self {
        self.join(table, left, right, JoinKind::Inner)
    }

    /// Add LEFT JOIN.
    pub fn left_join(&mut self, table: &str, left: &str, right: &str) -> &mut Self {
        self.join(table, left, right, JoinKind::Left)
    }

    /// Add RIGHT JOIN.
    pub fn right_join(&mut self, table: &str, left: &str, right: &str) -> &mut Self {
        self.join(table, left, right, JoinKind::Right)
    }

    // ==================== Predicates ====================

    /// Register `value` under a fresh placeholder and return the placeholder as it
    /// appears in statement text.
    fn bind(&mut self, value: Value) -> String {
        let name = placeholder_name(self.param_count);
        self.param_count += 1;
        let placeholder = format!("{PLACEHOLDER_SIGIL}{name}");
        self.params.insert(name, value);
        placeholder
    }

    fn push_predicate(&mut self, conjunction: Conjunction, sql: String) -> &mut Self {
        self.predicates.push(Predicate { conjunction, sql });
        self
    }

    /// Add `column = value`.
    pub fn where_eq(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.where_op(column, Op::Eq, value)
    }

    /// Add `column <op> value`.
    pub fn where_op(&mut self, column: &str, op: Op, value: impl Into<Value>) -> &mut Self {
        let placeholder = self.bind(value.into());
        self.push_predicate(Conjunction::And, format!("{column} {op} {placeholder}"))
    }

    /// Add `column = value`, attached with OR.
    pub fn or_where(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.or_where_op(column, Op::Eq, value)
    }

    /// Add `column <op> value`, attached with OR.
    pub fn or_where_op(&mut self, column: &str, op: Op, value: impl Into<Value>) -> &mut Self {
        let placeholder = self.bind(value.into());
        self.push_predicate(Conjunction::Or, format!("{column} {op} {placeholder}"))
    }

    /// Add `column IN (...)`, one placeholder per value.
    ///
    /// An empty list renders the always-false `1=0`.
    pub fn where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let placeholders: Vec<String> = values
            .into_iter()
            .map(|v| self.bind(v.into()))
            .collect();

        if placeholders.is_empty() {
            return self.push_predicate(Conjunction::And, "1=0".to_string());
        }
        self.push_predicate(
            Conjunction::And,
            format!("{column} IN ({})", placeholders.join(", ")),
        )
    }

    /// Add `column IS NULL`.
    pub fn where_null(&mut self, column: &str) -> &mut Self {
        self.push_predicate(Conjunction::And, format!("{column} IS NULL"))
    }

    /// Add `column IS NOT NULL`.
    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        self.push_predicate(Conjunction::And, format!("{column} IS NOT NULL"))
    }

    /// Add a raw predicate fragment, binding `values` to its `?` marks in order.
    ///
    /// The fragment is wrapped in parentheses. A `?` inside a quoted literal, a
    /// comment or a dollar-quoted body is not a mark, nor are the jsonb operators
    /// `?|` and `?&`. Write `??` for the jsonb `?` operator itself. A mismatch
    /// between marks and values leaves the builder unchanged and fails the next build.
    ///
    /// # Safety
    ///
    /// The fragment text is emitted verbatim. Only values go through placeholders.
    pub fn where_raw(&mut self, fragment: &str, values: Vec<Value>) -> &mut Self {
        let pieces = split_marks(fragment);
        let marks = pieces.len() - 1;
        if marks != values.len() {
            self.build_error = Some(format!(
                "where_raw mismatch: fragment '{fragment}' has {marks} '?' marks, but {} values provided",
                values.len()
            ));
            return self;
        }

        let mut pieces = pieces.into_iter();
        let mut sql = pieces.next().unwrap_or_default();
        for (value, rest) in values.into_iter().zip(pieces) {
            let placeholder = self.bind(value);
            sql.push_str(&placeholder);
            sql.push_str(&rest);
        }
        self.push_predicate(Conjunction::And, format!("({sql})"))
    }

    // ==================== Grouping, ordering, paging ====================

    /// Set GROUP BY (last call wins).
    pub fn group_by(&mut self, column: &str) -> &mut Self {
        self.group_by = Some(column.to_string());
        self
    }

    /// Add a HAVING fragment (AND-joined).
    pub fn having(&mut self, fragment: &str) -> &mut Self {
        self.having.push(fragment.to_string());
        self
    }

    pub fn order_by(&mut self, column: &str, direction: Direction) -> &mut Self {
        self.order_by.push(OrderBy {
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Placeholder -> value map accumulated so far.
    pub fn parameters(&self) -> &Params {
        &self.params
    }

    /// Whether any WHERE predicate has been added.
    pub fn has_predicates(&self) -> bool {
        !self.predicates.is_empty()
    }
}

/// Split a raw fragment at its `?` value marks, collapsing `??` to `?`.
fn split_marks(fragment: &str) -> Vec<String> {
    let bytes = fragment.as_bytes();
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if let Some(end) = skip_opaque(fragment, i) {
            i = end;
            continue;
        }
        if bytes[i] != b'?' {
            i += 1;
            continue;
        }
        match (bytes.get(i + 1).copied(), bytes.get(i + 2).copied()) {
            (Some(b'?'), _) => {
                current.push_str(&fragment[copied..=i]);
                copied = i + 2;
                i += 2;
            }
            (Some(b'|'), after) if after != Some(b'|') => i += 2,
            (Some(b'&'), _) => i += 2,
            _ => {
                current.push_str(&fragment[copied..i]);
                pieces.push(std::mem::take(&mut current));
                copied = i + 1;
                i += 1;
            }
        }
    }
    current.push_str(&fragment[copied..]);
    pieces.push(current);
    pieces
}
