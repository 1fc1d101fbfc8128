use super::QueryBuilder;
use crate::error::{OrmError, OrmResult};
use crate::params::Params;
use crate::value::FieldMap;

/// Finished statement text plus the values its placeholders refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Params,
}

impl Statement {
    /// Wrap hand-written SQL that uses `@name` placeholders.
    pub fn new(sql: impl Into<String>, params: Params) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn into_parts(self) -> (String, Params) {
        (self.sql, self.params)
    }
}

impl QueryBuilder {
    fn target(&self) -> OrmResult<&str> {
        if let Some(err) = &self.build_error {
            return Err(OrmError::structural(err.clone()));
        }
        self.table
            .as_deref()
            .ok_or_else(|| OrmError::structural("table required"))
    }

    fn statement(&self, sql: String) -> Statement {
        Statement::new(sql, self.params.clone())
    }

    fn push_from_and_joins(&self, sql: &mut String, table: &str) {
        sql.push_str(" FROM ");
        sql.push_str(table);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_string());
        }
    }

    /// ` WHERE a AND b OR c`; the first predicate is rendered bare.
    fn push_where(&self, sql: &mut String) {
        for (i, predicate) in self.predicates.iter().enumerate() {
            if i == 0 {
                sql.push_str(" WHERE ");
            } else {
                sql.push(' ');
                sql.push_str(&predicate.conjunction.to_string());
                sql.push(' ');
            }
            sql.push_str(&predicate.sql);
        }
    }

    fn push_group_and_having(&self, sql: &mut String) {
        if let Some(group) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.having.join(" AND "));
        }
    }

    /// Build a SELECT statement.
    pub fn build_select(&self) -> OrmResult<Statement> {
        let table = self.target()?;

        let mut sql = String::from("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        self.push_from_and_joins(&mut sql, table);
        self.push_where(&mut sql);
        self.push_group_and_having(&mut sql);

        if !self.order_by.is_empty() {
            let clauses: Vec<String> = self.order_by.iter().map(ToString::to_string).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Ok(self.statement(sql))
    }

    /// Build `SELECT COUNT(*)` over the same joins and predicates.
    ///
    /// Selected columns, ordering and paging are ignored. With GROUP BY/HAVING the
    /// grouped query is counted as a subquery.
    pub fn build_count(&self) -> OrmResult<Statement> {
        let table = self.target()?;

        let sql = if self.group_by.is_some() || !self.having.is_empty() {
            let mut inner = String::from("SELECT 1");
            self.push_from_and_joins(&mut inner, table);
            self.push_where(&mut inner);
            self.push_group_and_having(&mut inner);
            format!("SELECT COUNT(*) FROM ({inner}) AS t")
        } else {
            let mut sql = String::from("SELECT COUNT(*)");
            self.push_from_and_joins(&mut sql, table);
            self.push_where(&mut sql);
            sql
        };

        Ok(self.statement(sql))
    }

    fn values_clause(&mut self, fields: &FieldMap) -> (Vec<String>, Vec<String>) {
        let mut columns = Vec::with_capacity(fields.len());
        let mut placeholders = Vec::with_capacity(fields.len());
        for (column, value) in fields {
            columns.push(column.clone());
            placeholders.push(self.bind(value.clone()));
        }
        (columns, placeholders)
    }

    /// Build `INSERT ... RETURNING *`, one fresh placeholder per field.
    ///
    /// An empty field map inserts `DEFAULT VALUES`.
    pub fn build_insert(&mut self, fields: &FieldMap) -> OrmResult<Statement> {
        let table = self.target()?.to_string();

        let sql = if fields.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING *")
        } else {
            let (columns, placeholders) = self.values_clause(fields);
            format!(
                "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        Ok(self.statement(sql))
    }

    /// Build `INSERT ... ON CONFLICT (...) DO UPDATE SET ... RETURNING *`.
    ///
    /// `update_columns` defaults to every field that is not a conflict column. When
    /// nothing is left to update, the first conflict column is reassigned to itself so
    /// the existing row is still returned.
    pub fn build_upsert(
        &mut self,
        fields: &FieldMap,
        conflict_columns: &[&str],
        update_columns: Option<&[&str]>,
    ) -> OrmResult<Statement> {
        let table = self.target()?.to_string();
        if fields.is_empty() {
            return Err(OrmError::structural("upsert requires at least one field"));
        }
        let Some(first_conflict) = conflict_columns.first() else {
            return Err(OrmError::structural("upsert requires conflict columns"));
        };

        let updates: Vec<&str> = match update_columns {
            Some(cols) => cols.to_vec(),
            None => fields
                .keys()
                .map(String::as_str)
                .filter(|k| !conflict_columns.contains(k))
                .collect(),
        };
        let assignments: Vec<String> = if updates.is_empty() {
            vec![format!("{first_conflict} = EXCLUDED.{first_conflict}")]
        } else {
            updates
                .iter()
                .map(|col| format!("{col} = EXCLUDED.{col}"))
                .collect()
        };

        let (columns, placeholders) = self.values_clause(fields);
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {} RETURNING *",
            columns.join(", "),
            placeholders.join(", "),
            conflict_columns.join(", "),
            assignments.join(", ")
        );

        Ok(self.statement(sql))
    }

    /// Build `UPDATE ... SET ... WHERE ... RETURNING *`.
    ///
    /// Without predicates this updates every row of the table.
    pub fn build_update(&mut self, fields: &FieldMap) -> OrmResult<Statement> {
        let table = self.target()?.to_string();
        if fields.is_empty() {
            return Err(OrmError::structural("update requires at least one field"));
        }

        let (columns, placeholders) = self.values_clause(fields);
        let assignments: Vec<String> = columns
            .iter()
            .zip(&placeholders)
            .map(|(col, ph)| format!("{col} = {ph}"))
            .collect();

        let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
        self.push_where(&mut sql);
        sql.push_str(" RETURNING *");

        Ok(self.statement(sql))
    }

    /// Build `DELETE FROM ... WHERE ...`.
    ///
    /// Without predicates this deletes every row of the table.
    pub fn build_delete(&self) -> OrmResult<Statement> {
        let table = self.target()?;

        let mut sql = format!("DELETE FROM {table}");
        self.push_where(&mut sql);

        Ok(self.statement(sql))
    }
}
