//! Generic per-entity manager.
//!
//! An [`EntityManager`] pairs a table name with a deserializer `FieldMap -> E` and
//! turns high-level calls (find, insert, update, upsert, ...) into one built
//! statement each, executed through whatever [`Executor`] the caller passes in.
//!
//! The manager holds no connection and no per-call state. Clone it freely, share it
//! across tasks, and pass a transaction wherever a connection is expected.
//!
//! ```ignore
//! let users = EntityManager::<User>::for_entity();
//!
//! let alice = users.insert(&client, &field_map! { "email" => "a@x.com" }).await?;
//! let found = users.find_by_id(&client, alice.id).await?;
//! let active = users
//!     .find_all(&client, &FindOptions::new().filter("status", "active").limit(10))
//!     .await?;
//! ```

mod options;

pub use options::{FindOptions, JoinOptions, UpsertOptions};

use crate::builder::{QueryBuilder, Statement};
use crate::config::{RepoConfig, check_unscoped};
use crate::entity::{Entity, from_field_map};
use crate::error::{OrmError, OrmResult};
use crate::executor::{Executor, QueryOutput, run};
use crate::identity;
use crate::params::Params;
use crate::relations::{BelongsTo, HasMany, ManyToMany};
use crate::transaction::{BoxFuture, TransactionalExecutor, finish};
use crate::value::FieldMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Turns one result row into an entity.
pub type Deserializer<E> = fn(FieldMap) -> OrmResult<E>;

/// Generic data-access facade for one entity type.
pub struct EntityManager<E> {
    table: Arc<str>,
    deserialize: Deserializer<E>,
    config: Arc<RepoConfig>,
}

impl<E> Clone for EntityManager<E> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            deserialize: self.deserialize,
            config: Arc::clone(&self.config),
        }
    }
}

impl<E> fmt::Debug for EntityManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Add one predicate per filter entry: `column = value`, or `column IS NULL`.
pub(crate) fn apply_filter(qb: &mut QueryBuilder, filter: &FieldMap) {
    for (column, value) in filter {
        if value.is_null() {
            qb.where_null(column);
        } else {
            qb.where_eq(column, value.clone());
        }
    }
}

fn count_of(output: QueryOutput) -> OrmResult<u64> {
    output
        .first()
        .and_then(|row| row.values().next().and_then(Value::as_u64))
        .ok_or_else(|| OrmError::decode("count", "COUNT(*) returned no integer"))
}

impl<E: Entity + DeserializeOwned> EntityManager<E> {
    /// Manager for `E::TABLE`, deserializing rows through serde.
    pub fn for_entity() -> Self {
        Self::new(E::TABLE, from_field_map::<E>)
    }
}

impl<E> EntityManager<E> {
    pub fn new(table: &str, deserialize: Deserializer<E>) -> Self {
        Self {
            table: Arc::from(table),
            deserialize,
            config: Arc::new(RepoConfig::default()),
        }
    }

    pub fn with_config(self, config: RepoConfig) -> Self {
        self.with_shared_config(Arc::new(config))
    }

    /// Use a config shared with other managers.
    pub fn with_shared_config(mut self, config: Arc<RepoConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Run the deserializer on one row.
    pub fn materialize(&self, row: FieldMap) -> OrmResult<E> {
        (self.deserialize)(row)
    }

    fn materialize_all(&self, rows: Vec<FieldMap>) -> OrmResult<Vec<E>> {
        rows.into_iter().map(|row| self.materialize(row)).collect()
    }

    fn materialize_first(&self, output: QueryOutput) -> OrmResult<Option<E>> {
        output.first().map(|row| self.materialize(row)).transpose()
    }

    fn query(&self) -> QueryBuilder {
        QueryBuilder::from_table(&self.table)
    }

    async fn fetch<C: Executor>(&self, conn: &C, stmt: &Statement) -> OrmResult<QueryOutput> {
        run(conn, stmt, &self.config).await
    }

    // ==================== Reads ====================

    /// Look up by the configured surrogate key column.
    pub async fn find_by_id<C: Executor>(
        &self,
        conn: &C,
        id: impl Into<Value>,
    ) -> OrmResult<Option<E>> {
        self.find_by_key(conn, &self.config.id_column, id).await
    }

    /// Look up by an explicit key column.
    pub async fn find_by_key<C: Executor>(
        &self,
        conn: &C,
        column: &str,
        key: impl Into<Value>,
    ) -> OrmResult<Option<E>> {
        let stmt = self.query().where_eq(column, key).limit(1).build_select()?;
        let output = self.fetch(conn, &stmt).await?;
        self.materialize_first(output)
    }

    /// Look up by the external identifier.
    pub async fn find_by_uuid<C: Executor>(&self, conn: &C, uuid: Uuid) -> OrmResult<Option<E>> {
        identity::find_by_external_id(conn, &self.config, &self.table, uuid)
            .await?
            .map(|row| self.materialize(row))
            .transpose()
    }

    pub async fn find_all<C: Executor>(&self, conn: &C, options: &FindOptions) -> OrmResult<Vec<E>> {
        let mut qb = self.query();
        apply_filter(&mut qb, &options.filter);
        if let Some(column) = &options.order_by {
            qb.order_by(column, options.direction);
        }
        if let Some(limit) = options.limit {
            qb.limit(limit);
        }
        if let Some(offset) = options.offset {
            qb.offset(offset);
        }

        let output = self.fetch(conn, &qb.build_select()?).await?;
        self.materialize_all(output.rows)
    }

    /// `find_all` with `LIMIT 1`.
    pub async fn find_one<C: Executor>(&self, conn: &C, filter: &FieldMap) -> OrmResult<Option<E>> {
        let options = FindOptions::from(filter.clone()).limit(1);
        Ok(self.find_all(conn, &options).await?.into_iter().next())
    }

    pub async fn count<C: Executor>(&self, conn: &C, filter: &FieldMap) -> OrmResult<u64> {
        let mut qb = self.query();
        apply_filter(&mut qb, filter);
        count_of(self.fetch(conn, &qb.build_count()?).await?)
    }

    pub async fn exists<C: Executor>(&self, conn: &C, filter: &FieldMap) -> OrmResult<bool> {
        Ok(self.count(conn, filter).await? > 0)
    }

    // ==================== Writes ====================

    /// Insert one row and materialize what the database returned.
    pub async fn insert<C: Executor>(&self, conn: &C, fields: &FieldMap) -> OrmResult<E> {
        let stmt = self.query().build_insert(fields)?;
        let row = self
            .fetch(conn, &stmt)
            .await?
            .first()
            .ok_or_else(|| OrmError::Other(format!("INSERT INTO {} returned no row", self.table)))?;
        self.materialize(row)
    }

    /// Update every row matching `filter`.
    ///
    /// An empty filter touches the whole table, subject to
    /// [`RepoConfig::unscoped_update`].
    pub async fn update<C: Executor>(
        &self,
        conn: &C,
        fields: &FieldMap,
        filter: &FieldMap,
    ) -> OrmResult<Vec<E>> {
        if filter.is_empty() {
            check_unscoped(self.config.unscoped_update, "UPDATE", &self.table)?;
        }
        let mut qb = self.query();
        apply_filter(&mut qb, filter);
        let stmt = qb.build_update(fields)?;

        let output = self.fetch(conn, &stmt).await?;
        self.materialize_all(output.rows)
    }

    pub async fn update_by_id<C: Executor>(
        &self,
        conn: &C,
        id: impl Into<Value>,
        fields: &FieldMap,
    ) -> OrmResult<Option<E>> {
        self.update_by_key(conn, &self.config.id_column, id, fields)
            .await
    }

    pub async fn update_by_key<C: Executor>(
        &self,
        conn: &C,
        column: &str,
        key: impl Into<Value>,
        fields: &FieldMap,
    ) -> OrmResult<Option<E>> {
        let stmt = self.query().where_eq(column, key).build_update(fields)?;
        let output = self.fetch(conn, &stmt).await?;
        self.materialize_first(output)
    }

    pub async fn update_by_uuid<C: Executor>(
        &self,
        conn: &C,
        uuid: Uuid,
        fields: &FieldMap,
    ) -> OrmResult<Option<E>> {
        self.update_by_key(conn, &self.config.external_id_column, uuid.to_string(), fields)
            .await
    }

    /// Delete every row matching `filter`; returns the affected-row count.
    ///
    /// An empty filter deletes the whole table, subject to
    /// [`RepoConfig::unscoped_delete`].
    pub async fn delete<C: Executor>(&self, conn: &C, filter: &FieldMap) -> OrmResult<u64> {
        if filter.is_empty() {
            check_unscoped(self.config.unscoped_delete, "DELETE", &self.table)?;
        }
        let mut qb = self.query();
        apply_filter(&mut qb, filter);

        Ok(self.fetch(conn, &qb.build_delete()?).await?.affected_rows)
    }

    /// Returns whether a row was deleted.
    pub async fn delete_by_id<C: Executor>(&self, conn: &C, id: impl Into<Value>) -> OrmResult<bool> {
        self.delete_by_key(conn, &self.config.id_column, id).await
    }

    pub async fn delete_by_key<C: Executor>(
        &self,
        conn: &C,
        column: &str,
        key: impl Into<Value>,
    ) -> OrmResult<bool> {
        let stmt = self.query().where_eq(column, key).build_delete()?;
        Ok(self.fetch(conn, &stmt).await?.affected_rows > 0)
    }

    pub async fn delete_by_uuid<C: Executor>(&self, conn: &C, uuid: Uuid) -> OrmResult<bool> {
        identity::delete_by_external_id(conn, &self.config, &self.table, uuid).await
    }

    /// Insert, or update the listed columns when the conflict columns already exist.
    /// Returns the resulting row either way.
    pub async fn upsert<C: Executor>(
        &self,
        conn: &C,
        fields: &FieldMap,
        options: &UpsertOptions,
    ) -> OrmResult<E> {
        let stmt = {
            let conflict: Vec<&str> = options.conflict_columns.iter().map(String::as_str).collect();
            let update: Option<Vec<&str>> = options
                .update_columns
                .as_ref()
                .map(|cols| cols.iter().map(String::as_str).collect());
            self.query()
                .build_upsert(fields, &conflict, update.as_deref())?
        };

        let row = self
            .fetch(conn, &stmt)
            .await?
            .first()
            .ok_or_else(|| OrmError::Other(format!("upsert into {} returned no row", self.table)))?;
        self.materialize(row)
    }

    // ==================== Escape hatches ====================

    /// Run hand-written SQL (with `@name` placeholders) and materialize the rows.
    pub async fn raw<C: Executor>(&self, conn: &C, sql: &str, params: Params) -> OrmResult<Vec<E>> {
        let output = self.raw_query(conn, sql, params).await?;
        self.materialize_all(output.rows)
    }

    /// Run hand-written SQL and return the unprocessed output.
    pub async fn raw_query<C: Executor>(
        &self,
        conn: &C,
        sql: &str,
        params: Params,
    ) -> OrmResult<QueryOutput> {
        self.fetch(conn, &Statement::new(sql, params)).await
    }

    /// One joined select. Rows span two tables, so they come back as field maps;
    /// when both tables share a column name the later column wins.
    pub async fn join_query<C: Executor>(
        &self,
        conn: &C,
        options: &JoinOptions,
    ) -> OrmResult<Vec<FieldMap>> {
        let mut qb = self.query();
        if !options.select.is_empty() {
            let columns: Vec<&str> = options.select.iter().map(String::as_str).collect();
            qb.select(&columns);
        }
        let (left, right) = &options.join_condition;
        qb.join(&options.join_table, left, right, options.kind);
        apply_filter(&mut qb, &options.filter);

        Ok(self.fetch(conn, &qb.build_select()?).await?.rows)
    }

    // ==================== Relationships ====================

    /// Rows of `relation.table` whose foreign key equals `id`.
    pub async fn has_many<C: Executor>(
        &self,
        conn: &C,
        relation: &HasMany,
        id: impl Into<Value>,
    ) -> OrmResult<Vec<FieldMap>> {
        let stmt = QueryBuilder::from_table(relation.table)
            .where_eq(relation.foreign_key, id)
            .build_select()?;
        Ok(self.fetch(conn, &stmt).await?.rows)
    }

    /// The owning row whose key equals `foreign_key_value`.
    pub async fn belongs_to<C: Executor>(
        &self,
        conn: &C,
        relation: &BelongsTo,
        foreign_key_value: impl Into<Value>,
    ) -> OrmResult<Option<FieldMap>> {
        let stmt = QueryBuilder::from_table(relation.table)
            .where_eq(relation.owner_key, foreign_key_value)
            .limit(1)
            .build_select()?;
        Ok(self.fetch(conn, &stmt).await?.first())
    }

    /// Related rows reached through a pivot table.
    pub async fn many_to_many<C: Executor>(
        &self,
        conn: &C,
        relation: &ManyToMany,
        id: impl Into<Value>,
    ) -> OrmResult<Vec<FieldMap>> {
        let related = relation.related_table;
        let pivot = relation.pivot_table;
        let all_columns = format!("{related}.*");
        let stmt = QueryBuilder::from_table(related)
            .select(&[all_columns.as_str()])
            .inner_join(
                pivot,
                &format!("{related}.{}", self.config.id_column),
                &format!("{pivot}.{}", relation.related_key),
            )
            .where_eq(&format!("{pivot}.{}", relation.local_key), id)
            .build_select()?;
        Ok(self.fetch(conn, &stmt).await?.rows)
    }

    // ==================== Transactions ====================

    /// Run `f` inside one transaction on `conn`.
    ///
    /// `f` receives a clone of this manager and the transaction. Every statement it
    /// issues is committed together, or rolled back together when it returns an error.
    pub async fn transaction<'c, C, T, F>(&self, conn: &'c mut C, f: F) -> OrmResult<T>
    where
        E: 'static,
        C: TransactionalExecutor,
        T: Send + 'c,
        F: for<'t> FnOnce(Self, &'t C::Transaction<'c>) -> BoxFuture<'t, OrmResult<T>>
            + Send
            + 'c,
    {
        let manager = self.clone();
        conn.run_transaction(move |tx| f(manager, tx)).await
    }

    /// Insert every row in one transaction; any failure rolls the whole batch back.
    pub async fn batch_insert<C: TransactionalExecutor>(
        &self,
        conn: &mut C,
        rows: &[FieldMap],
    ) -> OrmResult<Vec<E>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "pgrepo.sql", table = %self.table, rows = rows.len(), "batch insert");

        let tx = conn.begin().await?;
        let result = self.insert_each(&tx, rows).await;
        finish(tx, result).await
    }

    async fn insert_each<C: Executor>(&self, conn: &C, rows: &[FieldMap]) -> OrmResult<Vec<E>> {
        let mut inserted = Vec::with_capacity(rows.len());
        for fields in rows {
            inserted.push(self.insert(conn, fields).await?);
        }
        Ok(inserted)
    }
}
