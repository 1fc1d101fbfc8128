//! Multi-table reads assembled in memory.
//!
//! Each traversal issues one query per participating table and stitches the results
//! together; nothing is flattened into a single join. Relationships are declared as
//! `const` descriptors and the traversals are provided by [`RelationExt`], which every
//! [`EntityManager`] implements. Domain-specific helpers are traits layered on top:
//!
//! ```ignore
//! const POSTS: HasMany = HasMany::new("posts", "user_id");
//!
//! pub trait UserRelations: RelationExt<User> {
//!     async fn with_posts<C: Executor>(&self, conn: &C, id: i64)
//!         -> OrmResult<Option<Loaded<User, Vec<FieldMap>>>> {
//!         self.find_with_many(conn, id, &POSTS).await
//!     }
//! }
//!
//! impl<T: RelationExt<User>> UserRelations for T {}
//! ```

use crate::builder::QueryBuilder;
use crate::entity::Entity;
use crate::error::{OrmError, OrmResult};
use crate::executor::{Executor, run};
use crate::manager::{EntityManager, FindOptions};
use crate::value::FieldMap;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;

/// Rows of `table` point back at the parent through `foreign_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasMany {
    pub table: &'static str,
    pub foreign_key: &'static str,
}

impl HasMany {
    pub const fn new(table: &'static str, foreign_key: &'static str) -> Self {
        Self { table, foreign_key }
    }
}

/// The entity's `foreign_key` column refers to `owner_key` of a row in `table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BelongsTo {
    pub table: &'static str,
    pub foreign_key: &'static str,
    pub owner_key: &'static str,
}

impl BelongsTo {
    pub const fn new(
        table: &'static str,
        foreign_key: &'static str,
        owner_key: &'static str,
    ) -> Self {
        Self {
            table,
            foreign_key,
            owner_key,
        }
    }
}

/// Rows of `related_table` linked through `pivot_table`.
///
/// `local_key` is the pivot column holding this entity's key, `related_key` the pivot
/// column holding the related row's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManyToMany {
    pub related_table: &'static str,
    pub pivot_table: &'static str,
    pub local_key: &'static str,
    pub related_key: &'static str,
}

impl ManyToMany {
    pub const fn new(
        related_table: &'static str,
        pivot_table: &'static str,
        local_key: &'static str,
        related_key: &'static str,
    ) -> Self {
        Self {
            related_table,
            pivot_table,
            local_key,
            related_key,
        }
    }
}

/// An entity together with related data loaded alongside it.
#[derive(Debug, Clone)]
pub struct Loaded<M, R> {
    pub base: M,
    pub rel: R,
}

impl<M, R> std::ops::Deref for Loaded<M, R> {
    type Target = M;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<M, R> std::ops::DerefMut for Loaded<M, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

/// Relationship traversals over one entity type.
pub trait RelationExt<E: Entity> {
    /// The entity with id `id` and every row of `relation.table` pointing at it.
    fn find_with_many<C: Executor, K: Into<Value> + Send>(
        &self,
        conn: &C,
        id: K,
        relation: &HasMany,
    ) -> impl Future<Output = OrmResult<Option<Loaded<E, Vec<FieldMap>>>>> + Send;

    /// Every entity matching `options`, each with its related rows.
    ///
    /// Issues exactly two queries: the parents, then one `IN (...)` query for all
    /// children, grouped in memory by foreign key.
    ///
    /// Parent keys are read from [`Entity::to_storage_map`] under the configured
    /// id column. An entity that keeps the default storage map (its external map,
    /// without the surrogate key) fails with a structural error.
    fn find_all_with_many<C: Executor>(
        &self,
        conn: &C,
        options: &FindOptions,
        relation: &HasMany,
    ) -> impl Future<Output = OrmResult<Vec<Loaded<E, Vec<FieldMap>>>>> + Send;

    /// The entity with id `id` and the row it belongs to, if its foreign key is set.
    ///
    /// The foreign key is read from [`Entity::to_storage_map`]; a key missing from
    /// that map is treated like a null one and skips the owner lookup.
    fn find_with_owner<C: Executor, K: Into<Value> + Send>(
        &self,
        conn: &C,
        id: K,
        relation: &BelongsTo,
    ) -> impl Future<Output = OrmResult<Option<Loaded<E, Option<FieldMap>>>>> + Send;

    /// The entity with id `id` and its children materialized through `children`.
    fn find_with_children<C: Executor, K: Into<Value> + Send, R: Send>(
        &self,
        conn: &C,
        id: K,
        children: &EntityManager<R>,
        foreign_key: &str,
    ) -> impl Future<Output = OrmResult<Option<Loaded<E, Vec<R>>>>> + Send;
}

/// Grouping key for a JSON value (numbers and strings compare by their text).
fn group_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl<E: Entity + Send> RelationExt<E> for EntityManager<E> {
    async fn find_with_many<C: Executor, K: Into<Value> + Send>(
        &self,
        conn: &C,
        id: K,
        relation: &HasMany,
    ) -> OrmResult<Option<Loaded<E, Vec<FieldMap>>>> {
        let id = id.into();
        let Some(base) = self.find_by_id(conn, id.clone()).await? else {
            return Ok(None);
        };
        let rel = self.has_many(conn, relation, id).await?;
        Ok(Some(Loaded { base, rel }))
    }

    async fn find_all_with_many<C: Executor>(
        &self,
        conn: &C,
        options: &FindOptions,
        relation: &HasMany,
    ) -> OrmResult<Vec<Loaded<E, Vec<FieldMap>>>> {
        let parents = self.find_all(conn, options).await?;
        if parents.is_empty() {
            return Ok(Vec::new());
        }

        let id_column = self.config().id_column.as_str();
        let keys = parents
            .iter()
            .map(|parent| {
                parent.to_storage_map().remove(id_column).ok_or_else(|| {
                    OrmError::structural(format!(
                        "{} storage map has no '{id_column}' column",
                        self.table()
                    ))
                })
            })
            .collect::<OrmResult<Vec<Value>>>()?;

        let stmt = QueryBuilder::from_table(relation.table)
            .where_in(relation.foreign_key, keys.iter().cloned())
            .build_select()?;
        let children = run(conn, &stmt, self.config()).await?.rows;

        let mut grouped: HashMap<String, Vec<FieldMap>> = HashMap::new();
        for child in children {
            if let Some(fk) = child.get(relation.foreign_key) {
                grouped.entry(group_key(fk)).or_default().push(child);
            }
        }

        Ok(parents
            .into_iter()
            .zip(&keys)
            .map(|(base, key)| Loaded {
                base,
                rel: grouped.remove(&group_key(key)).unwrap_or_default(),
            })
            .collect())
    }

    async fn find_with_owner<C: Executor, K: Into<Value> + Send>(
        &self,
        conn: &C,
        id: K,
        relation: &BelongsTo,
    ) -> OrmResult<Option<Loaded<E, Option<FieldMap>>>> {
        let Some(base) = self.find_by_id(conn, id).await? else {
            return Ok(None);
        };
        let rel = match base.to_storage_map().remove(relation.foreign_key) {
            Some(fk) if !fk.is_null() => self.belongs_to(conn, relation, fk).await?,
            _ => None,
        };
        Ok(Some(Loaded { base, rel }))
    }

    async fn find_with_children<C: Executor, K: Into<Value> + Send, R: Send>(
        &self,
        conn: &C,
        id: K,
        children: &EntityManager<R>,
        foreign_key: &str,
    ) -> OrmResult<Option<Loaded<E, Vec<R>>>> {
        let id = id.into();
        let Some(base) = self.find_by_id(conn, id.clone()).await? else {
            return Ok(None);
        };
        let rel = children
            .find_all(conn, &FindOptions::new().filter(foreign_key, id))
            .await?;
        Ok(Some(Loaded { base, rel }))
    }
}
