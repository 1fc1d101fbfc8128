//! # pgrepo
//!
//! A generic data-access layer for PostgreSQL.
//!
//! ## Features
//!
//! - **Parameter-safe builder**: every value goes through a named placeholder
//!   (`@param_N`), never into statement text
//! - **Generic entity manager**: find/insert/update/delete/count/exists/upsert, batch
//!   inserts and transactions for any entity, parameterized by a deserializer function
//! - **Dual identifiers**: compact surrogate keys internally, opaque external
//!   identifiers (UUIDs) at the boundary, translated only by [`identity`]
//! - **Relationship traversal**: has-many/belongs-to/many-to-many reads and
//!   composable domain mixins through [`RelationExt`]
//! - **Transaction-friendly**: pass a transaction anywhere an [`Executor`] is expected
//!
//! ## Query Builder
//!
//! ```ignore
//! use pgrepo::QueryBuilder;
//!
//! let stmt = QueryBuilder::new()
//!     .table("users")
//!     .where_eq("email", "a@x.com")
//!     .limit(1)
//!     .build_select()?;
//!
//! assert_eq!(stmt.sql(), "SELECT * FROM users WHERE email = @param_0 LIMIT 1");
//! ```
//!
//! ## Entity manager
//!
//! ```ignore
//! use pgrepo::{EntityManager, UpsertOptions, field_map};
//!
//! let counters = EntityManager::<Counter>::for_entity();
//! let row = counters
//!     .upsert(
//!         &client,
//!         &field_map! { "id" => "k1", "count" => 2 },
//!         &UpsertOptions::on_conflict(&["id"]),
//!     )
//!     .await?;
//! ```
//!
//! There is no global registry of managers: build a struct of the managers an
//! application needs at startup and pass it where it is used.

pub mod builder;
pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod identity;
pub mod manager;
pub mod params;
pub mod relations;
pub mod transaction;
pub mod value;

#[cfg(test)]
mod test_support;

pub use builder::{Conjunction, Direction, JoinKind, Op, QueryBuilder, Statement};
pub use config::{RepoConfig, UnscopedPolicy};
pub use entity::{Entity, from_field_map};
pub use error::{ConstraintKind, OrmError, OrmResult};
pub use executor::{Executor, QueryOutput};
pub use manager::{Deserializer, EntityManager, FindOptions, JoinOptions, UpsertOptions};
pub use params::{Params, bind_positional};
pub use relations::{BelongsTo, HasMany, Loaded, ManyToMany, RelationExt};
pub use transaction::{BoxFuture, TransactionScope, TransactionalExecutor};
pub use value::{FieldMap, SqlValue, row_to_field_map};

#[doc(hidden)]
pub use serde_json as __serde_json;
