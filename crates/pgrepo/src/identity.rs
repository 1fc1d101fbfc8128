//! Surrogate key / external identifier indirection.
//!
//! Every table carries a compact surrogate key ([`RepoConfig::id_column`]) used for
//! joins and foreign keys, and an opaque external identifier
//! ([`RepoConfig::external_id_column`]) that callers see. The helpers here are the
//! only place that translates between the two.
//!
//! Not-found is `None`/`false`, never an error.

use crate::builder::QueryBuilder;
use crate::config::RepoConfig;
use crate::error::{OrmError, OrmResult};
use crate::executor::{Executor, run};
use crate::value::FieldMap;
use serde_json::Value;
use uuid::Uuid;

fn external(uuid: Uuid) -> Value {
    Value::String(uuid.to_string())
}

async fn first_row<C: Executor>(
    conn: &C,
    config: &RepoConfig,
    qb: &QueryBuilder,
) -> OrmResult<Option<FieldMap>> {
    Ok(run(conn, &qb.build_select()?, config).await?.first())
}

/// Full row of `table` whose external identifier is `external_id`.
pub async fn find_by_external_id<C: Executor>(
    conn: &C,
    config: &RepoConfig,
    table: &str,
    external_id: Uuid,
) -> OrmResult<Option<FieldMap>> {
    find_by_unique_key(conn, config, table, &config.external_id_column, external(external_id))
        .await
}

/// Full row of `table` whose unique business key `column` equals `value`.
pub async fn find_by_unique_key<C: Executor>(
    conn: &C,
    config: &RepoConfig,
    table: &str,
    column: &str,
    value: impl Into<Value>,
) -> OrmResult<Option<FieldMap>> {
    let mut qb = QueryBuilder::from_table(table);
    qb.where_eq(column, value).limit(1);
    first_row(conn, config, &qb).await
}

/// Insert `fields` under a freshly generated external identifier and return only
/// that identifier.
///
/// A value already present under the external identifier column is replaced.
pub async fn create_returning_external_id<C: Executor>(
    conn: &C,
    config: &RepoConfig,
    table: &str,
    fields: &FieldMap,
) -> OrmResult<Uuid> {
    let external_id = Uuid::new_v4();
    let mut row = fields.clone();
    row.insert(config.external_id_column.clone(), external(external_id));

    let stmt = QueryBuilder::from_table(table).build_insert(&row)?;
    run(conn, &stmt, config).await?;
    Ok(external_id)
}

/// Update the row identified by `external_id`; returns whether one was found.
pub async fn update_by_external_id<C: Executor>(
    conn: &C,
    config: &RepoConfig,
    table: &str,
    external_id: Uuid,
    fields: &FieldMap,
) -> OrmResult<bool> {
    let stmt = QueryBuilder::from_table(table)
        .where_eq(&config.external_id_column, external(external_id))
        .build_update(fields)?;
    Ok(run(conn, &stmt, config).await?.affected_rows > 0)
}

/// Delete the row identified by `external_id`; returns whether one was found.
pub async fn delete_by_external_id<C: Executor>(
    conn: &C,
    config: &RepoConfig,
    table: &str,
    external_id: Uuid,
) -> OrmResult<bool> {
    let stmt = QueryBuilder::from_table(table)
        .where_eq(&config.external_id_column, external(external_id))
        .build_delete()?;
    Ok(run(conn, &stmt, config).await?.affected_rows > 0)
}

/// Surrogate key of the row in `table` exposed as `external_id`.
///
/// Used to resolve a foreign key when a write on one table refers to a row another
/// table only exposes by its external identifier.
pub async fn surrogate_key_for<C: Executor>(
    conn: &C,
    config: &RepoConfig,
    table: &str,
    external_id: Uuid,
) -> OrmResult<Option<i64>> {
    let id_column = config.id_column.as_str();
    let mut qb = QueryBuilder::from_table(table);
    qb.select(&[id_column])
        .where_eq(&config.external_id_column, external(external_id))
        .limit(1);

    first_row(conn, config, &qb)
        .await?
        .map(|row| match row.get(id_column) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| OrmError::decode(id_column, format!("{n} is not a 64-bit key"))),
            other => Err(OrmError::decode(
                id_column,
                format!("expected an integer key, got {other:?}"),
            )),
        })
        .transpose()
}

/// External identifier of the row in `table` whose surrogate key is `id`.
pub async fn external_id_for<C: Executor>(
    conn: &C,
    config: &RepoConfig,
    table: &str,
    id: i64,
) -> OrmResult<Option<Uuid>> {
    let column = config.external_id_column.as_str();
    let mut qb = QueryBuilder::from_table(table);
    qb.select(&[column])
        .where_eq(&config.id_column, id)
        .limit(1);

    first_row(conn, config, &qb)
        .await?
        .map(|row| match row.get(column) {
            Some(Value::String(s)) => {
                Uuid::parse_str(s).map_err(|e| OrmError::decode(column, e.to_string()))
            }
            other => Err(OrmError::decode(
                column,
                format!("expected a uuid, got {other:?}"),
            )),
        })
        .transpose()
}
