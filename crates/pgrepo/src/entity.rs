//! The persisted-record contract.

use crate::error::OrmResult;
use crate::value::FieldMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A record stored in one table.
///
/// Field keys are the physical column names (lower-case, underscore-separated).
///
/// # Example
///
/// ```ignore
/// use pgrepo::{Entity, FieldMap, field_map};
///
/// #[derive(serde::Deserialize)]
/// struct User {
///     id: i64,
///     uuid: String,
///     email: String,
/// }
///
/// impl Entity for User {
///     const TABLE: &'static str = "users";
///
///     fn to_external_map(&self) -> FieldMap {
///         field_map! { "uuid" => self.uuid, "email" => self.email }
///     }
///
///     fn to_storage_map(&self) -> FieldMap {
///         field_map! { "id" => self.id, "uuid" => self.uuid, "email" => self.email }
///     }
/// }
/// ```
pub trait Entity: Sized {
    /// Table the entity lives in.
    const TABLE: &'static str;

    /// Fields safe to expose to callers and accept from external input.
    fn to_external_map(&self) -> FieldMap;

    /// Full internal representation, including the surrogate key and audit columns.
    ///
    /// Defaults to [`Entity::to_external_map`]. Override it when the entity is used
    /// with [`RelationExt`](crate::RelationExt) traversals that key on the surrogate
    /// id or a foreign key; those read it from this map.
    fn to_storage_map(&self) -> FieldMap {
        self.to_external_map()
    }
}

/// Deserialize an entity from a field map through serde.
pub fn from_field_map<E: DeserializeOwned>(fields: FieldMap) -> OrmResult<E> {
    Ok(serde_json::from_value(Value::Object(fields))?)
}
