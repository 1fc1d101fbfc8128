//! Field maps and their conversion to and from PostgreSQL wire values.
//!
//! Rows travel through this crate as [`FieldMap`]s: insertion-ordered maps from
//! column name to `serde_json::Value`. [`SqlValue`] encodes a JSON value for
//! whatever column type PostgreSQL reports for the placeholder, and
//! [`row_to_field_map`] decodes a result row back into a map.

use crate::error::{OrmError, OrmResult};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use std::error::Error;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

/// Column name -> value, in insertion order.
pub type FieldMap = serde_json::Map<String, Value>;

type BoxError = Box<dyn Error + Sync + Send>;

const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Build a [`FieldMap`] literal.
///
/// ```ignore
/// let fields = pgrepo::field_map! {
///     "email" => "a@x.com",
///     "active" => true,
/// };
/// ```
#[macro_export]
macro_rules! field_map {
    () => {
        $crate::FieldMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::FieldMap::new();
        $(
            map.insert(
                ::std::string::String::from($key),
                $crate::__serde_json::json!($value),
            );
        )+
        map
    }};
}

/// A borrowed JSON value bound as a statement parameter.
///
/// The encoding is chosen from the parameter type PostgreSQL infers for the
/// placeholder, so `"6f1c..."` binds as `uuid` against a uuid column and as
/// `text` against a text column. `null` binds SQL `NULL` for every type.
#[derive(Debug, Clone, Copy)]
pub struct SqlValue<'a>(pub &'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => expect_bool(value)?.to_sql(ty, out),
            Type::INT2 => i16::try_from(expect_i64(value)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(expect_i64(value)?)?.to_sql(ty, out),
            Type::INT8 => expect_i64(value)?.to_sql(ty, out),
            Type::OID => u32::try_from(expect_i64(value)?)?.to_sql(ty, out),
            Type::FLOAT4 => (expect_f64(value)? as f32).to_sql(ty, out),
            Type::FLOAT8 => expect_f64(value)?.to_sql(ty, out),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                text_of(value).to_sql(ty, out)
            }
            Type::UUID => Uuid::parse_str(expect_str(value)?)?.to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_timestamptz(expect_str(value)?)?.to_sql(ty, out),
            Type::TIMESTAMP => parse_timestamp(expect_str(value)?)?.to_sql(ty, out),
            Type::DATE => NaiveDate::parse_from_str(expect_str(value)?, "%Y-%m-%d")?.to_sql(ty, out),
            Type::TIME => NaiveTime::parse_from_str(expect_str(value)?, "%H:%M:%S%.f")?.to_sql(ty, out),
            Type::JSON | Type::JSONB => value.to_sql(ty, out),
            Type::BYTEA => expect_bytes(value)?.to_sql(ty, out),
            #[cfg(feature = "rust_decimal")]
            Type::NUMERIC => parse_decimal(value)?.to_sql(ty, out),
            _ if matches!(ty.kind(), Kind::Enum(_)) => {
                out.extend_from_slice(expect_str(value)?.as_bytes());
                Ok(IsNull::No)
            }
            _ => Err(format!("cannot bind {value} to a parameter of type {ty}").into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn expect_bool(value: &Value) -> Result<bool, BoxError> {
    value
        .as_bool()
        .ok_or_else(|| format!("expected a boolean, got {value}").into())
}

fn expect_i64(value: &Value) -> Result<i64, BoxError> {
    value
        .as_i64()
        .ok_or_else(|| format!("expected an integer, got {value}").into())
}

fn expect_f64(value: &Value) -> Result<f64, BoxError> {
    value
        .as_f64()
        .ok_or_else(|| format!("expected a number, got {value}").into())
}

fn expect_str(value: &Value) -> Result<&str, BoxError> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, got {value}").into())
}

fn expect_bytes(value: &Value) -> Result<Vec<u8>, BoxError> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected a byte array, got {value}"))?;
    items
        .iter()
        .map(|item| -> Result<u8, BoxError> {
            let n = expect_i64(item)?;
            Ok(u8::try_from(n)?)
        })
        .collect()
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numbers and numeric strings, including exponent forms such as `1e-7`.
#[cfg(feature = "rust_decimal")]
fn parse_decimal(value: &Value) -> Result<rust_decimal::Decimal, BoxError> {
    use std::str::FromStr;
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(format!("expected a number, got {other}").into()),
    };
    rust_decimal::Decimal::from_str(&text)
        .or_else(|_| rust_decimal::Decimal::from_scientific(&text))
        .map_err(Into::into)
}

fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, BoxError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, NAIVE_TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(Into::into)
}

/// A column value decoded into JSON.
struct Decoded(Value);

impl<'a> FromSql<'a> for Decoded {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
            Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
            Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
            Type::OID => Value::from(u32::from_sql(ty, raw)?),
            Type::FLOAT4 => Value::from(f32::from_sql(ty, raw)?),
            Type::FLOAT8 => Value::from(f64::from_sql(ty, raw)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                Value::String(String::from_sql(ty, raw)?)
            }
            Type::UUID => Value::String(Uuid::from_sql(ty, raw)?.to_string()),
            Type::TIMESTAMPTZ => Value::String(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
            Type::TIMESTAMP => Value::String(
                NaiveDateTime::from_sql(ty, raw)?
                    .format(NAIVE_TIMESTAMP_FORMAT)
                    .to_string(),
            ),
            Type::DATE => Value::String(NaiveDate::from_sql(ty, raw)?.to_string()),
            Type::TIME => Value::String(NaiveTime::from_sql(ty, raw)?.to_string()),
            Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
            Type::BYTEA => Value::from(<Vec<u8>>::from_sql(ty, raw)?),
            Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => Value::from(<Vec<String>>::from_sql(ty, raw)?),
            Type::INT4_ARRAY => Value::from(<Vec<i32>>::from_sql(ty, raw)?),
            Type::INT8_ARRAY => Value::from(<Vec<i64>>::from_sql(ty, raw)?),
            Type::BOOL_ARRAY => Value::from(<Vec<bool>>::from_sql(ty, raw)?),
            Type::FLOAT8_ARRAY => Value::from(<Vec<f64>>::from_sql(ty, raw)?),
            Type::UUID_ARRAY => Value::from(
                <Vec<Uuid>>::from_sql(ty, raw)?
                    .iter()
                    .map(Uuid::to_string)
                    .collect::<Vec<_>>(),
            ),
            #[cfg(feature = "rust_decimal")]
            Type::NUMERIC => Value::String(rust_decimal::Decimal::from_sql(ty, raw)?.to_string()),
            _ if matches!(ty.kind(), Kind::Enum(_)) => {
                Value::String(std::str::from_utf8(raw)?.to_string())
            }
            _ => return Err(format!("unsupported column type {ty}").into()),
        };
        Ok(Decoded(value))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Decoded(Value::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Convert a result row into a field map keyed by column name.
///
/// When two columns share a name (e.g. `SELECT *` over a join) the later one wins.
pub fn row_to_field_map(row: &Row) -> OrmResult<FieldMap> {
    let mut map = FieldMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let Decoded(value) = row
            .try_get(idx)
            .map_err(|e| OrmError::decode(column.name(), e.to_string()))?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Value, ty: &Type) -> Result<(IsNull, BytesMut), BoxError> {
        let mut buf = BytesMut::new();
        let is_null = SqlValue(value).to_sql(ty, &mut buf)?;
        Ok((is_null, buf))
    }

    #[test]
    fn null_binds_as_sql_null_for_any_type() {
        let (is_null, buf) = encode(&Value::Null, &Type::UUID).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(buf.is_empty());
    }

    #[test]
    fn integer_is_narrowed_to_column_width() {
        let (_, buf) = encode(&json!(7), &Type::INT4).unwrap();
        assert_eq!(&buf[..], &7_i32.to_be_bytes());

        let err = encode(&json!(i64::MAX), &Type::INT2);
        assert!(err.is_err());
    }

    #[test]
    fn uuid_string_binds_as_uuid() {
        let id = Uuid::new_v4();
        let (_, buf) = encode(&json!(id.to_string()), &Type::UUID).unwrap();
        assert_eq!(&buf[..], id.as_bytes());
    }

    #[test]
    fn malformed_uuid_is_rejected() {
        assert!(encode(&json!("not-a-uuid"), &Type::UUID).is_err());
    }

    #[test]
    fn non_string_binds_as_text_repr() {
        let (_, buf) = encode(&json!(42), &Type::TEXT).unwrap();
        assert_eq!(&buf[..], b"42");
    }

    #[test]
    fn timestamps_accept_rfc3339() {
        assert!(encode(&json!("2024-05-01T10:00:00Z"), &Type::TIMESTAMPTZ).is_ok());
        assert!(encode(&json!("2024-05-01T10:00:00.123"), &Type::TIMESTAMP).is_ok());
        assert!(encode(&json!("yesterday"), &Type::TIMESTAMPTZ).is_err());
    }

    #[test]
    fn decode_round_trips_through_wire_format() {
        let mut buf = BytesMut::new();
        12_i64.to_sql(&Type::INT8, &mut buf).unwrap();
        let Decoded(v) = Decoded::from_sql(&Type::INT8, &buf).unwrap();
        assert_eq!(v, json!(12));

        let Decoded(v) = Decoded::from_sql_null(&Type::TEXT).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn field_map_macro_preserves_order() {
        let map = crate::field_map! {
            "zeta" => 1,
            "alpha" => "a",
            "mid" => Value::Null,
        };
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[cfg(feature = "rust_decimal")]
    #[test]
    fn numeric_binds_numbers_and_decodes_to_exact_text() {
        for (input, expected) in [
            (json!(1.5), "1.5"),
            (json!("19.99"), "19.99"),
            (json!(42), "42"),
            (json!(1e-7), "0.0000001"),
        ] {
            let (_, buf) = encode(&input, &Type::NUMERIC).unwrap();
            let Decoded(v) = Decoded::from_sql(&Type::NUMERIC, &buf).unwrap();
            assert_eq!(v, json!(expected), "{input}");
        }
        assert!(encode(&json!(true), &Type::NUMERIC).is_err());
    }

    #[test]
    fn time_and_array_columns_decode() {
        let (_, buf) = encode(&json!("13:45:00"), &Type::TIME).unwrap();
        let Decoded(v) = Decoded::from_sql(&Type::TIME, &buf).unwrap();
        assert_eq!(v, json!("13:45:00"));

        let mut buf = BytesMut::new();
        vec![true, false].to_sql(&Type::BOOL_ARRAY, &mut buf).unwrap();
        let Decoded(v) = Decoded::from_sql(&Type::BOOL_ARRAY, &buf).unwrap();
        assert_eq!(v, json!([true, false]));

        let id = Uuid::new_v4();
        let mut buf = BytesMut::new();
        vec![id].to_sql(&Type::UUID_ARRAY, &mut buf).unwrap();
        let Decoded(v) = Decoded::from_sql(&Type::UUID_ARRAY, &buf).unwrap();
        assert_eq!(v, json!([id.to_string()]));
    }
}
