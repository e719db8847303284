//! JSON <-> SQLite value conversion

use crate::error::{SqliteError, SqliteResult};
use query_resources::ParameterType;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

/// Convert a bound parameter into an SQLite value
///
/// Booleans become integers, arrays and objects JSON text. `Binary`
/// parameters carry hex text and are bound as blobs.
pub fn to_sql(value: &Value, ty: Option<ParameterType>) -> SqliteResult<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match (ty, value) {
        (Some(ParameterType::Json), value) => Ok(SqlValue::Text(value.to_string())),
        (Some(ParameterType::Binary), Value::String(encoded)) => hex::decode(encoded)
            .map(SqlValue::Blob)
            .map_err(|err| SqliteError::Binding(format!("Invalid binary parameter: {}", err))),
        (_, Value::Bool(flag)) => Ok(SqlValue::Integer(i64::from(*flag))),
        (_, Value::Number(number)) => Ok(number_to_sql(number)),
        (_, Value::String(text)) => Ok(SqlValue::Text(text.clone())),
        (_, other) => Ok(SqlValue::Text(other.to_string())),
    }
}

fn number_to_sql(number: &Number) -> SqlValue {
    match number.as_i64() {
        Some(int) => SqlValue::Integer(int),
        None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
    }
}

/// Convert a column value into JSON; blobs come back hex-encoded
pub fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real).map_or(Value::Null, Value::Number),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(hex::encode(blob)),
    }
}
