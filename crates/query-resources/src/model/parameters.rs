//! Query parameters
//!
//! Parameters carry bind values (and optional bind types) for a query. The
//! same bag is handed to loaders as template arguments, so values are plain
//! JSON values.
//!
//! ```rust
//! use query_resources::Parameters;
//!
//! let params = Parameters::new()
//!     .string("name", "John Doe")
//!     .integer("age", 30);
//!
//! assert!(params.has("name"));
//! ```

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Bind type hint for a parameter
///
/// Drivers use the hint to convert the JSON value into their native
/// representation. Array types ask the driver to expand the placeholder into
/// one placeholder per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Text,
    AsciiString,
    Integer,
    BigInt,
    SmallInt,
    Float,
    Decimal,
    Boolean,
    Json,
    Binary,
    Date,
    DateTime,
    Time,
    Guid,
    IntegerArray,
    StringArray,
}

impl ParameterType {
    /// Whether the driver should expand the placeholder per element
    pub fn is_array(&self) -> bool {
        matches!(self, Self::IntegerArray | Self::StringArray)
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Text => "text",
            Self::AsciiString => "ascii_string",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::SmallInt => "smallint",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Guid => "guid",
            Self::IntegerArray => "integer[]",
            Self::StringArray => "string[]",
        };
        f.write_str(name)
    }
}

/// Query parameters and their bind types
///
/// Setters consume the bag and return it, so a bag passed into the pipeline
/// is never changed behind the caller's back. Clone it to branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    values: BTreeMap<String, Value>,
    types: BTreeMap<String, ParameterType>,
}

impl Parameters {
    /// Create an empty parameter bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parameter bag from untyped values
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        values
            .into_iter()
            .fold(Self::new(), |params, (name, value)| params.set(name, value, None))
    }

    /// Set a parameter, overwriting any previous value and type
    ///
    /// A `None` type keeps no hint for the name, even if one existed before.
    pub fn set<K, V>(mut self, name: K, value: V, ty: Option<ParameterType>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let name = name.into();
        match ty {
            Some(ty) => {
                self.types.insert(name.clone(), ty);
            }
            None => {
                self.types.remove(&name);
            }
        }
        self.values.insert(name, value.into());
        self
    }

    /// Remove a parameter and its type
    pub fn remove(mut self, name: &str) -> Self {
        self.values.remove(name);
        self.types.remove(name);
        self
    }

    /// Merge another bag over this one; names in `other` win
    pub fn merge(mut self, other: Parameters) -> Self {
        for (name, value) in other.values {
            self.types.remove(&name);
            self.values.insert(name, value);
        }
        self.types.extend(other.types);
        self
    }

    /// Check if a parameter exists
    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Get a parameter value together with its type
    pub fn get(&self, name: &str) -> Option<(&Value, Option<ParameterType>)> {
        self.values
            .get(name)
            .map(|value| (value, self.types.get(name).copied()))
    }

    /// Get the type hint of a parameter
    pub fn type_of(&self, name: &str) -> Option<ParameterType> {
        self.types.get(name).copied()
    }

    /// All parameter values, used as loader arguments
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// All type hints
    pub fn types(&self) -> &BTreeMap<String, ParameterType> {
        &self.types
    }

    /// Iterate over `(name, value, type)` triples
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value, Option<ParameterType>)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value, self.types.get(name).copied()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn string<K: Into<String>, V: Into<String>>(self, name: K, value: V) -> Self {
        self.set(name, value.into(), Some(ParameterType::String))
    }

    pub fn text<K: Into<String>, V: Into<String>>(self, name: K, value: V) -> Self {
        self.set(name, value.into(), Some(ParameterType::Text))
    }

    pub fn ascii_string<K: Into<String>, V: Into<String>>(self, name: K, value: V) -> Self {
        self.set(name, value.into(), Some(ParameterType::AsciiString))
    }

    pub fn integer<K: Into<String>>(self, name: K, value: i64) -> Self {
        self.set(name, value, Some(ParameterType::Integer))
    }

    pub fn big_int<K: Into<String>>(self, name: K, value: i64) -> Self {
        self.set(name, value, Some(ParameterType::BigInt))
    }

    pub fn small_int<K: Into<String>>(self, name: K, value: i16) -> Self {
        self.set(name, value, Some(ParameterType::SmallInt))
    }

    pub fn float<K: Into<String>>(self, name: K, value: f64) -> Self {
        self.set(name, value, Some(ParameterType::Float))
    }

    pub fn decimal<K: Into<String>>(self, name: K, value: f64) -> Self {
        self.set(name, value, Some(ParameterType::Decimal))
    }

    pub fn boolean<K: Into<String>>(self, name: K, value: bool) -> Self {
        self.set(name, value, Some(ParameterType::Boolean))
    }

    /// Bind a serializable value as JSON text
    pub fn json<K: Into<String>, V: Serialize>(self, name: K, value: &V) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.set(name, value, Some(ParameterType::Json))
    }

    /// Bind raw bytes; stored hex-encoded so the bag stays serializable
    pub fn binary<K: Into<String>>(self, name: K, value: &[u8]) -> Self {
        self.set(name, hex::encode(value), Some(ParameterType::Binary))
    }

    /// Bind a timestamp as RFC 3339 text
    pub fn date_time<K, Tz>(self, name: K, value: &DateTime<Tz>) -> Self
    where
        K: Into<String>,
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        self.set(name, value.to_rfc3339(), Some(ParameterType::DateTime))
    }

    /// Bind a calendar date as `YYYY-MM-DD`
    pub fn date<K: Into<String>>(self, name: K, value: NaiveDate) -> Self {
        self.set(
            name,
            value.format("%Y-%m-%d").to_string(),
            Some(ParameterType::Date),
        )
    }

    pub fn guid<K: Into<String>, V: fmt::Display>(self, name: K, value: V) -> Self {
        self.set(name, value.to_string(), Some(ParameterType::Guid))
    }

    /// Bind a list of integers; an empty list binds as null
    pub fn integer_array<K, I>(self, name: K, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = i64>,
    {
        let values: Vec<Value> = values.into_iter().map(Value::from).collect();
        self.set(name, array_or_null(values), Some(ParameterType::IntegerArray))
    }

    /// Bind a list of strings; an empty list binds as null
    pub fn string_array<K, I, S>(self, name: K, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        let values: Vec<Value> = values
            .into_iter()
            .map(|value| Value::String(value.to_string()))
            .collect();
        self.set(name, array_or_null(values), Some(ParameterType::StringArray))
    }

    /// Bind an explicit null
    pub fn null<K: Into<String>>(self, name: K) -> Self {
        self.set(name, Value::Null, None)
    }
}

fn array_or_null(values: Vec<Value>) -> Value {
    if values.is_empty() {
        Value::Null
    } else {
        Value::Array(values)
    }
}
