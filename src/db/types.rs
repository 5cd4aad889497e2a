//! MySQL row inspection helpers.
//!
//! Sessions hand out raw `MySqlRow` values. `RowToJson` turns a row into a JSON
//! map for logging, probing and ad-hoc inspection, classifying each column by
//! its MySQL type name before decoding it.

use crate::models::ColumnMetadata;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, MySql, Row, Type, TypeInfo};

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Temporal,
    Binary,
    Json,
    Text,
}

/// Classify a MySQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let upper = type_name.to_ascii_uppercase();
    let base = upper.trim_end_matches(" UNSIGNED");

    match base {
        "DECIMAL" | "NUMERIC" => TypeCategory::Decimal,
        "BOOLEAN" | "BOOL" => TypeCategory::Boolean,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => {
            TypeCategory::Integer
        }
        "FLOAT" | "DOUBLE" | "REAL" => TypeCategory::Float,
        "DATE" | "DATETIME" | "TIMESTAMP" | "TIME" => TypeCategory::Temporal,
        "JSON" => TypeCategory::Json,
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => TypeCategory::Binary,
        _ => TypeCategory::Text,
    }
}

/// Raw DECIMAL value, kept as the server's exact string representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        matches!(ty.name(), "DECIMAL" | "NUMERIC")
    }
}

impl<'r> Decode<'r, MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary column data as a JSON value.
///
/// With `decode_binary` set, valid UTF-8 is returned as text. Everything else is
/// base64.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) if decode_binary => JsonValue::String(s.to_string()),
        _ => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Conversion of driver rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn to_json_map_with_options(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.to_json_map_with_options(false)
    }

    fn to_json_map_with_options(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .map(|col| {
                let idx = col.ordinal();
                let value = match categorize_type(col.type_info().name()) {
                    TypeCategory::Decimal => decode_decimal(self, idx),
                    TypeCategory::Integer => decode_integer(self, idx),
                    TypeCategory::Boolean => decode_boolean(self, idx),
                    TypeCategory::Float => decode_float(self, idx),
                    TypeCategory::Temporal => decode_temporal(self, idx),
                    TypeCategory::Binary => decode_binary_col(self, idx, decode_binary),
                    TypeCategory::Json => decode_json(self, idx),
                    TypeCategory::Text => decode_text(self, idx),
                };
                (col.name().to_string(), value)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
            .collect()
    }
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v.0),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to decode DECIMAL");
            JsonValue::Null
        }
    }
}

fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    // Narrow columns are not compatible with the 64-bit decoders.
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    JsonValue::Null
}

fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
    let value = match row.try_get::<Option<f64>, _>(idx) {
        Ok(v) => v,
        Err(_) => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .map(f64::from),
    };
    match value {
        Some(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string())),
        None => JsonValue::Null,
    }
}

fn decode_temporal(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return v.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
        return v.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
        return v.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()));
    }
    decode_text(row, idx)
}

fn decode_binary_col(row: &MySqlRow, idx: usize, decode_binary: bool) -> JsonValue {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| decode_binary_value(&v, decode_binary))
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<JsonValue>, _>(idx)
        .ok()
        .flatten()
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}
