//! Row decoding into JSON.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Values that no decoder understands become `null` and are logged at debug level.

use crate::models::{DatabaseType, JsonRow};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};
use tracing::debug;

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.starts_with("timestamp")
        || lower == "datetime"
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return TypeCategory::Temporal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary data as a base64 JSON string.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Try each Rust type in turn and convert the first successful decode.
macro_rules! decode_first {
    ($row:expr, $idx:expr, $($ty:ty),+ $(,)?) => {{
        None::<JsonValue>
            $(.or_else(|| $row.try_get::<$ty, _>($idx).ok().map(JsonValue::from)))+
    }};
}

/// Like `decode_first!`, but renders the value with `Display` (dates and times).
macro_rules! decode_display {
    ($row:expr, $idx:expr, $($ty:ty),+ $(,)?) => {{
        None::<JsonValue>
            $(.or_else(|| $row.try_get::<$ty, _>($idx).ok().map(|v| JsonValue::String(v.to_string()))))+
    }};
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let value = if is_null(self, idx) {
                    JsonValue::Null
                } else {
                    let category = categorize_type(type_name, DatabaseType::MySQL);
                    mysql::decode_column(self, idx, category).unwrap_or_else(|| undecodable(type_name))
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let value = if is_null(self, idx) {
                    JsonValue::Null
                } else {
                    let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                    postgres::decode_column(self, idx, category)
                        .unwrap_or_else(|| undecodable(type_name))
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                // SQLite is dynamically typed: classify the stored value, not the declared column.
                let value = match self.try_get_raw(idx) {
                    Ok(raw) if raw.is_null() => JsonValue::Null,
                    Ok(raw) => {
                        let type_name = raw.type_info().name().to_string();
                        let category = categorize_type(&type_name, DatabaseType::SQLite);
                        sqlite::decode_column(self, idx, category)
                            .unwrap_or_else(|| undecodable(&type_name))
                    }
                    Err(_) => JsonValue::Null,
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

fn is_null<R: Row>(row: &R, idx: usize) -> bool
where
    usize: sqlx::ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|raw| raw.is_null()).unwrap_or(true)
}

fn undecodable(type_name: &str) -> JsonValue {
    debug!(type_name = %type_name, "No decoder for column type, returning null");
    JsonValue::Null
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
        match category {
            TypeCategory::Integer => decode_first!(row, idx, i64, u64, i32, u32, i16, u16, i8, u8),
            TypeCategory::Float => decode_first!(row, idx, f64, f32),
            TypeCategory::Boolean => decode_first!(row, idx, bool, i8),
            TypeCategory::Decimal => row
                .try_get::<RawDecimal, _>(idx)
                .ok()
                .map(|d| JsonValue::String(d.0)),
            TypeCategory::Json => row
                .try_get::<sqlx::types::Json<JsonValue>, _>(idx)
                .ok()
                .map(|j| j.0),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(|b| encode_binary(&b)),
            TypeCategory::Temporal => decode_display!(
                row,
                idx,
                chrono::DateTime<chrono::Utc>,
                chrono::NaiveDateTime,
                chrono::NaiveDate,
                chrono::NaiveTime,
            ),
            TypeCategory::Text | TypeCategory::Unknown => decode_first!(row, idx, String)
                .or_else(|| row.try_get::<Vec<u8>, _>(idx).ok().map(|b| encode_binary(&b))),
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
        match category {
            TypeCategory::Integer => decode_first!(row, idx, i64, i32, i16),
            TypeCategory::Float => decode_first!(row, idx, f64, f32),
            TypeCategory::Boolean => decode_first!(row, idx, bool),
            TypeCategory::Decimal => row
                .try_get::<RawDecimal, _>(idx)
                .ok()
                .map(|d| JsonValue::String(d.0)),
            TypeCategory::Json => row
                .try_get::<sqlx::types::Json<JsonValue>, _>(idx)
                .ok()
                .map(|j| j.0),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(|b| encode_binary(&b)),
            TypeCategory::Temporal => decode_display!(
                row,
                idx,
                chrono::DateTime<chrono::Utc>,
                chrono::NaiveDateTime,
                chrono::NaiveDate,
                chrono::NaiveTime,
            ),
            TypeCategory::Text | TypeCategory::Unknown => decode_first!(row, idx, String),
        }
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
        match category {
            TypeCategory::Integer => decode_first!(row, idx, i64),
            TypeCategory::Float | TypeCategory::Decimal => decode_first!(row, idx, f64),
            TypeCategory::Boolean => decode_first!(row, idx, bool),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(|b| encode_binary(&b)),
            TypeCategory::Json
            | TypeCategory::Temporal
            | TypeCategory::Text
            | TypeCategory::Unknown => {
                decode_first!(row, idx, String)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("int8", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_text_and_binary() {
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("bytea", DatabaseType::PostgreSQL),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("uuid", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("date", DatabaseType::PostgreSQL),
            TypeCategory::Temporal
        );
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(encode_binary(&[0xFF, 0xFE]), JsonValue::String("//4=".to_string()));
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }
}
