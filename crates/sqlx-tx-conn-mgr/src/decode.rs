//! Conversion of SQLite values and rows into JSON

use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteRow, SqliteValueRef};
use sqlx::{Column, Row as _, TypeInfo, Value, ValueRef};
use time::PrimitiveDateTime;

use crate::Result;
use crate::error::Error;
use crate::source::Row;

/// Convert a SQLite value to a JSON value.
///
/// BLOB values are returned as base64-encoded strings since JSON has no native
/// binary type. Boolean values are stored as INTEGER in SQLite.
pub fn to_json(value: SqliteValueRef) -> Result<JsonValue> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let column_type = value.type_info();

   let result = match column_type.name() {
      "TEXT" | "DATE" | "TIME" => value
         .to_owned()
         .try_decode::<String>()
         .map(JsonValue::String)
         .unwrap_or(JsonValue::Null),

      "REAL" => value
         .to_owned()
         .try_decode::<f64>()
         .map(JsonValue::from)
         .unwrap_or(JsonValue::Null),

      "INTEGER" | "NUMERIC" => value
         .to_owned()
         .try_decode::<i64>()
         .map(|v| JsonValue::Number(v.into()))
         .unwrap_or(JsonValue::Null),

      "BOOLEAN" => value
         .to_owned()
         .try_decode::<bool>()
         .map(JsonValue::Bool)
         .unwrap_or(JsonValue::Null),

      "DATETIME" => {
         if let Ok(dt) = value.to_owned().try_decode::<PrimitiveDateTime>() {
            JsonValue::String(dt.to_string())
         } else if let Ok(v) = value.to_owned().try_decode::<String>() {
            JsonValue::String(v)
         } else {
            JsonValue::Null
         }
      }

      "BLOB" => value
         .to_owned()
         .try_decode::<Vec<u8>>()
         .map(|blob| JsonValue::String(base64_encode(&blob)))
         .unwrap_or(JsonValue::Null),

      "NULL" => JsonValue::Null,

      _ => {
         if let Ok(text) = value.to_owned().try_decode::<String>() {
            JsonValue::String(text)
         } else {
            return Err(Error::UnsupportedDatatype(format!(
               "Unknown SQLite type: {}",
               column_type.name()
            )));
         }
      }
   };

   Ok(result)
}

/// Decode fetched rows into ordered column-name maps
pub fn decode_rows(rows: Vec<SqliteRow>) -> Result<Vec<Row>> {
   let mut decoded = Vec::with_capacity(rows.len());
   for row in rows {
      let mut value = Row::default();
      for (i, column) in row.columns().iter().enumerate() {
         let v = row.try_get_raw(i)?;
         value.insert(column.name().to_string(), to_json(v)?);
      }
      decoded.push(value);
   }
   Ok(decoded)
}

/// Base64 encode binary data for JSON serialization.
fn base64_encode(data: &[u8]) -> String {
   use base64::Engine;
   base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_base64_encode() {
      assert_eq!(base64_encode(b"hello"), "aGVsbG8=");
      assert_eq!(base64_encode(&[0, 0, 0]), "AAAA");
      assert_eq!(base64_encode(&[]), "");
   }
}
