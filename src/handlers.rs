//! Result handlers turning decoded rows into a caller-facing value

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx_tx_conn_mgr::Row;

use crate::config::HandlerEquality;
use crate::error::{Error, Result};

/// Converts the rows a statement produced into one JSON value
pub trait ResultHandler: Send + Sync {
   fn handle(&self, rows: Vec<Row>) -> Result<JsonValue>;

   /// Structural identity used by [`HandlerEquality::Structural`]
   ///
   /// Handlers returning the same key must produce the same value from the
   /// same rows. `None` opts out of structural matching.
   fn shape_key(&self) -> Option<String> {
      None
   }
}

/// Shared handle to a result handler
pub type HandlerRef = Arc<dyn ResultHandler>;

/// Compares two optional handlers under `policy`
pub fn same_handler(
   a: Option<&HandlerRef>,
   b: Option<&HandlerRef>,
   policy: HandlerEquality,
) -> bool {
   match (a, b) {
      (None, None) => true,
      (Some(a), Some(b)) => {
         std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            || (policy == HandlerEquality::Structural
               && a.shape_key().is_some()
               && a.shape_key() == b.shape_key())
      }
      _ => false,
   }
}

/// Selects a column by position or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
   Index(usize),
   Name(String),
}

impl Column {
   fn pick(&self, row: &Row) -> Result<JsonValue> {
      let value = match self {
         Column::Index(i) => row.get_index(*i).map(|(_, v)| v),
         Column::Name(name) => row.get(name),
      };
      value.cloned().ok_or_else(|| Error::ColumnNotFound(self.to_string()))
   }
}

impl std::fmt::Display for Column {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      match self {
         Column::Index(i) => write!(f, "#{}", i),
         Column::Name(name) => f.write_str(name),
      }
   }
}

impl From<usize> for Column {
   fn from(i: usize) -> Self {
      Column::Index(i)
   }
}

impl From<&str> for Column {
   fn from(name: &str) -> Self {
      Column::Name(name.to_string())
   }
}

/// One column of the first row; `null` when there are no rows
#[derive(Debug, Clone)]
pub struct ScalarHandler {
   column: Column,
}

impl ScalarHandler {
   pub fn new(column: impl Into<Column>) -> Self {
      Self {
         column: column.into(),
      }
   }

   /// The first column
   pub fn first() -> Self {
      Self::new(0usize)
   }
}

impl ResultHandler for ScalarHandler {
   fn handle(&self, rows: Vec<Row>) -> Result<JsonValue> {
      match rows.first() {
         Some(row) => self.column.pick(row),
         None => Ok(JsonValue::Null),
      }
   }

   fn shape_key(&self) -> Option<String> {
      Some(format!("scalar:{}", self.column))
   }
}

/// The first row as an object; `null` when there are no rows
#[derive(Debug, Clone, Default)]
pub struct MapHandler;

impl ResultHandler for MapHandler {
   fn handle(&self, rows: Vec<Row>) -> Result<JsonValue> {
      Ok(rows
         .into_iter()
         .next()
         .map_or(JsonValue::Null, row_to_object))
   }

   fn shape_key(&self) -> Option<String> {
      Some("map".to_string())
   }
}

/// Every row as an array of objects
#[derive(Debug, Clone, Default)]
pub struct MapListHandler;

impl ResultHandler for MapListHandler {
   fn handle(&self, rows: Vec<Row>) -> Result<JsonValue> {
      Ok(JsonValue::Array(rows.into_iter().map(row_to_object).collect()))
   }

   fn shape_key(&self) -> Option<String> {
      Some("map_list".to_string())
   }
}

/// One column of every row as an array
#[derive(Debug, Clone)]
pub struct ColumnListHandler {
   column: Column,
}

impl ColumnListHandler {
   pub fn new(column: impl Into<Column>) -> Self {
      Self {
         column: column.into(),
      }
   }
}

impl ResultHandler for ColumnListHandler {
   fn handle(&self, rows: Vec<Row>) -> Result<JsonValue> {
      rows
         .iter()
         .map(|row| self.column.pick(row))
         .collect::<Result<Vec<_>>>()
         .map(JsonValue::Array)
   }

   fn shape_key(&self) -> Option<String> {
      Some(format!("column_list:{}", self.column))
   }
}

fn row_to_object(row: Row) -> JsonValue {
   JsonValue::Object(row.into_iter().collect())
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   fn rows() -> Vec<Row> {
      vec![
         [("id".to_string(), json!(1)), ("name".to_string(), json!("Alice"))]
            .into_iter()
            .collect(),
         [("id".to_string(), json!(2)), ("name".to_string(), json!("Bob"))]
            .into_iter()
            .collect(),
      ]
   }

   #[test]
   fn test_scalar_by_index_and_name() {
      assert_eq!(ScalarHandler::first().handle(rows()).unwrap(), json!(1));
      assert_eq!(ScalarHandler::new("name").handle(rows()).unwrap(), json!("Alice"));
      assert_eq!(ScalarHandler::first().handle(Vec::new()).unwrap(), JsonValue::Null);
      assert!(matches!(
         ScalarHandler::new("missing").handle(rows()),
         Err(Error::ColumnNotFound(_))
      ));
   }

   #[test]
   fn test_map_handlers() {
      assert_eq!(
         MapHandler.handle(rows()).unwrap(),
         json!({ "id": 1, "name": "Alice" })
      );
      assert_eq!(
         MapListHandler.handle(rows()).unwrap(),
         json!([{ "id": 1, "name": "Alice" }, { "id": 2, "name": "Bob" }])
      );
      assert_eq!(
         ColumnListHandler::new("name").handle(rows()).unwrap(),
         json!(["Alice", "Bob"])
      );
   }

   #[test]
   fn test_handler_equality_policies() {
      let a: HandlerRef = Arc::new(ScalarHandler::new("id"));
      let b: HandlerRef = Arc::new(ScalarHandler::new("id"));
      let c: HandlerRef = Arc::new(ScalarHandler::new("name"));

      assert!(same_handler(Some(&a), Some(&a), HandlerEquality::Identity));
      assert!(!same_handler(Some(&a), Some(&b), HandlerEquality::Identity));
      assert!(same_handler(Some(&a), Some(&b), HandlerEquality::Structural));
      assert!(!same_handler(Some(&a), Some(&c), HandlerEquality::Structural));
      assert!(!same_handler(Some(&a), None, HandlerEquality::Structural));
      assert!(same_handler(None, None, HandlerEquality::Identity));
   }
}
