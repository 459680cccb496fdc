//! Statement parameters

use serde_json::Value as JsonValue;

/// Parameters supplied with one statement
///
/// The variant is the statement's parameter shape: a parameterless statement,
/// a statement with exactly one parameter, or a parameter list.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
   #[default]
   None,
   Single(JsonValue),
   List(Vec<JsonValue>),
}

impl Params {
   /// Number of values one execution binds
   pub fn width(&self) -> usize {
      match self {
         Params::None => 0,
         Params::Single(_) => 1,
         Params::List(values) => values.len(),
      }
   }

   /// The values in bind order
   pub fn as_slice(&self) -> &[JsonValue] {
      match self {
         Params::None => &[],
         Params::Single(value) => std::slice::from_ref(value),
         Params::List(values) => values,
      }
   }

   pub fn into_row(self) -> Vec<JsonValue> {
      match self {
         Params::None => Vec::new(),
         Params::Single(value) => vec![value],
         Params::List(values) => values,
      }
   }
}

impl From<()> for Params {
   fn from(_: ()) -> Self {
      Params::None
   }
}

impl From<Vec<JsonValue>> for Params {
   fn from(values: Vec<JsonValue>) -> Self {
      Params::List(values)
   }
}

impl<const N: usize> From<[JsonValue; N]> for Params {
   fn from(values: [JsonValue; N]) -> Self {
      Params::List(values.into())
   }
}

impl From<JsonValue> for Params {
   fn from(value: JsonValue) -> Self {
      Params::Single(value)
   }
}

/// Builds [`Params`] from values convertible into JSON
///
/// ```
/// use sqlx_batch_runner::{Params, params};
///
/// assert_eq!(params![], Params::None);
/// assert_eq!(params!["Alice", 30].width(), 2);
/// ```
#[macro_export]
macro_rules! params {
   () => {
      $crate::Params::None
   };
   ($($value:expr),+ $(,)?) => {
      $crate::Params::List(vec![$($crate::JsonValue::from($value)),+])
   };
}
