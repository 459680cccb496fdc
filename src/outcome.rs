use serde_json::Value as JsonValue;

/// What a single call produced
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
   /// Rows affected by a statement
   Affected(u64),
   /// Handler output, query rows or generated keys
   Value(JsonValue),
   /// Cached for a later batch flush; no per-call result exists
   Queued,
}

impl Outcome {
   /// Rows affected, `0` for anything else
   pub fn affected(&self) -> u64 {
      match self {
         Outcome::Affected(n) => *n,
         Outcome::Value(_) | Outcome::Queued => 0,
      }
   }

   /// The outcome as JSON; a queued call yields `null`
   pub fn into_value(self) -> JsonValue {
      match self {
         Outcome::Affected(n) => JsonValue::from(n),
         Outcome::Value(value) => value,
         Outcome::Queued => JsonValue::Null,
      }
   }

   pub fn is_queued(&self) -> bool {
      matches!(self, Outcome::Queued)
   }
}
