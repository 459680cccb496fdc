//! Inline parameters collected while a SQL string is being assembled
//!
//! Marker methods return a SQL fragment (`""` or `"?"`) and record the value on
//! the calling thread, so the parameters line up with the text they were
//! written next to.

use serde_json::Value as JsonValue;
use sqlx_tx_conn_mgr::ThreadScopedState;

#[derive(Default)]
pub(crate) struct InlineParams {
   values: ThreadScopedState<Vec<JsonValue>>,
}

impl InlineParams {
   pub(crate) fn reset(&self, value: JsonValue) {
      self.values.with(|values| {
         values.clear();
         values.push(value);
      });
   }

   pub(crate) fn push(&self, value: JsonValue) {
      self.values.with(|values| values.push(value));
   }

   pub(crate) fn len(&self) -> usize {
      self.values.inspect(|values| values.map_or(0, Vec::len))
   }

   /// Removes and returns the calling thread's parameters
   pub(crate) fn take(&self) -> Vec<JsonValue> {
      self.values.take()
   }

   pub(crate) fn clear(&self) {
      self.values.clear_for_current_thread();
   }
}

/// ` VALUES (?, ?, ...)` with one marker per parameter
pub(crate) fn values_clause(count: usize) -> String {
   let markers = vec!["?"; count].join(", ");
   format!(" VALUES ({})", markers)
}
