//! Values a template is expanded against

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx_tx_conn_mgr::Vacancy;

use crate::error::{Error, Result};
use crate::parser::PropertyPath;

/// Explicit bindings for a single expansion
///
/// Named values serve `#{}`, `:name` and `${}` placeholders; positional values
/// are consumed left to right by `?` placeholders.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use sqlx_sql_template::TemplateBindings;
///
/// let bindings = TemplateBindings::new()
///    .with("user", json!({ "name": "Alice", "address": { "city": "Oslo" } }))
///    .with("table", "users")
///    .with_positional(42);
///
/// assert_eq!(bindings.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateBindings {
   named: IndexMap<String, JsonValue>,
   positional: Vec<JsonValue>,
}

impl TemplateBindings {
   pub fn new() -> Self {
      Self::default()
   }

   /// Binds `name`, replacing any earlier value
   pub fn with(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
      self.named.insert(name.into(), value.into());
      self
   }

   /// Binds any serializable value, typically a struct reached through `#{a.b}`
   pub fn with_serialized<T: Serialize>(
      mut self,
      name: impl Into<String>,
      value: &T,
   ) -> Result<Self> {
      self.named.insert(name.into(), serde_json::to_value(value)?);
      Ok(self)
   }

   /// Appends a value for the next `?`
   pub fn with_positional(mut self, value: impl Into<JsonValue>) -> Self {
      self.positional.push(value.into());
      self
   }

   pub fn insert(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
      self.named.insert(name.into(), value.into());
   }

   pub fn push_positional(&mut self, value: impl Into<JsonValue>) {
      self.positional.push(value.into());
   }

   pub fn get(&self, name: &str) -> Option<&JsonValue> {
      self.named.get(name)
   }

   pub fn positional(&self) -> &[JsonValue] {
      &self.positional
   }

   /// Number of named bindings
   pub fn len(&self) -> usize {
      self.named.len()
   }

   pub fn is_empty(&self) -> bool {
      self.named.is_empty() && self.positional.is_empty()
   }
}

impl<K: Into<String>, V: Into<JsonValue>> FromIterator<(K, V)> for TemplateBindings {
   fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
      Self {
         named: iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
         positional: Vec::new(),
      }
   }
}

/// Named values pushed on the calling thread ahead of a templated call
///
/// Later pushes shadow earlier ones with the same name.
#[derive(Debug, Default)]
pub struct BindingStack {
   entries: Vec<(String, JsonValue)>,
}

impl BindingStack {
   pub fn push(&mut self, name: String, value: JsonValue) {
      self.entries.push((name, value));
   }

   pub fn pop(&mut self) -> Option<(String, JsonValue)> {
      self.entries.pop()
   }

   pub fn clear(&mut self) {
      self.entries.clear();
   }

   pub fn get(&self, name: &str) -> Option<&JsonValue> {
      self
         .entries
         .iter()
         .rev()
         .find(|(n, _)| n == name)
         .map(|(_, v)| v)
   }

   pub fn len(&self) -> usize {
      self.entries.len()
   }

   pub fn is_empty(&self) -> bool {
      self.entries.is_empty()
   }
}

impl Vacancy for BindingStack {
   fn is_vacant(&self) -> bool {
      self.entries.is_empty()
   }
}

/// Walks `path` through `root`, the value bound to its first segment
///
/// Objects are entered by key, arrays by numeric index.
pub(crate) fn resolve_path(root: &JsonValue, path: &PropertyPath) -> Result<JsonValue> {
   let mut current = root;
   for member in path.members() {
      let next = match current {
         JsonValue::Object(map) => map.get(member),
         JsonValue::Array(items) => member.parse::<usize>().ok().and_then(|i| items.get(i)),
         _ => None,
      };
      current = next.ok_or_else(|| Error::Resolution {
         path: path.to_string(),
         segment: member.clone(),
      })?;
   }
   Ok(current.clone())
}
