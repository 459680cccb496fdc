//! Template expansion with a parsed-template cache and thread-scoped bindings

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx_tx_conn_mgr::ThreadScopedState;
use tracing::trace;

use crate::bindings::{BindingStack, TemplateBindings, resolve_path};
use crate::error::{Error, Result};
use crate::parser::{ParsedTemplate, PropertyPath, Segment, parse};

/// Default number of distinct templates kept parsed
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

/// Final SQL and the parameters its `?` markers stand for, in order
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
   pub sql: String,
   pub params: Vec<JsonValue>,
}

/// Expands SQL templates into parameterized SQL
///
/// Names are looked up in the explicit bindings of the call first, then in the
/// values pushed on the calling thread with [`put`](Self::put) and friends.
///
/// # Example
///
/// ```
/// use sqlx_sql_template::{TemplateBindings, TemplateEngine};
///
/// let engine = TemplateEngine::new();
/// let sql = format!(
///    "SELECT * FROM ${{table}} WHERE name = #{{name}}{}",
///    engine.put0("table", "users")
/// );
///
/// let expansion = engine
///    .expand(&sql, &TemplateBindings::new().with("name", "Alice"))
///    .unwrap();
///
/// assert_eq!(expansion.sql, "SELECT * FROM users WHERE name = ?");
/// assert_eq!(expansion.params, vec![serde_json::json!("Alice")]);
/// ```
pub struct TemplateEngine {
   cache: RwLock<HashMap<String, Arc<ParsedTemplate>>>,
   cache_capacity: usize,
   stack: ThreadScopedState<BindingStack>,
}

impl Default for TemplateEngine {
   fn default() -> Self {
      Self::new()
   }
}

impl TemplateEngine {
   pub fn new() -> Self {
      Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
   }

   /// A capacity of zero disables caching
   pub fn with_cache_capacity(cache_capacity: usize) -> Self {
      Self {
         cache: RwLock::new(HashMap::new()),
         cache_capacity,
         stack: ThreadScopedState::new(),
      }
   }

   /// Expands `template` against `bindings` and the calling thread's stack
   ///
   /// The stack is left untouched; see [`clear_bindings`](Self::clear_bindings).
   pub fn expand(&self, template: &str, bindings: &TemplateBindings) -> Result<Expansion> {
      let parsed = self.parsed(template)?;
      self
         .stack
         .inspect(|stack| render(&parsed, bindings, stack))
   }

   /// Parses `template`, or returns the cached parse
   pub fn parsed(&self, template: &str) -> Result<Arc<ParsedTemplate>> {
      if let Some(parsed) = self.cache.read().get(template) {
         return Ok(Arc::clone(parsed));
      }

      let parsed = Arc::new(parse(template)?);
      if self.cache_capacity > 0 {
         let mut cache = self.cache.write();
         if cache.len() >= self.cache_capacity {
            trace!(capacity = self.cache_capacity, "Template cache full, clearing");
            cache.clear();
         }
         cache.insert(template.to_string(), Arc::clone(&parsed));
      }
      Ok(parsed)
   }

   /// Number of templates currently cached
   pub fn cached_templates(&self) -> usize {
      self.cache.read().len()
   }

   /// Clears the calling thread's stack, then pushes `name`
   ///
   /// Returns an empty string so the call can sit inside the template text it
   /// binds for.
   pub fn put0(&self, name: impl Into<String>, value: impl Into<JsonValue>) -> &'static str {
      let (name, value) = (name.into(), value.into());
      self.stack.with(|stack| {
         stack.clear();
         stack.push(name, value);
      });
      ""
   }

   /// Pushes `name` onto the calling thread's stack
   pub fn put(&self, name: impl Into<String>, value: impl Into<JsonValue>) -> &'static str {
      let (name, value) = (name.into(), value.into());
      self.stack.with(|stack| stack.push(name, value));
      ""
   }

   /// Pushes a serializable value onto the calling thread's stack
   pub fn put_serialized<T: Serialize>(
      &self,
      name: impl Into<String>,
      value: &T,
   ) -> Result<&'static str> {
      let value = serde_json::to_value(value)?;
      Ok(self.put(name, value))
   }

   /// Pushes text meant for a `${name}` placeholder
   ///
   /// Raw text is inlined without escaping.
   pub fn replace(&self, name: impl Into<String>, text: impl Into<String>) -> &'static str {
      self.put(name, JsonValue::String(text.into()))
   }

   /// Pops the most recent value pushed on the calling thread
   pub fn pop(&self) -> Option<(String, JsonValue)> {
      self.stack.with(BindingStack::pop)
   }

   /// Drops every value pushed on the calling thread
   pub fn clear_bindings(&self) {
      self.stack.clear_for_current_thread();
   }

   /// Number of values pushed on the calling thread
   pub fn pushed_bindings(&self) -> usize {
      self.stack.inspect(|stack| stack.map_or(0, BindingStack::len))
   }
}

fn render(
   parsed: &ParsedTemplate,
   bindings: &TemplateBindings,
   stack: Option<&BindingStack>,
) -> Result<Expansion> {
   let mut sql = String::new();
   let mut params = Vec::new();
   let mut positional = bindings.positional().iter();
   let mut positional_index = 0;

   for segment in parsed.segments() {
      match segment {
         Segment::Text(text) => sql.push_str(text),
         Segment::Positional => {
            positional_index += 1;
            let value = positional
               .next()
               .ok_or_else(|| Error::UnboundParameter(format!("?{}", positional_index)))?;
            sql.push('?');
            params.push(value.clone());
         }
         Segment::Value(path) => {
            sql.push('?');
            params.push(lookup(path, bindings, stack)?);
         }
         Segment::Raw(path) => sql.push_str(&raw_text(lookup(path, bindings, stack)?)),
      }
   }

   Ok(Expansion { sql, params })
}

fn lookup(
   path: &PropertyPath,
   bindings: &TemplateBindings,
   stack: Option<&BindingStack>,
) -> Result<JsonValue> {
   let root = bindings
      .get(path.root())
      .or_else(|| stack.and_then(|s| s.get(path.root())))
      .ok_or_else(|| Error::UnboundParameter(path.root().to_string()))?;
   resolve_path(root, path)
}

fn raw_text(value: JsonValue) -> String {
   match value {
      JsonValue::String(s) => s,
      JsonValue::Null => "NULL".to_string(),
      other => other.to_string(),
   }
}
