//! # sqlx-sql-template
//!
//! Turns SQL templates into parameterized SQL plus an ordered parameter list.
//!
//! ## Core Types
//!
//! - **[`TemplateEngine`]**: Parses, caches and expands templates; owns the
//!   per-thread binding stack fed by [`put`](TemplateEngine::put)
//! - **[`TemplateBindings`]**: Explicit named and positional values for one call
//! - **[`Expansion`]**: The resulting SQL and parameters
//! - **[`Error`]**: Error type for parsing and resolution failures
//!
//! ## Placeholders
//!
//! - `?`: next positional value
//! - `#{a.b}` / `:a.b`: value parameter, nested members resolved through JSON
//!   objects and arrays
//! - `${a.b}`: raw text, inlined without escaping
//!
//! Expansion is deterministic: the same template and bindings always produce
//! the same SQL and parameters.
//!
mod bindings;
mod engine;
mod error;
mod parser;

pub use bindings::{BindingStack, TemplateBindings};
pub use engine::{DEFAULT_CACHE_CAPACITY, Expansion, TemplateEngine};
pub use error::{Error, Result};
pub use parser::{ParsedTemplate, PropertyPath, Segment, parse};
