//! Placeholder scanner
//!
//! Recognized syntax, outside quoted literals, quoted identifiers and
//! comments:
//!
//! | Syntax    | Becomes                                   |
//! |-----------|-------------------------------------------|
//! | `?`       | a parameter taken from the positional list |
//! | `#{a.b}`  | a parameter resolved from a property path |
//! | `:a.b`    | same as `#{a.b}`                          |
//! | `${a.b}`  | the resolved value inlined as raw text    |
//!
//! `::` (a type cast) is left untouched.

use std::fmt;

use crate::error::{Error, Result};

/// A dotted member path such as `user.address.city`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
   segments: Vec<String>,
}

impl PropertyPath {
   /// Parses `a.b.c`; members after the root may also be array indexes
   pub fn parse(text: &str) -> Option<Self> {
      let segments: Vec<String> = text.split('.').map(str::to_string).collect();
      let (root, members) = segments.split_first()?;
      let valid_member =
         |s: &String| is_identifier(s) || (!s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
      if !is_identifier(root) || !members.iter().all(valid_member) {
         return None;
      }
      Some(Self { segments })
   }

   /// The binding name the path starts from
   pub fn root(&self) -> &str {
      &self.segments[0]
   }

   /// Member names following the root, in access order
   pub fn members(&self) -> &[String] {
      &self.segments[1..]
   }
}

impl fmt::Display for PropertyPath {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.segments.join("."))
   }
}

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
   /// SQL copied through as-is
   Text(String),
   /// `?`
   Positional,
   /// `#{path}` or `:path`
   Value(PropertyPath),
   /// `${path}`
   Raw(PropertyPath),
}

/// A template split into literal text and placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
   segments: Vec<Segment>,
}

impl ParsedTemplate {
   pub fn segments(&self) -> &[Segment] {
      &self.segments
   }

   /// Names of every binding the template refers to, without duplicates
   pub fn binding_names(&self) -> Vec<&str> {
      let mut names: Vec<&str> = Vec::new();
      for segment in &self.segments {
         if let Segment::Value(path) | Segment::Raw(path) = segment
            && !names.contains(&path.root())
         {
            names.push(path.root());
         }
      }
      names
   }
}

/// Splits `template` into text and placeholder segments
pub fn parse(template: &str) -> Result<ParsedTemplate> {
   let bytes = template.as_bytes();
   let mut segments = Vec::new();
   let mut text = String::new();
   let mut i = 0;

   while i < bytes.len() {
      match bytes[i] {
         quote @ (b'\'' | b'"') => {
            let end = closing_quote(bytes, i, quote)?;
            text.push_str(&template[i..=end]);
            i = end + 1;
         }
         b'-' if bytes.get(i + 1) == Some(&b'-') => {
            let end = template[i..].find('\n').map_or(bytes.len(), |offset| i + offset);
            text.push_str(&template[i..end]);
            i = end;
         }
         b'/' if bytes.get(i + 1) == Some(&b'*') => {
            let end = template[i + 2..]
               .find("*/")
               .map(|offset| i + 2 + offset + 2)
               .ok_or_else(|| Error::malformed(i, "unterminated block comment"))?;
            text.push_str(&template[i..end]);
            i = end;
         }
         b'?' => {
            flush_text(&mut text, &mut segments);
            segments.push(Segment::Positional);
            i += 1;
         }
         marker @ (b'#' | b'$') if bytes.get(i + 1) == Some(&b'{') => {
            let close = template[i + 2..]
               .find('}')
               .map(|offset| i + 2 + offset)
               .ok_or_else(|| Error::malformed(i, "unterminated placeholder"))?;
            let name = template[i + 2..close].trim();
            let path = PropertyPath::parse(name)
               .ok_or_else(|| Error::malformed(i, format!("invalid placeholder name '{}'", name)))?;

            flush_text(&mut text, &mut segments);
            segments.push(if marker == b'#' {
               Segment::Value(path)
            } else {
               Segment::Raw(path)
            });
            i = close + 1;
         }
         b':' if bytes.get(i + 1) == Some(&b':') => {
            text.push_str("::");
            i += 2;
         }
         b':' if bytes.get(i + 1).is_some_and(|b| is_identifier_start(*b)) => {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (is_identifier_byte(bytes[end]) || is_path_dot(bytes, end)) {
               end += 1;
            }
            let name = &template[start..end];
            let path = PropertyPath::parse(name)
               .ok_or_else(|| Error::malformed(i, format!("invalid placeholder name '{}'", name)))?;

            flush_text(&mut text, &mut segments);
            segments.push(Segment::Value(path));
            i = end;
         }
         _ => {
            let ch_len = utf8_len(bytes[i]);
            text.push_str(&template[i..i + ch_len]);
            i += ch_len;
         }
      }
   }

   flush_text(&mut text, &mut segments);
   Ok(ParsedTemplate { segments })
}

fn flush_text(text: &mut String, segments: &mut Vec<Segment>) {
   if !text.is_empty() {
      segments.push(Segment::Text(std::mem::take(text)));
   }
}

/// Index of the quote closing the literal opened at `start`; doubled quotes escape
fn closing_quote(bytes: &[u8], start: usize, quote: u8) -> Result<usize> {
   let mut i = start + 1;
   while i < bytes.len() {
      if bytes[i] == quote {
         if bytes.get(i + 1) == Some(&quote) {
            i += 2;
            continue;
         }
         return Ok(i);
      }
      i += 1;
   }
   Err(Error::malformed(start, "unterminated quoted literal"))
}

/// A dot continues a `:name` path only when another identifier follows it
fn is_path_dot(bytes: &[u8], i: usize) -> bool {
   bytes[i] == b'.' && bytes.get(i + 1).is_some_and(|b| is_identifier_start(*b))
}

fn is_identifier(s: &str) -> bool {
   let mut bytes = s.bytes();
   bytes.next().is_some_and(is_identifier_start) && bytes.all(is_identifier_byte)
}

fn is_identifier_start(b: u8) -> bool {
   b.is_ascii_alphabetic() || b == b'_'
}

fn is_identifier_byte(b: u8) -> bool {
   b.is_ascii_alphanumeric() || b == b'_'
}

fn utf8_len(first: u8) -> usize {
   match first {
      0x00..=0x7F => 1,
      0xC0..=0xDF => 2,
      0xE0..=0xEF => 3,
      _ => 4,
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn path(s: &str) -> PropertyPath {
      PropertyPath::parse(s).unwrap()
   }

   #[test]
   fn test_all_placeholder_styles() {
      let parsed = parse("SELECT ${col} FROM t WHERE a = #{user.name} AND b = :age AND c = ?").unwrap();

      assert_eq!(
         parsed.segments(),
         &[
            Segment::Text("SELECT ".into()),
            Segment::Raw(path("col")),
            Segment::Text(" FROM t WHERE a = ".into()),
            Segment::Value(path("user.name")),
            Segment::Text(" AND b = ".into()),
            Segment::Value(path("age")),
            Segment::Text(" AND c = ".into()),
            Segment::Positional,
         ]
      );
      assert_eq!(parsed.binding_names(), vec!["col", "user", "age"]);
   }

   #[test]
   fn test_quoted_literals_are_opaque() {
      let parsed = parse("SELECT '?', 'it''s :x', \"#{y}\" FROM t").unwrap();
      assert_eq!(
         parsed.segments(),
         &[Segment::Text("SELECT '?', 'it''s :x', \"#{y}\" FROM t".into())]
      );
   }

   #[test]
   fn test_type_cast_is_not_a_placeholder() {
      let parsed = parse("SELECT x::text, :a.b. FROM t").unwrap();
      assert_eq!(
         parsed.segments(),
         &[
            Segment::Text("SELECT x::text, ".into()),
            Segment::Value(path("a.b")),
            Segment::Text(". FROM t".into()),
         ]
      );
   }

   #[test]
   fn test_comments_are_opaque() {
      let parsed = parse("SELECT a -- why? :x\nFROM t /* #{y} ? */ WHERE b = ?").unwrap();
      assert_eq!(
         parsed.segments(),
         &[
            Segment::Text("SELECT a -- why? :x\nFROM t /* #{y} ? */ WHERE b = ".into()),
            Segment::Positional,
         ]
      );

      let parsed = parse("SELECT 1 -- trailing ?").unwrap();
      assert_eq!(parsed.segments(), &[Segment::Text("SELECT 1 -- trailing ?".into())]);
   }

   #[test]
   fn test_unterminated_block_comment() {
      assert!(matches!(
         parse("SELECT 1 /* open ?"),
         Err(Error::Malformed { position: 9, .. })
      ));
   }

   #[test]
   fn test_multibyte_text_survives() {
      let parsed = parse("SELECT 'é' AS ü, #{name}").unwrap();
      assert_eq!(
         parsed.segments(),
         &[
            Segment::Text("SELECT 'é' AS ü, ".into()),
            Segment::Value(path("name")),
         ]
      );
   }

   #[test]
   fn test_unterminated_placeholder() {
      let err = parse("SELECT * FROM t WHERE id = #{id").unwrap_err();
      assert!(matches!(err, Error::Malformed { position: 27, .. }));
   }

   #[test]
   fn test_invalid_placeholder_names() {
      assert!(matches!(parse("#{}"), Err(Error::Malformed { .. })));
      assert!(matches!(parse("${a..b}"), Err(Error::Malformed { .. })));
      assert!(matches!(parse("#{1abc}"), Err(Error::Malformed { .. })));
   }

   #[test]
   fn test_unterminated_quote() {
      assert!(matches!(parse("SELECT 'oops"), Err(Error::Malformed { position: 7, .. })));
   }
}
