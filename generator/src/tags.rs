use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Recognized tag names, longest first so that prefix matching picks the
/// most specific tag (@EnumValuesFor before @Enum, @PathParam before @Path).
pub const TAG_VOCABULARY: &[&str] = &[
  "EnumValuesFor",
  "RequestHeader",
  "ResourceGroup",
  "InheritFrom",
  "QueryParam",
  "PathParam",
  "BodyParam",
  "FileParam",
  "Context",
  "Service",
  "Entity",
  "Format",
  "Return",
  "Upload",
  "Alias",
  "Flags",
  "Json",
  "Path",
  "Http",
  "Enum",
  "Data",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
  Entity,
  Data,
  Enum,
  EnumValues,
  Service,
}

/// Structured tags plus the residual free-text documentation of one
/// comment group. Unrecognized tags stay in the docs, never an error.
#[derive(Debug, Default)]
pub struct TagBag {
  tags: HashMap<&'static str, Vec<String>>,
  pub docs: Vec<String>,
}

impl TagBag {
  pub fn parse(lines: &[String]) -> TagBag {
    let mut bag = TagBag::default();
    for line in lines {
      let text = trim_comment(line);
      match match_tag(text) {
        Some((tag, value)) => bag.tags.entry(tag).or_default().push(value),
        None => {
          if !text.is_empty() {
            bag.docs.push(text.to_owned());
          }
        }
      }
    }
    bag
  }

  pub fn has(&self, tag: &str) -> bool {
    self.tags.contains_key(tag)
  }

  pub fn get(&self, tag: &str) -> Option<&str> {
    self.tags.get(tag).and_then(|values| values.first()).map(String::as_str)
  }

  pub fn get_all(&self, tag: &str) -> &[String] {
    self.tags.get(tag).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Declarations carrying tags for more than one kind resolve by fixed
  /// precedence: Service > EnumValues > Enum > Entity > Data.
  pub fn classify(&self) -> Option<DeclarationKind> {
    if self.has("Service") {
      Some(DeclarationKind::Service)
    } else if self.has("EnumValuesFor") {
      Some(DeclarationKind::EnumValues)
    } else if self.has("Enum") {
      Some(DeclarationKind::Enum)
    } else if self.has("Entity") {
      Some(DeclarationKind::Entity)
    } else if self.has("Data") {
      Some(DeclarationKind::Data)
    } else {
      None
    }
  }
}

pub fn trim_comment(line: &str) -> &str {
  let mut text = line.trim();
  if let Some(rest) = text.strip_prefix("//") {
    text = rest;
  }
  if let Some(rest) = text.strip_prefix("/*") {
    text = rest;
  }
  if let Some(rest) = text.strip_suffix("*/") {
    text = rest;
  }
  while let Some(rest) = text.strip_prefix('*') {
    text = rest;
  }
  text.trim()
}

fn match_tag(text: &str) -> Option<(&'static str, String)> {
  let rest = text.strip_prefix('@')?;
  for &tag in TAG_VOCABULARY {
    if let Some(after) = rest.strip_prefix(tag) {
      match after.chars().next() {
        None => return Some((tag, String::new())),
        Some(':') => return Some((tag, after[1..].trim().to_owned())),
        Some(ch) if ch.is_whitespace() => return Some((tag, after.trim().to_owned())),
        _ => {}
      }
    }
  }
  None
}

static STRUCT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*):"([^"]*)""#).unwrap());

/// Looks up one key in a backtick struct tag like `json:"name" value:"7"`.
pub fn struct_tag(tag: &str, key: &str) -> Option<String> {
  STRUCT_TAG
    .captures_iter(tag)
    .find(|caps| &caps[1] == key)
    .map(|caps| caps[2].to_owned())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bag(lines: &[&str]) -> TagBag {
    TagBag::parse(&lines.iter().map(|s| s.to_string()).collect::<Vec<_>>())
  }

  #[test]
  fn tags_and_residual_docs() {
    let bag = bag(&[
      "// Account of a registered user",
      "// @Entity:accounts",
      "// @Unknown:whatever",
    ]);
    assert_eq!(bag.get("Entity"), Some("accounts"));
    assert_eq!(bag.docs, vec!["Account of a registered user", "@Unknown:whatever"]);
  }

  #[test]
  fn longest_prefix_wins() {
    let bag = bag(&["// @EnumValuesFor:Color", "// @PathParam:id|string|the id"]);
    assert!(bag.has("EnumValuesFor"));
    assert!(!bag.has("Enum"));
    assert!(bag.has("PathParam"));
    assert!(!bag.has("Path"));
  }

  #[test]
  fn repeated_tags_accumulate() {
    let bag = bag(&["// @RequestHeader:X-Token", "// @RequestHeader:X-Trace"]);
    assert_eq!(bag.get_all("RequestHeader"), ["X-Token", "X-Trace"]);
  }

  #[test]
  fn http_value_keeps_verb_and_path() {
    let bag = bag(&["// @Http:GET /accounts/{id}"]);
    assert_eq!(bag.get("Http"), Some("GET /accounts/{id}"));
  }

  #[test]
  fn classification_precedence() {
    assert_eq!(bag(&["// @Data", "// @Service"]).classify(), Some(DeclarationKind::Service));
    assert_eq!(bag(&["// @Entity:t", "// @Data"]).classify(), Some(DeclarationKind::Entity));
    assert_eq!(bag(&["// plain docs"]).classify(), None);
  }

  #[test]
  fn block_comment_trimming() {
    assert_eq!(trim_comment("/* @Data */"), "@Data");
    assert_eq!(trim_comment(" * trailing star line"), "trailing star line");
  }

  #[test]
  fn struct_tag_lookup() {
    let tag = r#"json:"name,omitempty" value:"7""#;
    assert_eq!(struct_tag(tag, "json").as_deref(), Some("name,omitempty"));
    assert_eq!(struct_tag(tag, "value").as_deref(), Some("7"));
    assert_eq!(struct_tag(tag, "bson"), None);
  }
}
