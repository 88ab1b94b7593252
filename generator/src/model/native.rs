use std::collections::HashMap;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

/// Fixed source -> destination primitive table.
pub static NATIVE_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
  HashMap::from([
    ("double", "number"),
    ("float", "number"),
    ("float32", "number"),
    ("float64", "number"),
    ("int", "number"),
    ("int32", "number"),
    ("int64", "number"),
    ("uint32", "number"),
    ("uint64", "number"),
    ("sint32", "number"),
    ("sint64", "number"),
    ("fixed32", "number"),
    ("fixed64", "number"),
    ("sfixed32", "number"),
    ("sfixed64", "number"),
    ("bool", "boolean"),
    ("string", "string"),
    ("bytes", "File"),
    ("any", "any"),
    ("Timestamp", "number"),
    ("Json", "Map<string, object>"),
    ("StreamContent", "File"),
  ])
});

static MAP_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^map\[([^\[\]]+)\](.+)$").unwrap());

/// Splits a leading `[]` array marker off a type name.
pub fn strip_array_marker(name: &str) -> (&str, bool) {
  match name.strip_prefix("[]") {
    Some(rest) => (rest, true),
    None => (name, false),
  }
}

/// A native name has a fixed destination mapping and never becomes a
/// dependency edge. Both source and destination spellings count.
pub fn is_native_type(name: &str) -> bool {
  let (bare, _) = strip_array_marker(name.trim());
  if NATIVE_TYPES.contains_key(bare) || NATIVE_TYPES.values().contains(&bare) {
    return true;
  }
  if bare == "Map" || bare == "object" || bare.starts_with("Map<") {
    return true;
  }
  bare.eq_ignore_ascii_case("streamcontent")
}

pub fn get_destination_type(name: &str) -> String {
  let name = name.trim();
  if let Some(rest) = name.strip_prefix("[]") {
    return get_destination_type(rest);
  }

  if let Some(caps) = MAP_TYPE.captures(name) {
    let key = &caps[1];
    let value = &caps[2];
    if key == "string" && (value == "any" || value == "interface{}") {
      return "Map<string, object>".to_owned();
    }
    return format!("Map<{}, {}>", get_destination_type(key), get_destination_type(value));
  }

  if let Some(open) = name.find('<') {
    if let Some(inner) = name[open + 1..].strip_suffix('>') {
      let head = &name[..open];
      let head = NATIVE_TYPES.get(head).copied().unwrap_or(head);
      let args = split_generic_args(inner).iter().map(|arg| get_destination_type(arg)).join(", ");
      return format!("{}<{}>", head, args);
    }
  }

  // user-defined names map to themselves
  NATIVE_TYPES.get(name).copied().unwrap_or(name).to_owned()
}

/// Display-format defaults keyed off the source type.
pub fn default_format(source_type: &str) -> Option<&'static str> {
  match source_type {
    "double" | "float" | "float32" | "float64" => Some("decimal"),
    "Timestamp" => Some("datetime"),
    _ => None,
  }
}

fn split_generic_args(input: &str) -> Vec<&str> {
  let mut args = Vec::new();
  let mut depth = 0usize;
  let mut start = 0usize;
  for (pos, ch) in input.char_indices() {
    match ch {
      '<' => depth += 1,
      '>' => depth = depth.saturating_sub(1),
      ',' if depth == 0 => {
        args.push(input[start..pos].trim());
        start = pos + 1;
      }
      _ => {}
    }
  }
  args.push(input[start..].trim());
  args
}
