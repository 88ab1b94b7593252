pub mod generics;
pub mod native;

use std::collections::HashMap;

use self::generics::TypeNode;

/// Full in-memory result of one generation run, grouped by package.
#[derive(Debug, Default)]
pub struct MetaModel {
  pub packages: HashMap<String, PackageInfo>,
}

impl MetaModel {
  pub fn new() -> MetaModel {
    MetaModel::default()
  }

  /// Declarations without a package land in the "model" bucket.
  pub fn package_mut(&mut self, name: &str) -> &mut PackageInfo {
    let key = if name.is_empty() { "model" } else { name };
    self.packages.entry(key.to_owned()).or_insert_with(|| PackageInfo::new(key))
  }
}

#[derive(Debug, Default)]
pub struct PackageInfo {
  pub name: String,
  pub docs: Vec<String>,
  pub classes: HashMap<String, ClassInfo>,
  pub enums: HashMap<String, EnumInfo>,
  pub services: HashMap<String, ServiceInfo>,
  /// Alias name -> canonical type name, registered by @Alias field tags.
  pub aliases: HashMap<String, String>,
}

impl PackageInfo {
  pub fn new(name: &str) -> PackageInfo {
    PackageInfo { name: name.to_owned(), ..PackageInfo::default() }
  }
}

#[derive(Debug, Default)]
pub struct ClassInfo {
  pub name: String,
  pub display_name: String,
  /// Backing table name from @Entity:<tableName>, empty for plain data classes.
  pub table_name: String,
  /// Ordered (parameter name, constraint) pairs.
  pub generic_params: Vec<(String, String)>,
  /// Empty when the class extends nothing.
  pub base_class: String,
  pub is_extend: bool,
  pub fields: Vec<FieldInfo>,
  /// Destination type name -> array marker, used only for import emission.
  pub dependencies: HashMap<String, String>,
  pub is_param: bool,
  pub is_visible: bool,
  pub docs: Vec<String>,
}

impl ClassInfo {
  pub fn new(name: &str) -> ClassInfo {
    ClassInfo { name: name.to_owned(), ..ClassInfo::default() }
  }
}

#[derive(Debug, Clone, Default)]
pub struct FieldInfo {
  pub name: String,
  /// Destination field name: @Json tag, backtick json tag or the lowercased name.
  pub json_name: String,
  pub source_type: String,
  pub ts_type: String,
  pub is_array: bool,
  pub is_map: bool,
  /// False only for number/string/boolean destinations.
  pub is_complex: bool,
  pub generic_args: Vec<String>,
  pub required: bool,
  pub param_kind: ParamKind,
  /// Display-format hint (@Format, or "decimal"/"datetime" defaults).
  pub format: String,
  pub docs: Vec<String>,
  pub sequence: usize,
}

/// Parameter-passing category of a field; every field has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamKind {
  #[default]
  None,
  Path,
  Query,
  Body,
  File,
}

#[derive(Debug, Default)]
pub struct EnumInfo {
  pub name: String,
  pub underlying: String,
  pub is_flags: bool,
  pub values: Vec<EnumValueInfo>,
  pub docs: Vec<String>,
}

impl EnumInfo {
  pub fn new(name: &str) -> EnumInfo {
    EnumInfo { name: name.to_owned(), underlying: "int".to_owned(), ..EnumInfo::default() }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueInfo {
  pub name: String,
  pub value: i64,
  pub docs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ServiceInfo {
  pub name: String,
  pub display_name: String,
  pub base_path: String,
  pub headers: Vec<String>,
  pub resource_group: String,
  pub context: String,
  pub methods: Vec<MethodInfo>,
  pub dependencies: HashMap<String, String>,
  pub docs: Vec<String>,
}

impl ServiceInfo {
  pub fn new(name: &str) -> ServiceInfo {
    ServiceInfo { name: name.to_owned(), ..ServiceInfo::default() }
  }
}

#[derive(Debug, Default)]
pub struct MethodInfo {
  pub name: String,
  pub verb: String,
  /// Path relative to the service base path.
  pub path: String,
  pub path_params: Vec<ParamInfo>,
  pub query_params: Vec<ParamInfo>,
  pub body_params: Vec<ParamInfo>,
  pub file_params: Vec<ParamInfo>,
  pub context: String,
  /// Raw return type name as written, before alias resolution.
  pub return_class: String,
  pub return_type: Option<TypeNode>,
  pub return_is_array: bool,
  pub is_upload: bool,
  pub is_stream: bool,
  pub docs: Vec<String>,
}

impl MethodInfo {
  pub fn new(name: &str) -> MethodInfo {
    MethodInfo { name: name.to_owned(), ..MethodInfo::default() }
  }
}

#[derive(Debug, Clone, Default)]
pub struct ParamInfo {
  pub name: String,
  pub ts_type: String,
  pub is_array: bool,
  pub docs: String,
}

pub fn small_caps(name: &str) -> String {
  let mut chars = name.chars();
  match chars.next() {
    Some(first) => first.to_lowercase().chain(chars).collect(),
    None => String::new(),
  }
}

pub fn title(name: &str) -> String {
  let mut chars = name.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn name_casing() {
    assert_eq!(small_caps("AccountName"), "accountName");
    assert_eq!(small_caps(""), "");
    assert_eq!(title("accountService"), "AccountService");
  }

  #[test]
  fn unnamed_package_defaults_to_model() {
    let mut model = MetaModel::new();
    model.package_mut("").docs.push("default bucket".to_owned());
    assert!(model.packages.contains_key("model"));
  }
}
