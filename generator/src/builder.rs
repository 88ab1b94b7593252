use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use itertools::Itertools;
use modelgen_parser::{parse_source, tokenizer, Decl, FuncDecl, SourceFile, TypeBody, TypeDecl, TypeExpr};
use thiserror::Error;
use tracing::{trace, warn};
use walkdir::WalkDir;

use crate::model::{generics, native, small_caps, title};
use crate::model::{ClassInfo, EnumInfo, EnumValueInfo, FieldInfo, MetaModel, MethodInfo, ParamInfo, ParamKind, ServiceInfo};
use crate::tags::{struct_tag, DeclarationKind, TagBag};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Per-declaration problem surfaced after the run; never aborts it.
#[derive(Debug, Clone)]
pub struct Diagnostic {
  pub origin: String,
  pub message: String,
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.origin, self.message)
  }
}

pub struct SemanticModelBuilder {
  model: MetaModel,
  source_root: PathBuf,
  path_filter: Option<String>,
  /// Run-scoped guard against reparsing on cyclic imports. Shared so that
  /// several builders feeding one run can coordinate.
  parsed: Arc<Mutex<HashSet<PathBuf>>>,
  diagnostics: Vec<Diagnostic>,
}

impl SemanticModelBuilder {
  pub fn new(source_root: PathBuf) -> SemanticModelBuilder {
    SemanticModelBuilder {
      model: MetaModel::new(),
      source_root,
      path_filter: None,
      parsed: Arc::new(Mutex::new(HashSet::new())),
      diagnostics: Vec::new(),
    }
  }

  /// Import paths containing this fragment are mapped onto the source root
  /// and parsed recursively.
  pub fn with_filter(mut self, filter: String) -> SemanticModelBuilder {
    self.path_filter = Some(filter);
    self
  }

  pub fn model(&self) -> &MetaModel {
    &self.model
  }

  pub fn diagnostics(&self) -> &[Diagnostic] {
    &self.diagnostics
  }

  pub fn finish(self) -> (MetaModel, Vec<Diagnostic>) {
    (self.model, self.diagnostics)
  }

  pub fn parse_file(&mut self, path: &Path) -> Result<(), BuildError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    {
      let mut parsed = self.parsed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
      if !parsed.insert(canonical.clone()) {
        return Ok(());
      }
    }

    trace!("parsing {:?}", canonical);
    let source = fs::read_to_string(&canonical).map_err(|source| BuildError::Read { path: canonical.clone(), source })?;
    self.process_source(&canonical.display().to_string(), &source);
    Ok(())
  }

  /// Entry point for in-memory sources; `origin` labels diagnostics.
  pub fn process_source(&mut self, origin: &str, source: &str) {
    let tokens = match tokenizer(source) {
      Ok(tokens) => tokens,
      Err(err) => {
        self.report(origin, format!("tokenizer error: {}", err));
        return;
      }
    };
    let mut iter = itertools::multipeek(tokens.iter());
    match parse_source(&mut iter) {
      Ok(file) => self.process_file(origin, &file),
      Err(err) => self.report(origin, format!("parse error: {}", err)),
    }
  }

  fn process_file(&mut self, origin: &str, file: &SourceFile) {
    let package = if file.package.is_empty() { "model".to_owned() } else { file.package.clone() };

    // Types first so that receiver functions find their service.
    for decl in &file.decls {
      if let Decl::Type(decl) = decl {
        self.process_type_decl(origin, &package, decl);
      }
    }
    for decl in &file.decls {
      if let Decl::Func(decl) = decl {
        self.process_func_decl(&package, decl);
      }
    }

    for import in &file.imports {
      self.follow_import(import);
    }
  }

  fn follow_import(&mut self, import: &str) {
    let Some(filter) = self.path_filter.clone() else { return };
    let Some(idx) = import.find(&filter) else { return };

    let relative = import[idx + filter.len()..].trim_start_matches('/');
    let dir = self.source_root.join(relative);
    if !dir.is_dir() {
      return;
    }

    let files = WalkDir::new(&dir)
      .max_depth(1)
      .into_iter()
      .filter_map(|entry| entry.ok())
      .filter(|entry| entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "go"))
      .map(|entry| entry.into_path())
      .collect_vec();
    for path in files {
      if let Err(err) = self.parse_file(&path) {
        self.report(&path.display().to_string(), err.to_string());
      }
    }
  }

  fn process_type_decl(&mut self, origin: &str, package: &str, decl: &TypeDecl) {
    let bag = TagBag::parse(&decl.docs);
    let Some(kind) = bag.classify() else {
      trace!("skipping untagged declaration {}", decl.name);
      return;
    };

    match kind {
      DeclarationKind::Entity | DeclarationKind::Data => self.process_class(origin, package, decl, &bag, kind),
      DeclarationKind::Enum => self.process_enum(package, decl, &bag),
      DeclarationKind::EnumValues => self.process_enum_values(origin, package, decl, &bag),
      DeclarationKind::Service => self.process_service(package, decl, &bag),
    }
  }

  fn process_class(&mut self, origin: &str, package: &str, decl: &TypeDecl, bag: &TagBag, kind: DeclarationKind) {
    let TypeBody::Struct(fields) = &decl.body else {
      self.report(origin, format!("{} is tagged as a class but is not a struct", decl.name));
      return;
    };

    let mut class = ClassInfo::new(&decl.name);
    class.display_name = title(&decl.name);
    class.docs = bag.docs.clone();
    class.is_visible = true;
    if kind == DeclarationKind::Entity {
      class.table_name = bag.get("Entity").unwrap_or_default().to_owned();
    }
    class.generic_params = decl
      .type_params
      .iter()
      .map(|param| (param.name.clone(), param.constraint.clone()))
      .collect_vec();

    let mut aliases: Vec<(String, String)> = Vec::new();

    for field in fields {
      let field_bag = TagBag::parse(&field.docs);

      let source_type = match render_source(&field.expr) {
        Ok(source_type) => source_type,
        Err(message) => {
          let name = field.name.as_deref().unwrap_or("<embedded>");
          self.report(origin, format!("field {}.{}: {}", decl.name, name, message));
          continue;
        }
      };

      // A nameless field, or one re-tagged as the inheritance anchor,
      // becomes the base class and contributes no FieldInfo.
      if field.name.is_none() || field_bag.has("InheritFrom") {
        class.base_class = source_type;
        class.is_extend = true;
        continue;
      }
      let Some(name) = field.name.as_deref() else { continue };

      if let Some(alias) = field_bag.get("Alias") {
        if !alias.is_empty() {
          let (bare, _) = native::strip_array_marker(&source_type);
          aliases.push((alias.to_owned(), bare.to_owned()));
        }
      }

      let sequence = class.fields.len();
      class.fields.push(extract_field(name, &source_type, &field.expr, field.tag.as_deref(), &field_bag, sequence));
    }

    trace!("class {}.{} with {} fields", package, class.name, class.fields.len());
    let pkg = self.model.package_mut(package);
    pkg.aliases.extend(aliases);
    pkg.classes.insert(class.name.clone(), class);
  }

  fn process_enum(&mut self, package: &str, decl: &TypeDecl, bag: &TagBag) {
    let underlying = match &decl.body {
      TypeBody::Alias(TypeExpr::Named { name, .. }) => name.clone(),
      _ => "int".to_owned(),
    };

    let pkg = self.model.package_mut(package);
    let info = pkg.enums.entry(decl.name.clone()).or_insert_with(|| EnumInfo::new(&decl.name));
    info.underlying = underlying;
    info.is_flags = bag.has("Flags");
    info.docs = bag.docs.clone();
  }

  fn process_enum_values(&mut self, origin: &str, package: &str, decl: &TypeDecl, bag: &TagBag) {
    let target = bag.get("EnumValuesFor").unwrap_or_default().to_owned();
    if target.is_empty() {
      self.report(origin, format!("@EnumValuesFor on {} names no enum", decl.name));
      return;
    }
    let TypeBody::Struct(fields) = &decl.body else {
      self.report(origin, format!("{} is tagged @EnumValuesFor but is not a struct", decl.name));
      return;
    };

    let mut values = Vec::new();
    for field in fields {
      let Some(name) = &field.name else { continue };
      let value = field
        .tag
        .as_deref()
        .and_then(|tag| struct_tag(tag, "value"))
        .and_then(|raw| raw.trim().parse::<i64>().ok());
      match value {
        Some(value) => values.push(EnumValueInfo {
          name: name.clone(),
          value,
          docs: TagBag::parse(&field.docs).docs,
        }),
        None => self.report(origin, format!("enum value {}.{} has no parseable value tag, dropped", target, name)),
      }
    }

    let pkg = self.model.package_mut(package);
    let info = pkg.enums.entry(target.clone()).or_insert_with(|| EnumInfo::new(&target));
    info.values.extend(values);
  }

  fn process_service(&mut self, package: &str, decl: &TypeDecl, bag: &TagBag) {
    let mut service = ServiceInfo::new(&decl.name);
    let display = bag.get("Service").unwrap_or_default();
    service.display_name = if display.is_empty() { title(&decl.name) } else { display.to_owned() };
    service.base_path = bag.get("Path").unwrap_or_default().to_owned();
    service.headers = bag.get_all("RequestHeader").to_vec();
    service.resource_group = bag.get("ResourceGroup").unwrap_or_default().to_owned();
    service.context = bag.get("Context").unwrap_or_default().to_owned();
    service.docs = bag.docs.clone();

    trace!("service {}.{}", package, service.name);
    self.model.package_mut(package).services.insert(service.name.clone(), service);
  }

  fn process_func_decl(&mut self, package: &str, decl: &FuncDecl) {
    let Some(receiver) = &decl.receiver else { return };
    let bag = TagBag::parse(&decl.docs);

    // Only @Http-tagged receiver functions are service methods.
    let Some(http) = bag.get("Http").map(str::to_owned) else {
      if bag.has("Context") {
        trace!("{} has no @Http tag, not a service method", decl.name);
      }
      return;
    };

    let mut parts = http.split_whitespace();
    let verb = parts.next().unwrap_or("GET").to_uppercase();
    let path = parts.join(" ");

    let mut method = MethodInfo::new(&small_caps(&decl.name));
    method.verb = verb;
    method.path = path;
    method.context = bag.get("Context").unwrap_or_default().to_owned();
    method.docs = bag.docs.clone();

    if bag.has("Upload") {
      method.is_upload = true;
      if let Some(upload) = bag.get("Upload") {
        if !upload.is_empty() {
          method.name = upload.to_owned();
        }
      }
    }

    for raw in bag.get_all("PathParam") {
      method.path_params.push(parse_param(raw));
    }
    for raw in bag.get_all("QueryParam") {
      method.query_params.push(parse_param(raw));
    }
    for raw in bag.get_all("BodyParam") {
      method.body_params.push(parse_param(raw));
    }
    for raw in bag.get_all("FileParam") {
      method.file_params.push(parse_param(raw));
    }

    if let Some(raw) = bag.get("Return") {
      set_return_type(&mut method, raw);
    }

    let service = self
      .model
      .packages
      .get_mut(package)
      .and_then(|pkg| pkg.services.get_mut(receiver.as_str()));
    match service {
      Some(service) => service.methods.push(method),
      None => trace!("receiver {} is not a known service, skipping {}", receiver, decl.name),
    }
  }

  fn report(&mut self, origin: &str, message: String) {
    warn!("{}: {}", origin, message);
    self.diagnostics.push(Diagnostic { origin: origin.to_owned(), message });
  }
}

/// Renders a type expression back into the source spelling the mapping
/// tables understand. Shapes with no extraction rule are an error for the
/// single field that uses them.
fn render_source(expr: &TypeExpr) -> Result<String, String> {
  match expr {
    TypeExpr::Named { name, .. } => Ok(name.clone()),
    TypeExpr::Pointer { inner } => render_source(inner),
    TypeExpr::Array { elem } => Ok(format!("[]{}", render_source(elem)?)),
    TypeExpr::Generic { head, args } => {
      let TypeExpr::Named { name, .. } = head.as_ref() else {
        return Err("unsupported generic head shape".to_owned());
      };
      let args: Result<Vec<String>, String> = args.iter().map(render_source).collect();
      Ok(format!("{}<{}>", name, args?.join(", ")))
    }
    TypeExpr::Map { key, value } => {
      let TypeExpr::Named { name: key, .. } = key.as_ref() else {
        return Err("unsupported map key shape".to_owned());
      };
      let value = render_source(value)?;
      if key == "string" && value == "any" {
        Ok("Json".to_owned())
      } else {
        Ok(format!("map[{}]{}", key, value))
      }
    }
  }
}

fn peel(expr: &TypeExpr) -> &TypeExpr {
  match expr {
    TypeExpr::Pointer { inner } => peel(inner),
    TypeExpr::Array { elem } => peel(elem),
    _ => expr,
  }
}

fn extract_field(name: &str, source_type: &str, expr: &TypeExpr, tag: Option<&str>, bag: &TagBag, sequence: usize) -> FieldInfo {
  let (bare, is_array) = native::strip_array_marker(source_type);
  let core = peel(expr);

  let ts_type = native::get_destination_type(bare);
  let is_complex = !matches!(ts_type.as_str(), "number" | "string" | "boolean");

  let generic_args = match core {
    TypeExpr::Generic { args, .. } => args.iter().filter_map(|arg| render_source(arg).ok()).collect_vec(),
    _ => Vec::new(),
  };

  let json_tag = tag
    .and_then(|tag| struct_tag(tag, "json"))
    .and_then(|value| value.split(',').next().map(str::to_owned))
    .filter(|value| !value.is_empty() && value != "-");
  let json_name = bag
    .get("Json")
    .filter(|value| !value.is_empty())
    .map(str::to_owned)
    .or(json_tag)
    .unwrap_or_else(|| small_caps(name));

  let format = bag
    .get("Format")
    .map(str::to_owned)
    .or_else(|| native::default_format(bare).map(str::to_owned))
    .unwrap_or_default();

  let param_kind = if bag.has("PathParam") {
    ParamKind::Path
  } else if bag.has("QueryParam") {
    ParamKind::Query
  } else if bag.has("BodyParam") {
    ParamKind::Body
  } else if bag.has("FileParam") {
    ParamKind::File
  } else {
    ParamKind::None
  };

  FieldInfo {
    name: name.to_owned(),
    json_name,
    source_type: bare.to_owned(),
    ts_type,
    is_array,
    is_map: matches!(core, TypeExpr::Map { .. }),
    is_complex,
    generic_args,
    required: !matches!(expr, TypeExpr::Pointer { .. }),
    param_kind,
    format,
    docs: bag.docs.clone(),
    sequence,
  }
}

// name | type | description, the last two optional; a leading [] on the
// type marks an array-valued parameter.
fn parse_param(raw: &str) -> ParamInfo {
  let mut parts = raw.splitn(3, '|');
  let name = parts.next().unwrap_or_default().trim().to_owned();
  let raw_type = parts.next().map(str::trim).filter(|part| !part.is_empty()).unwrap_or("string");
  let docs = parts.next().unwrap_or_default().trim().to_owned();

  let (bare, is_array) = native::strip_array_marker(raw_type);
  ParamInfo {
    name,
    ts_type: native::get_destination_type(&normalize_generics(bare)),
    is_array,
    docs,
  }
}

fn set_return_type(method: &mut MethodInfo, raw: &str) {
  let (bare, is_array) = native::strip_array_marker(raw.trim());
  let normalized = normalize_generics(bare);

  method.return_is_array = is_array;
  if normalized.to_ascii_lowercase().contains("streamcontent") {
    method.is_stream = true;
  }
  method.return_class = normalized.clone();

  match generics::parse(&native::get_destination_type(&normalized)) {
    Ok(node) => method.return_type = Some(node),
    Err(err) => {
      warn!("return type {:?} does not parse: {}", raw, err);
      method.return_type = None;
    }
  }
}

/// Source-side bracketed generics normalize to the angle-bracket grammar.
fn normalize_generics(name: &str) -> String {
  name.replace('[', "<").replace(']', ">")
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use test_log::test;
  use tracing::debug;

  use super::*;

  fn build(source: &str) -> (MetaModel, Vec<Diagnostic>) {
    let mut builder = SemanticModelBuilder::new(PathBuf::from("."));
    builder.process_source("test.go", source);
    let (model, diagnostics) = builder.finish();
    for diagnostic in &diagnostics {
      debug!("{}", diagnostic);
    }
    (model, diagnostics)
  }

  #[test]
  fn entity_class_with_fields() {
    let (model, diagnostics) = build(r#"
      package accounts

      // A registered user account
      // @Entity:accounts
      type Account struct {
        entity.BaseEntity

        Name      string             `json:"display_name"`
        Balance   float64            `json:"balance"`
        Labels    []string           `json:"labels"`
        Props     map[string]any     `json:"props"`
        Parent    *Account           `json:"parent"`
        CreatedAt Timestamp          `json:"createdAt"`
      }
    "#);

    assert!(diagnostics.is_empty());
    let class = &model.packages["accounts"].classes["Account"];
    assert_eq!(class.table_name, "accounts");
    assert_eq!(class.base_class, "BaseEntity");
    assert!(class.is_extend);
    assert_eq!(class.fields.len(), 6);
    assert_eq!(class.docs, vec!["A registered user account"]);

    let name = &class.fields[0];
    assert_eq!(name.json_name, "display_name");
    assert_eq!(name.ts_type, "string");
    assert!(!name.is_complex);

    let balance = &class.fields[1];
    assert_eq!(balance.ts_type, "number");
    assert_eq!(balance.format, "decimal");

    let labels = &class.fields[2];
    assert!(labels.is_array);
    assert_eq!(labels.ts_type, "string");

    let props = &class.fields[3];
    assert_eq!(props.source_type, "Json");
    assert_eq!(props.ts_type, "Map<string, object>");
    assert!(props.is_map);

    let parent = &class.fields[4];
    assert!(!parent.required);
    assert_eq!(parent.ts_type, "Account");

    let created = &class.fields[5];
    assert_eq!(created.ts_type, "number");
    assert_eq!(created.format, "datetime");

    // field order follows declaration order
    assert_eq!(class.fields.iter().map(|f| f.sequence).collect_vec(), vec![0, 1, 2, 3, 4, 5]);
  }

  #[test]
  fn inherit_from_tag_sets_base_class() {
    let (model, _) = build(r#"
      package model

      // @Data
      type Derived struct {
        // @InheritFrom
        Base BaseModel
        Name string `json:"name"`
      }
    "#);

    let class = &model.packages["model"].classes["Derived"];
    assert_eq!(class.base_class, "BaseModel");
    assert!(class.is_extend);
    assert_eq!(class.fields.len(), 1);
  }

  #[test]
  fn generic_class_and_generic_field() {
    let (model, _) = build(r#"
      package model

      // @Data
      type Page[T any] struct {
        Items []T                  `json:"items"`
        Meta  Wrapper[PageMeta]    `json:"meta"`
      }
    "#);

    let class = &model.packages["model"].classes["Page"];
    assert_eq!(class.generic_params, vec![("T".to_owned(), "any".to_owned())]);

    let meta = &class.fields[1];
    assert_eq!(meta.source_type, "Wrapper<PageMeta>");
    assert_eq!(meta.generic_args, vec!["PageMeta"]);
  }

  #[test]
  fn enum_with_values_and_dropped_entry() {
    let (model, diagnostics) = build(r#"
      package model

      // @Enum
      // @Flags
      type Permission int32

      // @EnumValuesFor:Permission
      type PermissionValues struct {
        Read    bool `value:"1"`
        Write   bool `value:"2"`
        Execute bool `value:"7"`
        Broken  bool `value:"many"`
        Missing bool
      }
    "#);

    let info = &model.packages["model"].enums["Permission"];
    assert_eq!(info.underlying, "int32");
    assert!(info.is_flags);
    assert_eq!(
      info.values.iter().map(|v| (v.name.as_str(), v.value)).collect_vec(),
      vec![("Read", 1), ("Write", 2), ("Execute", 7)]
    );
    assert_eq!(diagnostics.len(), 2);
  }

  #[test]
  fn service_methods_require_http_tag() {
    let (model, _) = build(r#"
      package accounts

      // @Service:Accounts
      // @Path:/accounts
      // @RequestHeader:X-Token
      // @ResourceGroup:core
      type AccountService struct {
      }

      // Finds one account
      // @Http:GET /{id}
      // @PathParam:id|string|account id
      // @QueryParam:expand|[]string|relations to expand
      // @Return:Account
      func (s *AccountService) FindAccount(id string) (*Account, error) {
        return nil, nil
      }

      // @Context:user
      func (s *AccountService) currentUser() {}

      func (s *AccountService) helper() {}
    "#);

    let service = &model.packages["accounts"].services["AccountService"];
    assert_eq!(service.display_name, "Accounts");
    assert_eq!(service.base_path, "/accounts");
    assert_eq!(service.headers, vec!["X-Token"]);
    assert_eq!(service.methods.len(), 1);

    let method = &service.methods[0];
    assert_eq!(method.name, "findAccount");
    assert_eq!(method.verb, "GET");
    assert_eq!(method.path, "/{id}");
    assert_eq!(method.path_params[0].name, "id");
    assert_eq!(method.path_params[0].ts_type, "string");
    assert!(method.query_params[0].is_array);
    assert_eq!(method.query_params[0].docs, "relations to expand");
    assert_eq!(method.return_class, "Account");
    assert_eq!(method.return_type.as_ref().map(|n| n.render()).as_deref(), Some("Account"));
  }

  #[test]
  fn upload_and_stream_returns() {
    let (model, _) = build(r#"
      package files

      // @Service
      // @Path:/files
      type FileService struct {
      }

      // @Http:POST /
      // @Upload:uploadAvatar
      // @FileParam:avatar|bytes|the image
      func (s *FileService) Store() {}

      // @Http:GET /{id}/content
      // @PathParam:id|string
      // @Return:StreamContent
      func (s *FileService) Download() {}
    "#);

    let service = &model.packages["files"].services["FileService"];
    let upload = &service.methods[0];
    assert!(upload.is_upload);
    assert_eq!(upload.name, "uploadAvatar");
    assert_eq!(upload.file_params[0].ts_type, "File");

    let download = &service.methods[1];
    assert!(download.is_stream);
    assert_eq!(download.return_type.as_ref().map(|n| n.render()).as_deref(), Some("File"));
  }

  #[test]
  fn bracketed_return_types_normalize() {
    let (model, _) = build(r#"
      package model

      // @Service
      // @Path:/pages
      type PageService struct {
      }

      // @Http:GET /
      // @Return:Page[Item]
      func (s *PageService) List() {}
    "#);

    let method = &model.packages["model"].services["PageService"].methods[0];
    assert_eq!(method.return_class, "Page<Item>");
    assert_eq!(method.return_type.as_ref().map(|n| n.render()).as_deref(), Some("Page<Item>"));
  }

  #[test]
  fn alias_tag_registers_package_alias() {
    let (model, _) = build(r#"
      package model

      // @Data
      type Holder struct {
        // @Alias:AccountDto
        Account Account `json:"account"`
      }
    "#);

    assert_eq!(model.packages["model"].aliases["AccountDto"], "Account");
  }

  #[test]
  fn kind_precedence_prefers_service() {
    let (model, _) = build(r#"
      package model

      // @Data
      // @Service
      // @Path:/x
      type Thing struct {
      }
    "#);

    let package = &model.packages["model"];
    assert!(package.services.contains_key("Thing"));
    assert!(!package.classes.contains_key("Thing"));
  }

  #[test]
  fn unnamed_package_lands_in_model_bucket() {
    let (model, _) = build(r#"
      // @Data
      type Loose struct {
        Value string `json:"value"`
      }
    "#);

    assert!(model.packages["model"].classes.contains_key("Loose"));
  }
}
