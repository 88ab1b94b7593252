use std::fs;
use std::io;
use std::path::Path;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::model::{ClassInfo, EnumInfo, MethodInfo, PackageInfo, ParamInfo, ServiceInfo};

static PATH_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap());

pub fn generate_class_code(class: &ClassInfo) -> String {
  let mut code = String::new();

  for (name, _) in class.dependencies.iter().sorted() {
    code += &format!("import {{ {} }} from \"./{}\";\n", name, name);
  }
  if !class.dependencies.is_empty() {
    code += "\n";
  }

  for doc in &class.docs {
    code += &format!("// {}\n", doc);
  }

  let generics = if class.generic_params.is_empty() {
    String::new()
  } else {
    format!("<{}>", class.generic_params.iter().map(|(name, _)| name.as_str()).join(", "))
  };
  let extends = if class.is_extend { format!(" extends {}", class.base_class) } else { String::new() };
  code += &format!("export class {}{}{} {{\n", class.name, generics, extends);

  for field in &class.fields {
    for doc in &field.docs {
      code += &format!("  // {}\n", doc);
    }
    if !field.format.is_empty() {
      code += &format!("  // format: {}\n", field.format);
    }
    let mut ts_type = field.ts_type.clone();
    if field.is_array {
      ts_type += "[]";
    }
    let optional = if field.required { "" } else { "?" };
    code += &format!("  {}{}: {};\n", field.json_name, optional, ts_type);
  }

  code += "\n";
  code += &format!("  constructor(init?: Partial<{}{}>) {{\n", class.name, generics);
  if class.is_extend {
    code += "    super(init);\n";
  }
  code += "    Object.assign(this, init);\n";
  code += "  }\n";
  code += "}\n";
  code
}

pub fn generate_enum_code(info: &EnumInfo) -> String {
  let mut code = String::new();
  for doc in &info.docs {
    code += &format!("// {}\n", doc);
  }
  if info.is_flags {
    code += "// bit flags, combine with |\n";
  }
  code += &format!("export enum {} {{\n", info.name);
  for value in &info.values {
    for doc in &value.docs {
      code += &format!("  // {}\n", doc);
    }
    code += &format!("  {} = {},\n", value.name, value.value);
  }
  code += "}\n";
  code
}

pub fn generate_service_code(service: &ServiceInfo) -> String {
  let mut code = String::new();

  for (name, _) in service.dependencies.iter().sorted() {
    code += &format!("import {{ {} }} from \"./{}\";\n", name, name);
  }
  if !service.dependencies.is_empty() {
    code += "\n";
  }

  code += "type HttpExecutor = (verb: string, path: string, query?: unknown, body?: unknown) => Promise<unknown>;\n\n";

  for doc in &service.docs {
    code += &format!("// {}\n", doc);
  }
  for header in &service.headers {
    code += &format!("// header: {}\n", header);
  }
  code += &format!("export class {} {{\n", service.display_name);
  code += "  constructor(private readonly execute: HttpExecutor) {}\n";

  for method in &service.methods {
    code += "\n";
    code += &generate_method_code(service, method);
  }

  code += "}\n";
  code
}

fn generate_method_code(service: &ServiceInfo, method: &MethodInfo) -> String {
  let mut code = String::new();
  for doc in &method.docs {
    code += &format!("  // {}\n", doc);
  }

  let args = method
    .path_params
    .iter()
    .chain(&method.query_params)
    .chain(&method.body_params)
    .chain(&method.file_params)
    .map(param_signature)
    .join(", ");

  let return_type = match &method.return_type {
    Some(node) => {
      let mut rendered = node.render();
      if method.return_is_array {
        rendered += "[]";
      }
      rendered
    }
    None => "void".to_owned(),
  };

  let path = format!("{}{}", service.base_path, method.path);
  // $$ keeps the literal dollar sign of the template placeholder
  let path = PATH_PARAM.replace_all(&path, "$${$1}");

  let query = if method.query_params.is_empty() {
    "undefined".to_owned()
  } else {
    format!("{{ {} }}", method.query_params.iter().map(|param| param.name.as_str()).join(", "))
  };

  let multipart = method.is_upload || !method.file_params.is_empty();
  let body = if multipart {
    "form".to_owned()
  } else if method.body_params.len() == 1 {
    method.body_params[0].name.clone()
  } else if method.body_params.is_empty() {
    "undefined".to_owned()
  } else {
    format!("{{ {} }}", method.body_params.iter().map(|param| param.name.as_str()).join(", "))
  };

  code += &format!("  {}({}): Promise<{}> {{\n", method.name, args, return_type);
  if multipart {
    code += "    const form = new FormData();\n";
    for param in &method.file_params {
      code += &format!("    form.append(\"{}\", {});\n", param.name, param.name);
    }
    for param in &method.body_params {
      code += &format!("    form.append(\"{}\", JSON.stringify({}));\n", param.name, param.name);
    }
  }
  code += &format!(
    "    return this.execute(\"{}\", `{}`, {}, {}) as Promise<{}>;\n",
    method.verb, path, query, body, return_type
  );
  code += "  }\n";
  code
}

fn param_signature(param: &ParamInfo) -> String {
  let marker = if param.is_array { "[]" } else { "" };
  format!("{}: {}{}", param.name, param.ts_type, marker)
}

pub fn generate_index_code(package: &PackageInfo) -> String {
  let mut names = Vec::new();
  names.extend(package.classes.values().filter(|class| !class.is_param).map(|class| class.name.clone()));
  names.extend(package.enums.keys().cloned());
  names.extend(package.services.values().map(|service| service.display_name.clone()));
  names.sort();
  names.iter().map(|name| format!("export * from \"./{}\";\n", name)).collect()
}

/// One .ts file per class/enum/service plus the index.ts barrel.
pub fn write_package(package: &PackageInfo, output: &Path) -> io::Result<()> {
  let dir = output.join(&package.name);
  fs::create_dir_all(&dir)?;

  for class in package.classes.values() {
    fs::write(dir.join(format!("{}.ts", class.name)), generate_class_code(class))?;
  }
  for info in package.enums.values() {
    fs::write(dir.join(format!("{}.ts", info.name)), generate_enum_code(info))?;
  }
  for service in package.services.values() {
    fs::write(dir.join(format!("{}.ts", service.display_name)), generate_service_code(service))?;
  }
  fs::write(dir.join("index.ts"), generate_index_code(package))?;

  trace!("wrote package {} to {:?}", package.name, dir);
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use test_log::test;

  use super::*;
  use crate::builder::SemanticModelBuilder;
  use crate::model::MetaModel;
  use crate::resolve::{AliasResolver, DependencyResolver};

  fn resolve(source: &str) -> MetaModel {
    let mut builder = SemanticModelBuilder::new(PathBuf::from("."));
    builder.process_source("test.go", source);
    let (mut model, _) = builder.finish();
    DependencyResolver::run(&mut model);
    AliasResolver::run(&mut model);
    model
  }

  #[test]
  fn class_code_has_imports_fields_and_constructor() {
    let model = resolve(r#"
      package model

      // @Data
      type Account struct {
        Base
        Name    string  `json:"name"`
        Parent  *Widget `json:"parent"`
      }
    "#);

    let code = generate_class_code(&model.packages["model"].classes["Account"]);
    assert!(code.contains("import { Base } from \"./Base\";"));
    assert!(code.contains("import { Widget } from \"./Widget\";"));
    assert!(code.contains("export class Account extends Base {"));
    assert!(code.contains("  name: string;"));
    assert!(code.contains("  parent?: Widget;"));
    assert!(code.contains("constructor(init?: Partial<Account>)"));
    assert!(code.contains("super(init);"));
  }

  #[test]
  fn enum_code_lists_explicit_values() {
    let model = resolve(r#"
      package model

      // @Enum
      type Color int

      // @EnumValuesFor:Color
      type ColorValues struct {
        Red  bool `value:"1"`
        Blue bool `value:"4"`
      }
    "#);

    let code = generate_enum_code(&model.packages["model"].enums["Color"]);
    assert!(code.contains("export enum Color {"));
    assert!(code.contains("  Red = 1,"));
    assert!(code.contains("  Blue = 4,"));
  }

  #[test]
  fn service_code_interpolates_path_params() {
    let model = resolve(r#"
      package model

      // @Service:Accounts
      // @Path:/accounts
      type AccountService struct {
      }

      // @Http:GET /{id}
      // @PathParam:id|string
      // @QueryParam:expand|[]string
      // @Return:Account
      func (s *AccountService) Find() {}
    "#);

    let code = generate_service_code(&model.packages["model"].services["AccountService"]);
    assert!(code.contains("export class Accounts {"));
    assert!(code.contains("find(id: string, expand: string[]): Promise<Account>"));
    assert!(code.contains("`/accounts/${id}`"));
    assert!(code.contains("{ expand }"));
  }

  #[test]
  fn path_templates_keep_every_parameter() {
    let model = resolve(r#"
      package model

      // @Service
      // @Path:/orgs
      type OrgService struct {
      }

      // @Http:GET /{org}/members/{id}
      // @PathParam:org|string
      // @PathParam:id|string
      func (s *OrgService) Member() {}
    "#);

    let code = generate_service_code(&model.packages["model"].services["OrgService"]);
    assert!(code.contains("`/orgs/${org}/members/${id}`"));
  }

  #[test]
  fn index_skips_parameter_only_classes() {
    let model = resolve(r#"
      package model

      // @Data
      type CreateRequest struct {
        Name string `json:"name"`
      }

      // @Service
      // @Path:/accounts
      type AccountService struct {
      }

      // @Http:POST /
      // @BodyParam:request|CreateRequest
      func (s *AccountService) Create() {}
    "#);

    let code = generate_index_code(&model.packages["model"]);
    assert!(code.contains("export * from \"./AccountService\";"));
    assert!(!code.contains("CreateRequest"));
  }
}
