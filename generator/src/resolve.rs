use std::collections::HashSet;

use tracing::{trace, warn};

use crate::model::{generics, native, ClassInfo, MetaModel, PackageInfo, ServiceInfo};

/// Second pass: computes the per-class/per-service import closure. Runs
/// after the builder so that every declaration is present.
pub struct DependencyResolver;

impl DependencyResolver {
  pub fn run(model: &mut MetaModel) {
    for package in model.packages.values_mut() {
      for class in package.classes.values_mut() {
        Self::fill_class(class);
      }
      for service in package.services.values_mut() {
        Self::fill_service(service);
      }
      Self::mark_param_classes(package);
    }
  }

  fn fill_class(class: &mut ClassInfo) {
    let ClassInfo { name, generic_params, base_class, fields, dependencies, .. } = class;
    let own_params: HashSet<&str> = generic_params.iter().map(|(param, _)| param.as_str()).collect();

    for field in fields.iter() {
      let node = match generics::parse(&field.ts_type) {
        Ok(node) => node,
        Err(err) => {
          warn!("field {}.{} type {:?} does not parse: {}", name, field.name, field.ts_type, err);
          continue;
        }
      };
      for (idx, node) in node.flatten().into_iter().enumerate() {
        if native::is_native_type(&node.name) || node.name == *name || own_params.contains(node.name.as_str()) {
          continue;
        }
        let marker = if idx == 0 && field.is_array { "[]" } else { "" };
        dependencies.insert(node.name.clone(), marker.to_owned());
      }
    }

    // the base class is unconditionally a dependency
    if !base_class.is_empty() {
      if let Ok(node) = generics::parse(base_class) {
        if node.name != *name {
          dependencies.insert(node.name.clone(), String::new());
        }
        for arg in node.flatten().into_iter().skip(1) {
          if !native::is_native_type(&arg.name) && arg.name != *name && !own_params.contains(arg.name.as_str()) {
            dependencies.insert(arg.name.clone(), String::new());
          }
        }
      }
    }

    trace!("class {} depends on {:?}", name, dependencies.keys());
  }

  fn fill_service(service: &mut ServiceInfo) {
    let ServiceInfo { name, methods, dependencies, .. } = service;

    for method in methods.iter() {
      let params = method
        .path_params
        .iter()
        .chain(&method.query_params)
        .chain(&method.body_params)
        .chain(&method.file_params);
      for param in params {
        let node = match generics::parse(&param.ts_type) {
          Ok(node) => node,
          Err(err) => {
            warn!("parameter {} of {}.{} does not parse: {}", param.name, name, method.name, err);
            continue;
          }
        };
        for (idx, node) in node.flatten().into_iter().enumerate() {
          if native::is_native_type(&node.name) || node.name == *name {
            continue;
          }
          let marker = if idx == 0 && param.is_array { "[]" } else { "" };
          dependencies.insert(node.name.clone(), marker.to_owned());
        }
      }

      if let Some(return_type) = &method.return_type {
        for (idx, node) in return_type.flatten().into_iter().enumerate() {
          if native::is_native_type(&node.name) || node.name == *name {
            continue;
          }
          let marker = if idx == 0 && method.return_is_array { "[]" } else { "" };
          dependencies.insert(node.name.clone(), marker.to_owned());
        }
      }
    }

    trace!("service {} depends on {:?}", name, dependencies.keys());
  }

  /// A class referenced only as a body/file parameter is parameter-only;
  /// the barrel file hides it.
  fn mark_param_classes(package: &mut PackageInfo) {
    let mut param_types: HashSet<String> = HashSet::new();
    for service in package.services.values() {
      for method in &service.methods {
        for param in method.body_params.iter().chain(&method.file_params) {
          let head = param.ts_type.split('<').next().unwrap_or_default();
          if !native::is_native_type(head) {
            param_types.insert(head.to_owned());
          }
        }
      }
    }
    if param_types.is_empty() {
      return;
    }

    let mut referenced: HashSet<String> = HashSet::new();
    for class in package.classes.values() {
      referenced.extend(class.dependencies.keys().cloned());
      if !class.base_class.is_empty() {
        if let Ok(node) = generics::parse(&class.base_class) {
          referenced.insert(node.name);
        }
      }
    }
    for service in package.services.values() {
      for method in &service.methods {
        if let Some(return_type) = &method.return_type {
          for node in return_type.flatten() {
            referenced.insert(node.name.clone());
          }
        }
      }
    }

    for class in package.classes.values_mut() {
      if param_types.contains(&class.name) && !referenced.contains(&class.name) {
        trace!("{} is parameter-only", class.name);
        class.is_param = true;
      }
    }
  }
}

/// Third pass: rewrites aliased method return types to their canonical
/// names. Touches return types only; field types keep their spelling.
pub struct AliasResolver;

impl AliasResolver {
  pub fn run(model: &mut MetaModel) {
    for package in model.packages.values_mut() {
      let PackageInfo { aliases, services, .. } = package;
      if aliases.is_empty() {
        continue;
      }

      for service in services.values_mut() {
        for method in &mut service.methods {
          let Some(target) = aliases.get(&method.return_class) else { continue };
          trace!("return type {} of {}.{} resolves to {}", method.return_class, service.name, method.name, target);
          method.return_class = target.clone();
          method.return_type = generics::parse(&native::get_destination_type(target)).ok();
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use test_log::test;

  use super::*;
  use crate::builder::SemanticModelBuilder;

  fn resolve(source: &str) -> MetaModel {
    let mut builder = SemanticModelBuilder::new(PathBuf::from("."));
    builder.process_source("test.go", source);
    let (mut model, _) = builder.finish();
    DependencyResolver::run(&mut model);
    AliasResolver::run(&mut model);
    model
  }

  #[test]
  fn base_class_is_a_dependency_but_native_fields_are_not() {
    let model = resolve(r#"
      package model

      // @Data
      type B struct {
        X string `json:"x"`
      }

      // @Data
      type A struct {
        B
        Count int64 `json:"count"`
      }
    "#);

    let a = &model.packages["model"].classes["A"];
    assert!(a.dependencies.contains_key("B"));
    assert!(!a.dependencies.contains_key("string"));
    assert!(!a.dependencies.contains_key("number"));
  }

  #[test]
  fn map_value_type_is_a_dependency_but_the_key_is_not() {
    let model = resolve(r#"
      package model

      // @Data
      type Board struct {
        Widgets map[string]Widget `json:"widgets"`
      }
    "#);

    let board = &model.packages["model"].classes["Board"];
    assert_eq!(board.fields[0].ts_type, "Map<string, Widget>");
    assert!(board.dependencies.contains_key("Widget"));
    assert!(!board.dependencies.contains_key("string"));
    assert!(!board.dependencies.contains_key("Map"));
  }

  #[test]
  fn no_self_edges_and_no_generic_param_edges() {
    let model = resolve(r#"
      package model

      // @Data
      type Node[T any] struct {
        Children []Node    `json:"children"`
        Value    T         `json:"value"`
        Peer     Wrapper[T] `json:"peer"`
      }
    "#);

    let node = &model.packages["model"].classes["Node"];
    assert!(!node.dependencies.contains_key("Node"));
    assert!(!node.dependencies.contains_key("T"));
    assert!(node.dependencies.contains_key("Wrapper"));
  }

  #[test]
  fn array_fields_carry_their_marker() {
    let model = resolve(r#"
      package model

      // @Data
      type Shelf struct {
        Books []Book `json:"books"`
      }
    "#);

    let shelf = &model.packages["model"].classes["Shelf"];
    assert_eq!(shelf.dependencies["Book"], "[]");
  }

  #[test]
  fn service_dependencies_cover_params_and_returns_at_depth() {
    let model = resolve(r#"
      package model

      // @Service
      // @Path:/reports
      type ReportService struct {
      }

      // @Http:POST /
      // @BodyParam:request|ReportRequest|what to build
      // @Return:Page[Report]
      func (s *ReportService) Build() {}
    "#);

    let service = &model.packages["model"].services["ReportService"];
    assert!(service.dependencies.contains_key("ReportRequest"));
    assert!(service.dependencies.contains_key("Page"));
    assert!(service.dependencies.contains_key("Report"));
    assert!(!service.dependencies.contains_key("ReportService"));
  }

  #[test]
  fn body_only_classes_become_parameter_only() {
    let model = resolve(r#"
      package model

      // @Data
      type CreateRequest struct {
        Name string `json:"name"`
      }

      // @Data
      type Account struct {
        Name string `json:"name"`
      }

      // @Service
      // @Path:/accounts
      type AccountService struct {
      }

      // @Http:POST /
      // @BodyParam:request|CreateRequest
      // @Return:Account
      func (s *AccountService) Create() {}
    "#);

    let package = &model.packages["model"];
    assert!(package.classes["CreateRequest"].is_param);
    assert!(!package.classes["Account"].is_param);
  }

  #[test]
  fn aliased_return_types_are_rewritten() {
    let model = resolve(r#"
      package model

      // @Data
      type Holder struct {
        // @Alias:AccountDto
        Account Account `json:"account"`
      }

      // @Service
      // @Path:/accounts
      type AccountService struct {
      }

      // @Http:GET /{id}
      // @PathParam:id|string
      // @Return:AccountDto
      func (s *AccountService) Find() {}
    "#);

    let method = &model.packages["model"].services["AccountService"].methods[0];
    assert_eq!(method.return_class, "Account");
    assert_eq!(method.return_type.as_ref().map(|n| n.render()).as_deref(), Some("Account"));
  }
}
