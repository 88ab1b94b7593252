use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use itertools::Itertools;
use modelgen_generator::builder::{Diagnostic, SemanticModelBuilder};
use modelgen_generator::model::MetaModel;
use modelgen_generator::resolve::{AliasResolver, DependencyResolver};
use modelgen_generator::target::typescript;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "modelgen", about = "Generates TypeScript definitions from an annotated source model")]
struct Args {
  #[command(subcommand)]
  action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
  /// Parse an annotated source tree and emit TypeScript definitions
  Generate {
    /// Root of the annotated source tree
    input: PathBuf,
    /// Output directory for the generated definitions
    output: PathBuf,
    /// Only parse files whose path contains this fragment; import paths
    /// containing it are followed into the source tree
    #[arg(short, long)]
    filter: Option<String>,
  },
  /// Parse an annotated source tree and print the resolved model
  Dump {
    /// Root of the annotated source tree
    input: PathBuf,
    #[arg(short, long)]
    filter: Option<String>,
  },
}

fn main() -> Result<(), Box<dyn Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .init();

  let args = Args::parse();
  match args.action {
    Action::Generate { input, output, filter } => {
      let (model, diagnostics) = build(&input, filter)?;
      for package in model.packages.values() {
        typescript::write_package(package, &output)?;
      }
      info!("generated {} package(s) into {:?}", model.packages.len(), output);
      report(&diagnostics);
    }
    Action::Dump { input, filter } => {
      let (model, diagnostics) = build(&input, filter)?;
      dump(&model);
      report(&diagnostics);
    }
  }
  Ok(())
}

fn build(input: &Path, filter: Option<String>) -> Result<(MetaModel, Vec<Diagnostic>), Box<dyn Error>> {
  let mut builder = SemanticModelBuilder::new(input.to_path_buf());
  if let Some(filter) = &filter {
    builder = builder.with_filter(filter.clone());
  }

  for entry in WalkDir::new(input) {
    let entry = entry?;
    if !entry.file_type().is_file() || !entry.path().extension().is_some_and(|ext| ext == "go") {
      continue;
    }
    if let Some(filter) = &filter {
      if !entry.path().to_string_lossy().contains(filter.as_str()) {
        continue;
      }
    }
    builder.parse_file(entry.path())?;
  }

  let (mut model, diagnostics) = builder.finish();
  DependencyResolver::run(&mut model);
  AliasResolver::run(&mut model);
  Ok((model, diagnostics))
}

fn report(diagnostics: &[Diagnostic]) {
  for diagnostic in diagnostics {
    warn!("{}", diagnostic);
  }
  if !diagnostics.is_empty() {
    warn!("{} declaration(s) degraded, see above", diagnostics.len());
  }
}

fn dump(model: &MetaModel) {
  for name in model.packages.keys().sorted() {
    let package = &model.packages[name];
    println!("package {}", package.name);

    for class_name in package.classes.keys().sorted() {
      let class = &package.classes[class_name];
      let base = if class.is_extend { format!(" extends {}", class.base_class) } else { String::new() };
      println!("  class {}{}", class.name, base);
      for field in &class.fields {
        let marker = if field.is_array { "[]" } else { "" };
        println!("    {}: {}{}", field.json_name, field.ts_type, marker);
      }
      if !class.dependencies.is_empty() {
        println!("    -> depends on {}", class.dependencies.keys().sorted().join(", "));
      }
    }

    for enum_name in package.enums.keys().sorted() {
      let info = &package.enums[enum_name];
      println!("  enum {} ({})", info.name, info.underlying);
      for value in &info.values {
        println!("    {} = {}", value.name, value.value);
      }
    }

    for service_name in package.services.keys().sorted() {
      let service = &package.services[service_name];
      println!("  service {} ({})", service.display_name, service.base_path);
      for method in &service.methods {
        let return_type = method.return_type.as_ref().map(|node| node.render()).unwrap_or_else(|| "void".to_owned());
        println!("    {} {} {} -> {}", method.verb, method.path, method.name, return_type);
      }
    }
  }
}
