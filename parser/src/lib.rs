pub mod span;

use std::iter;
use std::slice::Iter;

use itertools::{Itertools, MultiPeek, PeekingNext};
use crate::span::{Positioned, Span};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
#[error("{message} ({line}:{column})")]
pub struct SyntaxError {
  message: String,
  line: usize,
  column: usize,
}

impl SyntaxError {
  fn new(message: String, span: Span) -> Self {
    SyntaxError {
      message,
      line: span.line,
      column: span.column,
    }
  }

  fn eof(expected: &str) -> Self {
    SyntaxError {
      message: format!("unexpected end of input, expected {}", expected),
      line: 0,
      column: 0,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delimiter {
  BraceOpen,
  BraceClose,
  ParenOpen,
  ParenClose,
  BracketOpen,
  BracketClose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
  Package,
  Import,
  Type,
  Struct,
  Func,
  Map,
  Interface,

  Ident(String),
  String(String),
  RawString(String),
  Number(String),
  Delimiter(Delimiter),
  Star,
  Dot,
  Comma,
  Newline,

  Comment(String),

  // Anything the declaration grammar does not care about (operators inside
  // function bodies, const initializers and so on). Never an error.
  Other(char),
}

pub fn tokenizer(input: &str) -> Result<Vec<Positioned<Token>>, SyntaxError> {
  let mut tokens: Vec<Positioned<Token>> = Vec::new();
  let mut iter = itertools::multipeek(input.chars().enumerate());

  let mut line: usize = 0;
  let mut column: usize = 0;

  while let Some((pos, ch)) = iter.next() {
    let span = Span { start: pos, end: pos, line, column };

    if ch == '\n' {
      tokens.push(span.wrap(Token::Newline));
      line += 1;
      column = 0;
      continue;
    }

    match ch {
      ch if ch.is_whitespace() => {}
      '/' => {
        let next = iter.peek().map(|&(_, c)| c);
        iter.reset_peek();
        match next {
          Some('/') => {
            iter.next();

            let text = iter::from_fn(|| {
              iter.by_ref().peeking_next(|&(_, c)| c != '\n').map(|(_, c)| c)
            }).collect::<String>();

            let len = text.chars().count();
            tokens.push(Span { start: pos, end: pos + len + 2, line, column }.wrap(Token::Comment(text)));
            column += len + 2;
            continue;
          }
          Some('*') => {
            iter.next();

            let mut text = String::new();
            loop {
              match iter.next() {
                Some((_, '*')) if matches!(iter.peek(), Some((_, '/'))) => {
                  iter.reset_peek();
                  iter.next();
                  break;
                }
                Some((_, '\n')) => {
                  tokens.push(span.wrap(Token::Comment(text.clone())));
                  text.clear();
                  line += 1;
                  column = 0;
                }
                Some((_, c)) => {
                  iter.reset_peek();
                  text.push(c);
                }
                None => return Err(SyntaxError::eof("end of block comment")),
              }
            }
            tokens.push(span.wrap(Token::Comment(text)));
            continue;
          }
          _ => tokens.push(span.wrap(Token::Other('/'))),
        }
      }
      '"' | '\'' => {
        let quote = ch;
        let mut string = String::new();
        loop {
          match iter.next() {
            Some((_, '\\')) => {
              if let Some((_, escaped)) = iter.next() {
                string.push(escaped);
              }
            }
            Some((_, c)) if c == quote => break,
            Some((_, '\n')) => return Err(SyntaxError::new("unterminated string literal".to_owned(), span)),
            Some((_, c)) => string.push(c),
            None => return Err(SyntaxError::eof("closing quote")),
          }
        }
        let len = string.chars().count();
        tokens.push(Span { start: pos, end: pos + len + 1, line, column }.wrap(Token::String(string)));
      }
      '`' => {
        let mut string = String::new();
        loop {
          match iter.next() {
            Some((_, '`')) => break,
            Some((_, c)) => {
              if c == '\n' {
                line += 1;
                column = 0;
              }
              string.push(c);
            }
            None => return Err(SyntaxError::eof("closing backtick")),
          }
        }
        let len = string.chars().count();
        tokens.push(Span { start: pos, end: pos + len + 1, line, column }.wrap(Token::RawString(string)));
      }
      '{' => tokens.push(span.wrap(Token::Delimiter(Delimiter::BraceOpen))),
      '}' => tokens.push(span.wrap(Token::Delimiter(Delimiter::BraceClose))),
      '(' => tokens.push(span.wrap(Token::Delimiter(Delimiter::ParenOpen))),
      ')' => tokens.push(span.wrap(Token::Delimiter(Delimiter::ParenClose))),
      '[' => tokens.push(span.wrap(Token::Delimiter(Delimiter::BracketOpen))),
      ']' => tokens.push(span.wrap(Token::Delimiter(Delimiter::BracketClose))),
      '*' => tokens.push(span.wrap(Token::Star)),
      '.' => tokens.push(span.wrap(Token::Dot)),
      ',' => tokens.push(span.wrap(Token::Comma)),
      '0'..='9' => {
        let s = iter::once(ch)
          .chain(iter::from_fn(|| {
            iter.by_ref().peeking_next(|&(_, c)| c.is_ascii_alphanumeric() || c == '.' || c == '_').map(|(_, c)| c)
          }))
          .collect::<String>();

        let len = s.chars().count();
        tokens.push(Span { start: pos, end: pos + len - 1, line, column }.wrap(Token::Number(s)));
        column += len;
        continue;
      }
      ch if ch.is_alphabetic() || ch == '_' => {
        let s = iter::once(ch)
          .chain(iter::from_fn(|| {
            iter.by_ref().peeking_next(|&(_, c)| c.is_alphanumeric() || c == '_').map(|(_, c)| c)
          }))
          .collect::<String>();

        let len = s.chars().count();
        let token = match s.as_str() {
          "package" => Token::Package,
          "import" => Token::Import,
          "type" => Token::Type,
          "struct" => Token::Struct,
          "func" => Token::Func,
          "map" => Token::Map,
          "interface" => Token::Interface,
          _ => Token::Ident(s),
        };
        tokens.push(Span { start: pos, end: pos + len - 1, line, column }.wrap(token));
        column += len;
        continue;
      }
      other => tokens.push(span.wrap(Token::Other(other))),
    }

    if !ch.is_ascii_control() {
      column += 1;
    }
  }

  Ok(tokens)
}

#[derive(Debug)]
pub struct SourceFile {
  pub package: String,
  pub imports: Vec<String>,
  pub decls: Vec<Decl>,
}

#[derive(Debug)]
pub enum Decl {
  Type(TypeDecl),
  Func(FuncDecl),
}

#[derive(Debug)]
pub struct TypeDecl {
  pub name: String,
  pub type_params: Vec<TypeParam>,
  pub body: TypeBody,
  pub docs: Vec<String>,
}

#[derive(Debug)]
pub struct TypeParam {
  pub name: String,
  pub constraint: String,
}

#[derive(Debug)]
pub enum TypeBody {
  Struct(Vec<FieldDecl>),
  Alias(TypeExpr),
  Opaque,
}

#[derive(Debug)]
pub struct FieldDecl {
  /// None for an embedded field (inheritance in the source model).
  pub name: Option<String>,
  pub expr: TypeExpr,
  pub tag: Option<String>,
  pub docs: Vec<String>,
}

#[derive(Debug)]
pub struct FuncDecl {
  pub receiver: Option<String>,
  pub name: String,
  pub docs: Vec<String>,
}

/// Closed set of type-expression shapes the declaration grammar produces.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
  Named { qualifier: Option<String>, name: String },
  Array { elem: Box<TypeExpr> },
  Map { key: Box<TypeExpr>, value: Box<TypeExpr> },
  Generic { head: Box<TypeExpr>, args: Vec<TypeExpr> },
  Pointer { inner: Box<TypeExpr> },
}

impl TypeExpr {
  pub fn named(name: &str) -> TypeExpr {
    TypeExpr::Named { qualifier: None, name: name.to_owned() }
  }
}

pub type TokenStream<'a> = MultiPeek<Iter<'a, Positioned<Token>>>;

macro_rules! consume_token {
  ($input:expr, $pattern:pat, $expected:literal) => {{
    match $input.next() {
      Some(token) => match &token.value {
        $pattern => token,
        _ => return Err(SyntaxError::new(format!("unexpected token {:?}, expected {}", token.value, $expected), token.span)),
      },
      None => return Err(SyntaxError::eof($expected)),
    }
  }};
}

macro_rules! consume_ident {
  ($input:expr) => {{
    match $input.next() {
      Some(token) => match &token.value {
        Token::Ident(name) => name.to_owned(),
        _ => return Err(SyntaxError::new(format!("unexpected token {:?}, expected identifier", token.value), token.span)),
      },
      None => return Err(SyntaxError::eof("identifier")),
    }
  }};
}

fn peek_token(input: &mut TokenStream) -> Option<Token> {
  let token = input.peek().map(|it| it.value.clone());
  input.reset_peek();
  token
}

fn peek_token2(input: &mut TokenStream) -> (Option<Token>, Option<Token>) {
  let first = input.peek().map(|it| it.value.clone());
  let second = input.peek().map(|it| it.value.clone());
  input.reset_peek();
  (first, second)
}

/// Skips tokens until the already-open delimiter pair is balanced again.
fn skip_balanced(input: &mut TokenStream, open: Delimiter, close: Delimiter) -> Result<(), SyntaxError> {
  let mut depth = 1usize;
  while let Some(token) = input.next() {
    match &token.value {
      Token::Delimiter(delimiter) if *delimiter == open => depth += 1,
      Token::Delimiter(delimiter) if *delimiter == close => {
        depth -= 1;
        if depth == 0 {
          return Ok(());
        }
      }
      _ => {}
    }
  }
  Err(SyntaxError::eof("closing delimiter"))
}

pub fn parse_source(input: &mut TokenStream) -> Result<SourceFile, SyntaxError> {
  let mut package = String::new();
  let mut imports = Vec::new();
  let mut decls = Vec::new();

  let mut comments: Vec<String> = Vec::new();
  let mut newlines = 0usize;

  while let Some(token) = peek_token(input) {
    match token {
      Token::Comment(text) => {
        trace!("comment {:?}", text);
        input.next();
        comments.push(text);
        newlines = 0;
      }
      Token::Newline => {
        input.next();
        newlines += 1;
        // A blank line detaches preceding comments from the next declaration
        if newlines > 1 {
          comments.clear();
        }
      }
      Token::Package => {
        input.next();
        package = consume_ident!(input);
        comments.clear();
        newlines = 0;
      }
      Token::Import => {
        parse_imports(input, &mut imports)?;
        comments.clear();
        newlines = 0;
      }
      Token::Type => {
        decls.push(Decl::Type(parse_type_decl(input, &comments)?));
        comments.clear();
        newlines = 0;
      }
      Token::Func => {
        decls.push(Decl::Func(parse_func_decl(input, &comments)?));
        comments.clear();
        newlines = 0;
      }
      _ => {
        // const/var blocks, stray expressions: not part of the model
        input.next();
        comments.clear();
        newlines = 0;
      }
    }
  }

  Ok(SourceFile {
    package,
    imports,
    decls,
  })
}

fn parse_imports(input: &mut TokenStream, imports: &mut Vec<String>) -> Result<(), SyntaxError> {
  consume_token!(input, Token::Import, "import");

  loop {
    match peek_token(input) {
      Some(Token::String(path)) => {
        input.next();
        imports.push(path);
        return Ok(());
      }
      Some(Token::Ident(_)) | Some(Token::Other('_')) | Some(Token::Dot) => {
        // import alias before the path
        input.next();
      }
      Some(Token::Delimiter(Delimiter::ParenOpen)) => {
        input.next();
        loop {
          match peek_token(input) {
            Some(Token::Delimiter(Delimiter::ParenClose)) => {
              input.next();
              return Ok(());
            }
            Some(Token::String(path)) => {
              input.next();
              imports.push(path);
            }
            Some(_) => {
              input.next();
            }
            None => return Err(SyntaxError::eof("closing parenthesis of import block")),
          }
        }
      }
      Some(_) | None => return Ok(()),
    }
  }
}

fn parse_type_decl(input: &mut TokenStream, comments: &[String]) -> Result<TypeDecl, SyntaxError> {
  consume_token!(input, Token::Type, "type");
  let name = consume_ident!(input);

  let mut type_params = Vec::new();
  // a bracket directly after the name is a parameter list unless it is the
  // []T of a slice alias
  if let (Some(Token::Delimiter(Delimiter::BracketOpen)), second) = peek_token2(input) {
    if second != Some(Token::Delimiter(Delimiter::BracketClose)) {
      parse_type_params(input, &mut type_params)?;
    }
  }

  let body = match peek_token(input) {
    Some(Token::Struct) => {
      input.next();
      TypeBody::Struct(parse_struct_body(input)?)
    }
    Some(Token::Interface) => {
      input.next();
      consume_token!(input, Token::Delimiter(Delimiter::BraceOpen), "interface body");
      skip_balanced(input, Delimiter::BraceOpen, Delimiter::BraceClose)?;
      TypeBody::Opaque
    }
    Some(_) => TypeBody::Alias(parse_type_expr(input)?),
    None => return Err(SyntaxError::eof("type declaration body")),
  };

  Ok(TypeDecl {
    name,
    type_params,
    body,
    docs: comments.to_vec(),
  })
}

fn parse_type_params(input: &mut TokenStream, params: &mut Vec<TypeParam>) -> Result<(), SyntaxError> {
  consume_token!(input, Token::Delimiter(Delimiter::BracketOpen), "generic parameter list");

  loop {
    while let Some(Token::Newline) = peek_token(input) {
      input.next();
    }

    let name = consume_ident!(input);
    let constraint = match peek_token(input) {
      Some(Token::Ident(_)) => {
        let mut constraint = consume_ident!(input);
        if let Some(Token::Dot) = peek_token(input) {
          input.next();
          constraint = consume_ident!(input);
        }
        constraint
      }
      Some(Token::Interface) => {
        input.next();
        if let Some(Token::Delimiter(Delimiter::BraceOpen)) = peek_token(input) {
          input.next();
          skip_balanced(input, Delimiter::BraceOpen, Delimiter::BraceClose)?;
        }
        "any".to_owned()
      }
      _ => "any".to_owned(),
    };
    params.push(TypeParam { name, constraint });

    match peek_token(input) {
      Some(Token::Comma) => {
        input.next();
      }
      Some(Token::Delimiter(Delimiter::BracketClose)) => {
        input.next();
        return Ok(());
      }
      Some(other) => return Err(SyntaxError::new(format!("unexpected token {:?} in generic parameter list", other), Span::identity())),
      None => return Err(SyntaxError::eof("closing bracket of generic parameter list")),
    }
  }
}

fn parse_struct_body(input: &mut TokenStream) -> Result<Vec<FieldDecl>, SyntaxError> {
  consume_token!(input, Token::Delimiter(Delimiter::BraceOpen), "struct body");

  let mut fields = Vec::new();
  let mut docs: Vec<String> = Vec::new();
  let mut newlines = 0usize;

  loop {
    match peek_token(input) {
      Some(Token::Delimiter(Delimiter::BraceClose)) => {
        input.next();
        return Ok(fields);
      }
      Some(Token::Newline) => {
        input.next();
        newlines += 1;
        if newlines > 1 {
          docs.clear();
        }
      }
      Some(Token::Comment(text)) => {
        input.next();
        docs.push(text);
        newlines = 0;
      }
      Some(Token::Ident(_)) | Some(Token::Star) | Some(Token::Map) | Some(Token::Interface) => {
        let mut group = parse_field(input, &docs)?;

        // Inline comments on the field line belong to the field
        while let Some(Token::Comment(text)) = peek_token(input) {
          input.next();
          for field in &mut group {
            field.docs.push(text.clone());
          }
        }

        fields.extend(group);
        docs.clear();
        newlines = 0;
      }
      Some(_) => {
        input.next();
      }
      None => return Err(SyntaxError::eof("closing brace of struct body")),
    }
  }
}

// field := [ name {"," name} ] type-expr [ tag ]
// A field with no name is an embedded (inherited) type.
fn parse_field(input: &mut TokenStream, docs: &[String]) -> Result<Vec<FieldDecl>, SyntaxError> {
  let mut names: Vec<String> = Vec::new();
  let mut embedded: Option<TypeExpr> = None;

  match peek_token(input) {
    Some(Token::Ident(_)) => {
      let first = consume_ident!(input);
      match peek_token2(input) {
        (Some(Token::Dot), _) => {
          // embedded selector-qualified type: pkg.Base
          input.next();
          let name = consume_ident!(input);
          let head = TypeExpr::Named { qualifier: Some(first), name };
          embedded = Some(parse_generic_suffix(input, head)?);
        }
        (Some(Token::Delimiter(Delimiter::BracketOpen)), second) if second != Some(Token::Delimiter(Delimiter::BracketClose)) => {
          // embedded generic instantiation: Base[T]
          embedded = Some(parse_generic_suffix(input, TypeExpr::named(&first))?);
        }
        (Some(Token::Comma), _) => {
          names.push(first);
          while let Some(Token::Comma) = peek_token(input) {
            input.next();
            names.push(consume_ident!(input));
          }
        }
        (Some(Token::Ident(_)), _)
        | (Some(Token::Star), _)
        | (Some(Token::Map), _)
        | (Some(Token::Interface), _)
        | (Some(Token::Delimiter(Delimiter::BracketOpen)), _) => {
          names.push(first);
        }
        _ => {
          // nothing but the identifier on this line: embedded plain type
          embedded = Some(TypeExpr::named(&first));
        }
      }
    }
    Some(Token::Star) => {
      // embedded pointer type: *Base
      embedded = Some(parse_type_expr(input)?);
    }
    _ => {
      embedded = Some(parse_type_expr(input)?);
    }
  }

  let expr = match embedded {
    Some(expr) => expr,
    None => parse_type_expr(input)?,
  };

  let tag = match peek_token(input) {
    Some(Token::RawString(tag)) => {
      input.next();
      Some(tag)
    }
    _ => None,
  };

  if names.is_empty() {
    return Ok(vec![FieldDecl { name: None, expr, tag, docs: docs.to_vec() }]);
  }

  Ok(
    names
      .into_iter()
      .map(|name| FieldDecl {
        name: Some(name),
        expr: expr.clone(),
        tag: tag.clone(),
        docs: docs.to_vec(),
      })
      .collect_vec(),
  )
}

pub fn parse_type_expr(input: &mut TokenStream) -> Result<TypeExpr, SyntaxError> {
  match peek_token(input) {
    Some(Token::Star) => {
      input.next();
      Ok(TypeExpr::Pointer { inner: Box::new(parse_type_expr(input)?) })
    }
    Some(Token::Delimiter(Delimiter::BracketOpen)) => {
      input.next();
      consume_token!(input, Token::Delimiter(Delimiter::BracketClose), "closing bracket of slice type");
      Ok(TypeExpr::Array { elem: Box::new(parse_type_expr(input)?) })
    }
    Some(Token::Map) => {
      input.next();
      consume_token!(input, Token::Delimiter(Delimiter::BracketOpen), "map key");
      let key = parse_type_expr(input)?;
      consume_token!(input, Token::Delimiter(Delimiter::BracketClose), "closing bracket of map key");
      let value = parse_type_expr(input)?;
      Ok(TypeExpr::Map { key: Box::new(key), value: Box::new(value) })
    }
    Some(Token::Interface) => {
      // interface{} as a field type is the opaque "any"
      input.next();
      if let Some(Token::Delimiter(Delimiter::BraceOpen)) = peek_token(input) {
        input.next();
        skip_balanced(input, Delimiter::BraceOpen, Delimiter::BraceClose)?;
      }
      Ok(TypeExpr::named("any"))
    }
    Some(Token::Ident(_)) => {
      let name = consume_ident!(input);
      let head = match peek_token(input) {
        Some(Token::Dot) => {
          input.next();
          TypeExpr::Named { qualifier: Some(name), name: consume_ident!(input) }
        }
        _ => TypeExpr::named(&name),
      };
      parse_generic_suffix(input, head)
    }
    Some(other) => Err(SyntaxError::new(format!("unexpected token {:?} in type expression", other), Span::identity())),
    None => Err(SyntaxError::eof("type expression")),
  }
}

fn parse_generic_suffix(input: &mut TokenStream, head: TypeExpr) -> Result<TypeExpr, SyntaxError> {
  match peek_token2(input) {
    (Some(Token::Delimiter(Delimiter::BracketOpen)), second) if second != Some(Token::Delimiter(Delimiter::BracketClose)) => {
      input.next();
      let mut args = Vec::new();
      loop {
        args.push(parse_type_expr(input)?);
        match peek_token(input) {
          Some(Token::Comma) => {
            input.next();
          }
          Some(Token::Delimiter(Delimiter::BracketClose)) => {
            input.next();
            break;
          }
          Some(other) => return Err(SyntaxError::new(format!("unexpected token {:?} in generic argument list", other), Span::identity())),
          None => return Err(SyntaxError::eof("closing bracket of generic argument list")),
        }
      }
      Ok(TypeExpr::Generic { head: Box::new(head), args })
    }
    _ => Ok(head),
  }
}

fn parse_func_decl(input: &mut TokenStream, comments: &[String]) -> Result<FuncDecl, SyntaxError> {
  consume_token!(input, Token::Func, "func");

  // receiver: last identifier at bracket depth zero names the receiver type
  let mut receiver = None;
  if let Some(Token::Delimiter(Delimiter::ParenOpen)) = peek_token(input) {
    input.next();
    let mut depth = 0usize;
    loop {
      match input.next() {
        Some(token) => match &token.value {
          Token::Delimiter(Delimiter::ParenClose) => break,
          Token::Delimiter(Delimiter::BracketOpen) => depth += 1,
          Token::Delimiter(Delimiter::BracketClose) => depth = depth.saturating_sub(1),
          Token::Ident(name) if depth == 0 => receiver = Some(name.to_owned()),
          _ => {}
        },
        None => return Err(SyntaxError::eof("closing parenthesis of receiver")),
      }
    }
  }

  let name = consume_ident!(input);

  if let Some(Token::Delimiter(Delimiter::BracketOpen)) = peek_token(input) {
    input.next();
    skip_balanced(input, Delimiter::BracketOpen, Delimiter::BracketClose)?;
  }

  consume_token!(input, Token::Delimiter(Delimiter::ParenOpen), "parameter list");
  skip_balanced(input, Delimiter::ParenOpen, Delimiter::ParenClose)?;

  // results, then the body
  loop {
    match input.next() {
      Some(token) => match &token.value {
        Token::Delimiter(Delimiter::ParenOpen) => skip_balanced(input, Delimiter::ParenOpen, Delimiter::ParenClose)?,
        Token::Delimiter(Delimiter::BraceOpen) => {
          skip_balanced(input, Delimiter::BraceOpen, Delimiter::BraceClose)?;
          break;
        }
        Token::Newline => break,
        _ => {}
      },
      None => break,
    }
  }

  Ok(FuncDecl {
    receiver,
    name,
    docs: comments.to_vec(),
  })
}
