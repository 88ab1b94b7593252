use itertools::Itertools;
use thiserror::Error;

/// Parsed `Name<Arg, ...>` type signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeNode {
  pub name: String,
  pub args: Vec<TypeNode>,
}

impl TypeNode {
  pub fn leaf(name: &str) -> TypeNode {
    TypeNode { name: name.to_owned(), args: Vec::new() }
  }

  /// Normalized angle-bracket spelling of the node.
  pub fn render(&self) -> String {
    if self.args.is_empty() {
      self.name.clone()
    } else {
      format!("{}<{}>", self.name, self.args.iter().map(TypeNode::render).join(", "))
    }
  }

  pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a TypeNode)) {
    f(self);
    for arg in &self.args {
      arg.visit(f);
    }
  }

  /// Preorder list of all nodes, the node itself first.
  pub fn flatten(&self) -> Vec<&TypeNode> {
    let mut nodes = Vec::new();
    self.visit(&mut |node| nodes.push(node));
    nodes
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
  #[error("expected identifier at position {pos}")]
  ExpectedIdentifier { pos: usize },
  #[error("unexpected end of input")]
  UnexpectedEndOfInput,
  #[error("unexpected character '{ch}' at position {pos}")]
  UnexpectedCharacter { ch: char, pos: usize },
}

// Type := Identifier ['<' Type {',' Type} '>']
pub fn parse(input: &str) -> Result<TypeNode, TypeParseError> {
  let mut scanner = Scanner { input, pos: 0 };
  let node = scanner.parse_type()?;
  scanner.skip_whitespace();
  match scanner.peek() {
    Some(ch) => Err(TypeParseError::UnexpectedCharacter { ch, pos: scanner.pos }),
    None => Ok(node),
  }
}

struct Scanner<'a> {
  input: &'a str,
  pos: usize,
}

impl Scanner<'_> {
  fn peek(&self) -> Option<char> {
    self.input[self.pos..].chars().next()
  }

  // Advances by the encoded width of the current code point.
  fn advance(&mut self) {
    if let Some(ch) = self.peek() {
      self.pos += ch.len_utf8();
    }
  }

  fn skip_whitespace(&mut self) {
    while matches!(self.peek(), Some(ch) if ch.is_whitespace()) {
      self.advance();
    }
  }

  fn parse_type(&mut self) -> Result<TypeNode, TypeParseError> {
    self.skip_whitespace();
    let name = self.parse_identifier()?;
    let mut node = TypeNode { name, args: Vec::new() };

    self.skip_whitespace();
    if self.peek() == Some('<') {
      self.advance();
      loop {
        node.args.push(self.parse_type()?);
        self.skip_whitespace();
        match self.peek() {
          Some(',') => self.advance(),
          Some('>') => {
            self.advance();
            break;
          }
          Some(ch) => return Err(TypeParseError::UnexpectedCharacter { ch, pos: self.pos }),
          None => return Err(TypeParseError::UnexpectedEndOfInput),
        }
      }
    }

    Ok(node)
  }

  fn parse_identifier(&mut self) -> Result<String, TypeParseError> {
    let start = self.pos;
    while let Some(ch) = self.peek() {
      if ch.is_whitespace() || matches!(ch, '<' | '>' | ',') {
        break;
      }
      self.advance();
    }
    if self.pos == start {
      // An exhausted input is a truncation, not a misplaced delimiter
      return match self.peek() {
        Some(_) => Err(TypeParseError::ExpectedIdentifier { pos: start }),
        None => Err(TypeParseError::UnexpectedEndOfInput),
      };
    }
    Ok(self.input[start..self.pos].to_owned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_identifier() {
    assert_eq!(parse("Account").unwrap(), TypeNode::leaf("Account"));
  }

  #[test]
  fn two_arguments_in_order() {
    let node = parse("Page<Item,Meta>").unwrap();
    assert_eq!(node.name, "Page");
    assert_eq!(node.args, vec![TypeNode::leaf("Item"), TypeNode::leaf("Meta")]);
  }

  #[test]
  fn nested_arguments() {
    let node = parse("Map<string, List<Account>>").unwrap();
    assert_eq!(node.args[1].name, "List");
    assert_eq!(node.args[1].args, vec![TypeNode::leaf("Account")]);
  }

  #[test]
  fn round_trips_its_own_rendering() {
    for input in ["Account", "Page< Item , Meta >", "Map<string,List<Account>>"] {
      let first = parse(input).unwrap();
      let second = parse(&first.render()).unwrap();
      assert_eq!(first, second);
    }
  }

  #[test]
  fn multibyte_identifiers() {
    let node = parse("Сторінка<Елемент>").unwrap();
    assert_eq!(node.name, "Сторінка");
    assert_eq!(node.args, vec![TypeNode::leaf("Елемент")]);
  }

  #[test]
  fn error_positions_are_byte_offsets() {
    let input = "Ціна<Грн Коп>";
    let err = parse(input).unwrap_err();
    assert_eq!(err, TypeParseError::UnexpectedCharacter { ch: 'К', pos: input.find('К').unwrap() });
  }

  #[test]
  fn premature_end_of_input() {
    assert_eq!(parse("Page<Item").unwrap_err(), TypeParseError::UnexpectedEndOfInput);
    assert_eq!(parse("Page<Item,").unwrap_err(), TypeParseError::UnexpectedEndOfInput);
    assert_eq!(parse("").unwrap_err(), TypeParseError::UnexpectedEndOfInput);
  }

  #[test]
  fn empty_identifier() {
    assert_eq!(parse("<Item>").unwrap_err(), TypeParseError::ExpectedIdentifier { pos: 0 });
    assert_eq!(parse("Page<Item,>").unwrap_err(), TypeParseError::ExpectedIdentifier { pos: 10 });
  }
}
