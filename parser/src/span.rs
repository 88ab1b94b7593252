use std::fmt::Debug;

#[derive(Clone, Copy, PartialEq, Debug, Eq, Hash, Default)]
pub struct Span {
  pub start: usize,
  pub end: usize,
  pub line: usize,
  pub column: usize,
}

impl Span {
  pub fn identity() -> Self {
    Self {
      start: 0,
      end: 0,
      line: 0,
      column: 0
    }
  }

  pub fn wrap<T>(self, value: T) -> Positioned<T> {
    Positioned { value, span: self }
  }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Positioned<T> {
  pub value: T,
  pub span: Span,
}

impl<T: Debug> Debug for Positioned<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}", self.value)
  }
}
