use std::fmt;
use std::str::FromStr;

use crate::Err;

#[derive(Debug, PartialEq, Clone)]
pub struct Constituent {
  pub symbol: String,
  pub span: (usize, usize),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Word {
  pub word: String,
  pub span: (usize, usize),
}

/// A derivation tree over a binarized grammar: branches have one child
/// (unary or preterminal) or two (binary).
#[derive(Debug, PartialEq, Clone)]
pub enum SynTree {
  Branch(Constituent, Vec<SynTree>),
  Leaf(Word),
}

impl SynTree {
  pub fn branch(symbol: impl Into<String>, span: (usize, usize), children: Vec<SynTree>) -> Self {
    Self::Branch(
      Constituent {
        symbol: symbol.into(),
        span,
      },
      children,
    )
  }

  pub fn leaf(word: impl Into<String>, span: (usize, usize)) -> Self {
    Self::Leaf(Word {
      word: word.into(),
      span,
    })
  }

  pub fn is_leaf(&self) -> bool {
    matches!(self, Self::Leaf(_))
  }

  pub fn span(&self) -> (usize, usize) {
    match self {
      Self::Branch(c, _) => c.span,
      Self::Leaf(w) => w.span,
    }
  }

  pub fn get_branch(&self) -> Option<(&Constituent, &Vec<SynTree>)> {
    match self {
      Self::Branch(c, cs) => Some((c, cs)),
      _ => None,
    }
  }

  /// Collects the spans of every branch node, in pre-order.
  pub fn constituent_spans(&self) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    self.walk(&mut |node| {
      if let Self::Branch(c, _) = node {
        spans.push(c.span);
      }
    });
    spans
  }

  /// Collects the spans of branches whose single child is itself a branch,
  /// i.e. spans where the derivation used a unary rule.
  pub fn unary_spans(&self) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    self.walk(&mut |node| {
      if let Self::Branch(c, children) = node {
        if children.len() == 1 && !children[0].is_leaf() {
          spans.push(c.span);
        }
      }
    });
    spans
  }

  fn walk(&self, visit: &mut impl FnMut(&SynTree)) {
    visit(self);
    if let Self::Branch(_, children) = self {
      for child in children {
        child.walk(visit);
      }
    }
  }
}

impl fmt::Display for SynTree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Leaf(w) => write!(f, "{}", w.word),
      Self::Branch(c, children) => {
        write!(f, "({}", c.symbol)?;
        for child in children {
          write!(f, " {}", child)?;
        }
        write!(f, ")")
      }
    }
  }
}

fn skip_whitespace(s: &str) -> &str {
  s.trim_start()
}

fn take_token(s: &str) -> Result<(&str, &str), Err> {
  let end = s
    .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
    .unwrap_or(s.len());
  if end == 0 {
    Err(format!("expected a symbol or word at {:?}", s).into())
  } else {
    Ok(s.split_at(end))
  }
}

/// Parses one node starting at `s`; `next_leaf` is the index the next leaf
/// word will occupy, so spans can be reconstructed from the bracketing alone.
fn parse_node(s: &str, next_leaf: usize) -> Result<(SynTree, &str, usize), Err> {
  let s = skip_whitespace(s);
  if let Some(rest) = s.strip_prefix('(') {
    let (symbol, rest) = take_token(skip_whitespace(rest))?;
    let mut children: Vec<SynTree> = Vec::new();
    let mut rem = rest;
    let mut leaf = next_leaf;
    loop {
      rem = skip_whitespace(rem);
      if let Some(after) = rem.strip_prefix(')') {
        if children.is_empty() {
          return Err(format!("empty constituent {} in tree", symbol).into());
        }
        let span = (children[0].span().0, children[children.len() - 1].span().1);
        return Ok((SynTree::branch(symbol, span, children), after, leaf));
      }
      if rem.is_empty() {
        return Err(format!("unclosed constituent {} in tree", symbol).into());
      }
      let (child, rest, next) = parse_node(rem, leaf)?;
      children.push(child);
      rem = rest;
      leaf = next;
    }
  } else {
    let (word, rest) = take_token(s)?;
    Ok((SynTree::leaf(word, (next_leaf, next_leaf + 1)), rest, next_leaf + 1))
  }
}

impl FromStr for SynTree {
  type Err = Err;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (tree, rest, _) = parse_node(s, 0)?;
    if !skip_whitespace(rest).is_empty() {
      return Err(format!("trailing input after tree: {:?}", rest.trim()).into());
    }
    Ok(tree)
  }
}
