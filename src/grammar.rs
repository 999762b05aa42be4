use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::matrix::{
  BinaryRuleLayout, CscBinaryMatrix, CsrBinaryMatrix, LexicalRules, RuleMatrix, UnaryRules,
};
use crate::pack::PackingFunction;
use crate::vocab::SymbolTable;
use crate::Err;

/// Binarization-artifact nonterminals carry this prefix in the grammar text
/// format (e.g. `@NP`); they are never legitimate standalone constituents.
pub const FACTORED_PREFIX: char = '@';

/// Direction the external binarizer factored >2-ary rules in. Determines the
/// single split point allowed in factored-only cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binarization {
  Left,
  Right,
}

/// Right-hand-side shape of a production. Unary and lexical productions use
/// distinguished sentinels rather than a missing right child.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RightChild {
  Nonterminal(usize),
  Unary,
  Lexical,
}

/// A grammar rule. For lexical productions `left_child` holds a lexicon
/// index rather than a nonterminal index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Production {
  pub parent: usize,
  pub left_child: usize,
  pub right_child: RightChild,
  pub log_prob: f32,
}

impl Production {
  pub fn binary(parent: usize, left: usize, right: usize, log_prob: f32) -> Self {
    Self {
      parent,
      left_child: left,
      right_child: RightChild::Nonterminal(right),
      log_prob,
    }
  }

  pub fn unary(parent: usize, child: usize, log_prob: f32) -> Self {
    Self {
      parent,
      left_child: child,
      right_child: RightChild::Unary,
      log_prob,
    }
  }

  pub fn lexical(parent: usize, lex: usize, log_prob: f32) -> Self {
    Self {
      parent,
      left_child: lex,
      right_child: RightChild::Lexical,
      log_prob,
    }
  }

  pub fn is_binary(&self) -> bool {
    matches!(self.right_child, RightChild::Nonterminal(_))
  }
}

/// An immutable PCFG with its binary rules stored as sparse matrices in two
/// physical layouts (row-major by parent and column-major by packed child
/// pair), plus a column-major subset holding only rules with factored
/// parents.
#[derive(Debug)]
pub struct Grammar {
  nonterminals: SymbolTable,
  lexicon: SymbolTable,
  start: usize,
  binarization: Binarization,
  pack: PackingFunction,
  csc: CscBinaryMatrix,
  csr: CsrBinaryMatrix,
  factored_csc: CscBinaryMatrix,
  unary: UnaryRules,
  lexical: LexicalRules,
  factored: Vec<bool>,
  valid_left: Vec<bool>,
  valid_right: Vec<bool>,
}

impl Grammar {
  /// Builds the sparse matrices from a production list. Fails on a
  /// probability above zero or an out-of-range symbol index.
  pub fn new(
    nonterminals: SymbolTable,
    lexicon: SymbolTable,
    start: usize,
    binarization: Binarization,
    productions: &[Production],
  ) -> Result<Self, Err> {
    let num_nts = nonterminals.len();
    let num_lex = lexicon.len();
    if start >= num_nts {
      return Err(format!("start symbol index {} out of range", start).into());
    }
    let pack = PackingFunction::new(num_nts, num_lex);

    let factored: Vec<bool> = (0..num_nts)
      .map(|nt| nonterminals.symbol(nt).starts_with(FACTORED_PREFIX))
      .collect();

    let mut binary = Vec::new();
    let mut factored_binary = Vec::new();
    let mut unary = Vec::new();
    let mut lexical = Vec::new();
    let mut valid_left = vec![false; num_nts];
    let mut valid_right = vec![false; num_nts];

    for p in productions {
      if p.log_prob > 0.0 {
        return Err(
          format!(
            "rule probability must be a log-probability <= 0, got {}",
            p.log_prob
          )
          .into(),
        );
      }
      if p.parent >= num_nts {
        return Err(format!("rule parent index {} out of range", p.parent).into());
      }
      match p.right_child {
        RightChild::Nonterminal(right) => {
          if p.left_child >= num_nts || right >= num_nts {
            return Err("binary rule child index out of range".into());
          }
          let entry = (p.parent, pack.pack(p.left_child, right), p.log_prob);
          binary.push(entry);
          if factored[p.parent] {
            factored_binary.push(entry);
          }
          valid_left[p.left_child] = true;
          valid_right[right] = true;
        }
        RightChild::Unary => {
          if p.left_child >= num_nts {
            return Err("unary rule child index out of range".into());
          }
          unary.push((p.parent, p.left_child, p.log_prob));
        }
        RightChild::Lexical => {
          if p.left_child >= num_lex {
            return Err("lexical rule lexeme index out of range".into());
          }
          lexical.push((p.parent, p.left_child, p.log_prob));
        }
      }
    }

    let grammar = Self {
      csc: CscBinaryMatrix::build(pack.packed_array_size(), &binary),
      csr: CsrBinaryMatrix::build(num_nts, &binary),
      factored_csc: CscBinaryMatrix::build(pack.packed_array_size(), &factored_binary),
      unary: UnaryRules::build(num_nts, &unary),
      lexical: LexicalRules::build(num_lex, &lexical),
      nonterminals,
      lexicon,
      start,
      binarization,
      pack,
      factored,
      valid_left,
      valid_right,
    };

    info!(
      nonterminals = grammar.num_nonterminals(),
      lexemes = grammar.num_lexemes(),
      binary = grammar.csc.num_rules(),
      unary = grammar.unary.num_rules(),
      lexical = grammar.lexical.num_rules(),
      "built grammar matrices"
    );

    Ok(grammar)
  }

  pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, Err> {
    let mut source = String::new();
    File::open(path)?.read_to_string(&mut source)?;
    source.parse()
  }

  pub fn nonterminals(&self) -> &SymbolTable {
    &self.nonterminals
  }

  pub fn lexicon(&self) -> &SymbolTable {
    &self.lexicon
  }

  pub fn start(&self) -> usize {
    self.start
  }

  pub fn binarization(&self) -> Binarization {
    self.binarization
  }

  pub fn num_nonterminals(&self) -> usize {
    self.nonterminals.len()
  }

  pub fn num_lexemes(&self) -> usize {
    self.lexicon.len()
  }

  pub fn packing(&self) -> &PackingFunction {
    &self.pack
  }

  /// Column-major binary matrix over the full rule set.
  pub fn csc(&self) -> &CscBinaryMatrix {
    &self.csc
  }

  /// Row-major binary matrix over the full rule set.
  pub fn csr(&self) -> &CsrBinaryMatrix {
    &self.csr
  }

  /// Column-major matrix restricted to rules with factored parents, queried
  /// when a cell is constrained to factored-only production.
  pub fn factored_csc(&self) -> &CscBinaryMatrix {
    &self.factored_csc
  }

  pub fn unary_rules(&self) -> &UnaryRules {
    &self.unary
  }

  pub fn lexical_rules(&self) -> &LexicalRules {
    &self.lexical
  }

  pub fn is_factored(&self, nt: usize) -> bool {
    self.factored[nt]
  }

  /// True if this nonterminal appears as the left child of any binary rule.
  pub fn is_valid_left_child(&self, nt: usize) -> bool {
    self.valid_left[nt]
  }

  /// True if this nonterminal appears as the right child of any binary rule.
  pub fn is_valid_right_child(&self, nt: usize) -> bool {
    self.valid_right[nt]
  }
}

impl RuleMatrix for Grammar {
  fn binary_log_prob(&self, parent: usize, key: usize) -> f32 {
    BinaryRuleLayout::binary_log_prob(&self.csc, parent, key)
  }

  fn unary_log_prob(&self, parent: usize, child: usize) -> f32 {
    self.unary.unary_log_prob(parent, child)
  }

  fn lexical_log_prob(&self, parent: usize, lex: usize) -> f32 {
    self.lexical.lexical_log_prob(parent, lex)
  }
}

impl fmt::Display for Grammar {
  /// Writes the grammar back out in the text format read by `FromStr`:
  /// header, binary and unary rules, lexicon delimiter, lexical rules.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "start={} binarization={} nBinary={} nUnary={} nLex={}",
      self.nonterminals.symbol(self.start),
      match self.binarization {
        Binarization::Left => "left",
        Binarization::Right => "right",
      },
      self.csc.num_rules(),
      self.unary.num_rules(),
      self.lexical.num_rules()
    )?;
    for (parent, key, prob) in self.csc.entries() {
      let (left, right) = self.pack.unpack(key);
      writeln!(
        f,
        "{} -> {} {} {:.6}",
        self.nonterminals.symbol(parent),
        self.nonterminals.symbol(left),
        self.nonterminals.symbol(right),
        prob
      )?;
    }
    for (parent, child, prob) in self.unary.entries() {
      writeln!(
        f,
        "{} -> {} {:.6}",
        self.nonterminals.symbol(parent),
        self.nonterminals.symbol(child),
        prob
      )?;
    }
    writeln!(f, "{}", crate::parse_grammar::LEXICON_DELIMITER)?;
    for (parent, lex, prob) in self.lexical.entries() {
      writeln!(
        f,
        "{} -> {} {:.6}",
        self.nonterminals.symbol(parent),
        self.lexicon.symbol(lex),
        prob
      )?;
    }
    Ok(())
  }
}
