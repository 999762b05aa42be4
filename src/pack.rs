use std::fmt;

/// Bijective encoding of a binary rule's `(left, right)` child pair into a
/// single integer key, with two reserved key ranges for unary and lexical
/// back-pointers.
///
/// The key space is laid out as:
///
/// ```text
/// [0, n²)            binary pairs, key = left * n + right
/// [n², n² + n)       unary children (nonterminal index)
/// [n² + n, n² + n + lex)  lexical children (lexicon index)
/// ```
///
/// where `n` is the nonterminal count. The dense binary prefix is what sizes
/// the cross-product vector and the column-offset jump table of the CSC
/// grammar matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingFunction {
  num_nts: usize,
  num_lex: usize,
}

/// A classified, decoded packed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unpacked {
  Binary { left: usize, right: usize },
  Unary { child: usize },
  Lexical { lex: usize },
}

impl PackingFunction {
  pub fn new(num_nts: usize, num_lex: usize) -> Self {
    Self { num_nts, num_lex }
  }

  /// Size of the dense binary key space, `num_nts²`.
  pub fn packed_array_size(&self) -> usize {
    self.num_nts * self.num_nts
  }

  /// Size of the full key space including the unary and lexical ranges.
  pub fn key_space(&self) -> usize {
    self.packed_array_size() + self.num_nts + self.num_lex
  }

  pub fn pack(&self, left: usize, right: usize) -> usize {
    debug_assert!(left < self.num_nts && right < self.num_nts);
    left * self.num_nts + right
  }

  pub fn pack_unary(&self, child: usize) -> usize {
    debug_assert!(child < self.num_nts);
    self.packed_array_size() + child
  }

  pub fn pack_lexical(&self, lex: usize) -> usize {
    debug_assert!(lex < self.num_lex);
    self.packed_array_size() + self.num_nts + lex
  }

  pub fn is_binary(&self, key: usize) -> bool {
    key < self.packed_array_size()
  }

  pub fn is_unary(&self, key: usize) -> bool {
    key >= self.packed_array_size() && key < self.packed_array_size() + self.num_nts
  }

  pub fn is_lexical(&self, key: usize) -> bool {
    key >= self.packed_array_size() + self.num_nts && key < self.key_space()
  }

  /// Inverse of [`pack`](Self::pack). Only valid for binary keys.
  pub fn unpack(&self, key: usize) -> (usize, usize) {
    debug_assert!(self.is_binary(key));
    (key / self.num_nts, key % self.num_nts)
  }

  pub fn unpack_unary(&self, key: usize) -> usize {
    debug_assert!(self.is_unary(key));
    key - self.packed_array_size()
  }

  pub fn unpack_lexical(&self, key: usize) -> usize {
    debug_assert!(self.is_lexical(key));
    key - self.packed_array_size() - self.num_nts
  }

  pub fn unpacked(&self, key: usize) -> Unpacked {
    if self.is_binary(key) {
      let (left, right) = self.unpack(key);
      Unpacked::Binary { left, right }
    } else if self.is_unary(key) {
      Unpacked::Unary {
        child: self.unpack_unary(key),
      }
    } else {
      Unpacked::Lexical {
        lex: self.unpack_lexical(key),
      }
    }
  }
}

impl fmt::Display for PackingFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "PackingFunction[{} nts, {} lexemes, {} binary keys]",
      self.num_nts,
      self.num_lex,
      self.packed_array_size()
    )
  }
}
