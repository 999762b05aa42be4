use std::collections::HashMap;
use std::fmt;

/// Bidirectional symbol ↔ index map.
///
/// Indices are dense in `[0, len)` and stable for the lifetime of the table.
/// A grammar carries two of these: one for nonterminals (where index 0 is the
/// start symbol by convention) and one for the lexicon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
  symbols: Vec<String>,
  indices: HashMap<String, usize>,
}

impl SymbolTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the index of `symbol`, inserting it at the next free index if
  /// it hasn't been seen before.
  pub fn intern(&mut self, symbol: &str) -> usize {
    if let Some(&idx) = self.indices.get(symbol) {
      idx
    } else {
      let idx = self.symbols.len();
      self.symbols.push(symbol.to_string());
      self.indices.insert(symbol.to_string(), idx);
      idx
    }
  }

  pub fn index_of(&self, symbol: &str) -> Option<usize> {
    self.indices.get(symbol).copied()
  }

  pub fn symbol(&self, idx: usize) -> &str {
    &self.symbols[idx]
  }

  pub fn len(&self) -> usize {
    self.symbols.len()
  }

  pub fn is_empty(&self) -> bool {
    self.symbols.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.symbols.iter().map(String::as_str)
  }
}

impl fmt::Display for SymbolTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, sym) in self.symbols.iter().enumerate() {
      writeln!(f, "{} {}", idx, sym)?;
    }
    Ok(())
  }
}

#[test]
fn test_intern_is_dense_and_stable() {
  let mut t = SymbolTable::new();
  assert_eq!(t.intern("S"), 0);
  assert_eq!(t.intern("NP"), 1);
  assert_eq!(t.intern("VP"), 2);
  // re-interning returns the original index
  assert_eq!(t.intern("NP"), 1);
  assert_eq!(t.len(), 3);
}

#[test]
fn test_reverse_lookup() {
  let mut t = SymbolTable::new();
  t.intern("S");
  t.intern("@NP");
  assert_eq!(t.symbol(1), "@NP");
  assert_eq!(t.index_of("@NP"), Some(1));
  assert_eq!(t.index_of("missing"), None);
}
