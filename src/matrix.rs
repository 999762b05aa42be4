/// Log-probability of an absent rule. Chart cells and cross-product vectors
/// use the same convention: absent means `-inf`, never a missing entry.
pub const LOG_ZERO: f32 = f32::NEG_INFINITY;

/// Point-lookup contract shared by every physical grammar layout.
///
/// All three lookups return [`LOG_ZERO`] for rules the grammar doesn't
/// contain.
pub trait RuleMatrix {
  fn binary_log_prob(&self, parent: usize, key: usize) -> f32;
  fn unary_log_prob(&self, parent: usize, child: usize) -> f32;
  fn lexical_log_prob(&self, parent: usize, lex: usize) -> f32;
}

/// The binary-rule part of [`RuleMatrix`], implemented by both physical
/// layouts so they can be checked against each other.
pub trait BinaryRuleLayout {
  fn binary_log_prob(&self, parent: usize, key: usize) -> f32;
  fn num_rules(&self) -> usize;
}

/// Sorts rule triples by `(major, minor)` and drops duplicates, keeping the
/// higher-probability rule for a duplicated pair.
fn sort_and_dedup(mut entries: Vec<(usize, usize, f32)>) -> Vec<(usize, usize, f32)> {
  entries.sort_by(|a, b| {
    a.0
      .cmp(&b.0)
      .then(a.1.cmp(&b.1))
      .then(b.2.total_cmp(&a.2))
  });
  entries.dedup_by(|next, prev| next.0 == prev.0 && next.1 == prev.1);
  entries
}

/// Turns `(major, minor, prob)` triples, sorted by major index, into a dense
/// offset jump table plus parallel minor-index/probability arrays.
fn group_by_major(
  num_major: usize,
  entries: &[(usize, usize, f32)],
) -> (Vec<u32>, Vec<u32>, Vec<f32>) {
  let mut offsets = vec![0u32; num_major + 1];
  for &(major, _, _) in entries {
    offsets[major + 1] += 1;
  }
  for i in 0..num_major {
    offsets[i + 1] += offsets[i];
  }
  let minors = entries.iter().map(|&(_, minor, _)| minor as u32).collect();
  let probs = entries.iter().map(|&(_, _, p)| p).collect();
  (offsets, minors, probs)
}

/// Binary rules in compressed-sparse-column layout: columns are packed child
/// keys, rows are parents. The column-offset array is dense over the whole
/// packed key space, so a lookup is one offset jump plus a short scan over
/// the (sorted) parents populating that column.
#[derive(Debug, Clone, PartialEq)]
pub struct CscBinaryMatrix {
  column_offsets: Vec<u32>,
  row_indices: Vec<u32>,
  probabilities: Vec<f32>,
  populated_columns: Vec<u32>,
}

impl CscBinaryMatrix {
  /// `rules` are `(parent, packed_key, log_prob)` triples; `num_columns` is
  /// the packed binary key space size.
  pub fn build(num_columns: usize, rules: &[(usize, usize, f32)]) -> Self {
    let entries = sort_and_dedup(
      rules
        .iter()
        .map(|&(parent, key, p)| (key, parent, p))
        .collect(),
    );
    let (column_offsets, row_indices, probabilities) = group_by_major(num_columns, &entries);
    let mut populated_columns: Vec<u32> = entries.iter().map(|&(key, _, _)| key as u32).collect();
    populated_columns.dedup();
    Self {
      column_offsets,
      row_indices,
      probabilities,
      populated_columns,
    }
  }

  fn column_range(&self, key: usize) -> std::ops::Range<usize> {
    self.column_offsets[key] as usize..self.column_offsets[key + 1] as usize
  }

  /// All `(parent, log_prob)` rules with this packed child key, ascending by
  /// parent.
  pub fn column(&self, key: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
    let range = self.column_range(key);
    self.row_indices[range.clone()]
      .iter()
      .zip(&self.probabilities[range])
      .map(|(&parent, &p)| (parent as usize, p))
  }

  /// Packed keys with at least one rule, ascending. This is the iteration
  /// order of the binary SpMV step.
  pub fn populated_columns(&self) -> &[u32] {
    &self.populated_columns
  }

  /// All `(parent, key, log_prob)` entries, grouped by column.
  pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
    self
      .populated_columns
      .iter()
      .flat_map(|&key| self.column(key as usize).map(move |(parent, p)| (parent, key as usize, p)))
  }
}

impl BinaryRuleLayout for CscBinaryMatrix {
  fn binary_log_prob(&self, parent: usize, key: usize) -> f32 {
    if key + 1 >= self.column_offsets.len() {
      return LOG_ZERO;
    }
    for i in self.column_range(key) {
      let row = self.row_indices[i] as usize;
      if row == parent {
        return self.probabilities[i];
      }
      if row > parent {
        break;
      }
    }
    LOG_ZERO
  }

  fn num_rules(&self) -> usize {
    self.probabilities.len()
  }
}

/// Binary rules in compressed-sparse-row layout: rows are parents, columns
/// are packed child keys sorted within each row, looked up by binary search.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrBinaryMatrix {
  row_offsets: Vec<u32>,
  column_indices: Vec<u32>,
  probabilities: Vec<f32>,
}

impl CsrBinaryMatrix {
  /// `rules` are `(parent, packed_key, log_prob)` triples; `num_rows` is the
  /// nonterminal count.
  pub fn build(num_rows: usize, rules: &[(usize, usize, f32)]) -> Self {
    let entries = sort_and_dedup(rules.to_vec());
    let (row_offsets, column_indices, probabilities) = group_by_major(num_rows, &entries);
    Self {
      row_offsets,
      column_indices,
      probabilities,
    }
  }

  fn row_range(&self, parent: usize) -> std::ops::Range<usize> {
    self.row_offsets[parent] as usize..self.row_offsets[parent + 1] as usize
  }

  /// All `(packed_key, log_prob)` rules with this parent, ascending by key.
  pub fn row(&self, parent: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
    let range = self.row_range(parent);
    self.column_indices[range.clone()]
      .iter()
      .zip(&self.probabilities[range])
      .map(|(&key, &p)| (key as usize, p))
  }

  pub fn num_rows(&self) -> usize {
    self.row_offsets.len() - 1
  }
}

impl BinaryRuleLayout for CsrBinaryMatrix {
  fn binary_log_prob(&self, parent: usize, key: usize) -> f32 {
    if parent + 1 >= self.row_offsets.len() {
      return LOG_ZERO;
    }
    let range = self.row_range(parent);
    let row = &self.column_indices[range.clone()];
    let i = row.partition_point(|&k| (k as usize) < key);
    if i < row.len() && row[i] as usize == key {
      self.probabilities[range.start + i]
    } else {
      LOG_ZERO
    }
  }

  fn num_rules(&self) -> usize {
    self.probabilities.len()
  }
}

/// Rules grouped by a child-side index (unary child or lexeme), with sorted
/// parents within each group. Shared layout for unary and lexical tables.
#[derive(Debug, Clone, PartialEq)]
struct ChildMajorTable {
  offsets: Vec<u32>,
  parents: Vec<u32>,
  probabilities: Vec<f32>,
}

impl ChildMajorTable {
  fn build(num_children: usize, rules: &[(usize, usize, f32)]) -> Self {
    let entries = sort_and_dedup(
      rules
        .iter()
        .map(|&(parent, child, p)| (child, parent, p))
        .collect(),
    );
    let (offsets, parents, probabilities) = group_by_major(num_children, &entries);
    Self {
      offsets,
      parents,
      probabilities,
    }
  }

  fn group(&self, child: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
    let range = self.offsets[child] as usize..self.offsets[child + 1] as usize;
    self.parents[range.clone()]
      .iter()
      .zip(&self.probabilities[range])
      .map(|(&parent, &p)| (parent as usize, p))
  }

  fn log_prob(&self, parent: usize, child: usize) -> f32 {
    if child + 1 >= self.offsets.len() {
      return LOG_ZERO;
    }
    for (p, prob) in self.group(child) {
      if p == parent {
        return prob;
      }
      if p > parent {
        break;
      }
    }
    LOG_ZERO
  }

  fn num_rules(&self) -> usize {
    self.probabilities.len()
  }

  fn entries(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
    (0..self.offsets.len() - 1)
      .flat_map(|child| self.group(child).map(move |(parent, p)| (parent, child, p)))
  }
}

/// Unary rules indexed by child nonterminal, the traversal order of the
/// unary SpMV step.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryRules(ChildMajorTable);

impl UnaryRules {
  /// `rules` are `(parent, child, log_prob)` triples.
  pub fn build(num_nts: usize, rules: &[(usize, usize, f32)]) -> Self {
    Self(ChildMajorTable::build(num_nts, rules))
  }

  pub fn with_child(&self, child: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
    self.0.group(child)
  }

  pub fn unary_log_prob(&self, parent: usize, child: usize) -> f32 {
    self.0.log_prob(parent, child)
  }

  pub fn num_rules(&self) -> usize {
    self.0.num_rules()
  }

  /// `(parent, child, log_prob)` triples grouped by child.
  pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
    self.0.entries()
  }
}

/// Lexical rules indexed by lexeme, the traversal order of lexical-row
/// population.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalRules(ChildMajorTable);

impl LexicalRules {
  /// `rules` are `(parent, lexeme, log_prob)` triples.
  pub fn build(num_lex: usize, rules: &[(usize, usize, f32)]) -> Self {
    Self(ChildMajorTable::build(num_lex, rules))
  }

  pub fn with_lexeme(&self, lex: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
    self.0.group(lex)
  }

  pub fn lexical_log_prob(&self, parent: usize, lex: usize) -> f32 {
    self.0.log_prob(parent, lex)
  }

  pub fn num_rules(&self) -> usize {
    self.0.num_rules()
  }

  /// `(parent, lexeme, log_prob)` triples grouped by lexeme.
  pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
    self.0.entries()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pack::PackingFunction;

  fn toy_rules(pf: &PackingFunction) -> Vec<(usize, usize, f32)> {
    // parents 0..4 over a 5-nonterminal vocabulary
    vec![
      (0, pf.pack(1, 2), -0.1),
      (0, pf.pack(3, 4), -2.0),
      (1, pf.pack(3, 4), -0.7),
      (2, pf.pack(1, 1), -1.5),
      (4, pf.pack(0, 0), -3.0),
    ]
  }

  #[test]
  fn test_layouts_agree_on_inserted_and_absent_rules() {
    let pf = PackingFunction::new(5, 1);
    let rules = toy_rules(&pf);
    let csc = CscBinaryMatrix::build(pf.packed_array_size(), &rules);
    let csr = CsrBinaryMatrix::build(5, &rules);

    for &(parent, key, prob) in &rules {
      assert_eq!(csc.binary_log_prob(parent, key), prob);
      assert_eq!(csr.binary_log_prob(parent, key), prob);
    }
    // exhaustive absence check over the whole space
    for parent in 0..5 {
      for key in 0..pf.packed_array_size() {
        let expected = rules
          .iter()
          .find(|&&(p, k, _)| p == parent && k == key)
          .map(|&(_, _, prob)| prob)
          .unwrap_or(LOG_ZERO);
        assert_eq!(csc.binary_log_prob(parent, key), expected);
        assert_eq!(csr.binary_log_prob(parent, key), expected);
      }
    }
  }

  #[test]
  fn test_csc_columns_sorted_by_parent() {
    let pf = PackingFunction::new(5, 1);
    let csc = CscBinaryMatrix::build(pf.packed_array_size(), &toy_rules(&pf));
    let key = pf.pack(3, 4);
    let parents: Vec<usize> = csc.column(key).map(|(p, _)| p).collect();
    assert_eq!(parents, vec![0, 1]);
    assert_eq!(csc.num_rules(), 5);
    assert!(csc.populated_columns().windows(2).all(|w| w[0] < w[1]));
  }

  #[test]
  fn test_duplicate_rules_keep_higher_probability() {
    let pf = PackingFunction::new(3, 1);
    let rules = vec![(0, pf.pack(1, 2), -2.0), (0, pf.pack(1, 2), -1.0)];
    let csc = CscBinaryMatrix::build(pf.packed_array_size(), &rules);
    assert_eq!(csc.num_rules(), 1);
    assert_eq!(csc.binary_log_prob(0, pf.pack(1, 2)), -1.0);
  }

  #[test]
  fn test_unary_and_lexical_tables() {
    let unary = UnaryRules::build(4, &[(0, 1, -0.5), (2, 1, -0.25), (3, 0, -1.0)]);
    let with_1: Vec<_> = unary.with_child(1).collect();
    assert_eq!(with_1, vec![(0, -0.5), (2, -0.25)]);
    assert_eq!(unary.unary_log_prob(2, 1), -0.25);
    assert_eq!(unary.unary_log_prob(2, 3), LOG_ZERO);

    let lex = LexicalRules::build(2, &[(1, 0, -0.1), (3, 0, -0.9)]);
    assert_eq!(lex.lexical_log_prob(3, 0), -0.9);
    assert_eq!(lex.lexical_log_prob(3, 1), LOG_ZERO);
    assert_eq!(lex.with_lexeme(1).count(), 0);
    assert_eq!(lex.num_rules(), 2);
  }

  #[test]
  fn test_empty_matrix() {
    let csc = CscBinaryMatrix::build(9, &[]);
    assert_eq!(csc.num_rules(), 0);
    assert_eq!(csc.binary_log_prob(0, 5), LOG_ZERO);
    assert!(csc.populated_columns().is_empty());
  }
}
