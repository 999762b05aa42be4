//! Sparse matrix-vector products that move probability mass from a cell's
//! cross-product vector (binary) or from the cell itself (unary) into chart
//! entries. Iteration follows the grammar's sparsity, never the dense key
//! space.

use crate::chart::CellMut;
use crate::cross::CrossProductVector;
use crate::matrix::{CscBinaryMatrix, CsrBinaryMatrix, UnaryRules, LOG_ZERO};
use crate::pack::PackingFunction;

/// Applies every binary rule whose packed child key has a finite joint
/// probability in `cross`: for each populated grammar column, each parent
/// rule contributes `rule + joint` at the midpoint the cross-product
/// recorded.
pub fn binary_spmv(matrix: &CscBinaryMatrix, cross: &CrossProductVector, cell: &mut CellMut) {
  for &key in matrix.populated_columns() {
    let key = key as usize;
    let joint = cross.probability(key);
    if joint == LOG_ZERO {
      continue;
    }
    let midpoint = cross.midpoint(key) as usize;
    for (parent, rule_prob) in matrix.column(key) {
      cell.update_inside(parent, key, midpoint, rule_prob + joint);
    }
  }
}

/// Row-major variant of [`binary_spmv`] restricted to `parents`, used when a
/// cell's parent rows are partitioned across workers. Each row is a sorted
/// key list, so iteration is per-parent instead of per-column.
pub fn binary_spmv_row_range(
  matrix: &CsrBinaryMatrix,
  cross: &CrossProductVector,
  cell: &mut CellMut,
  parents: std::ops::Range<usize>,
) {
  for parent in parents {
    for (key, rule_prob) in matrix.row(parent) {
      let joint = cross.probability(key);
      if joint == LOG_ZERO {
        continue;
      }
      cell.update_inside(parent, key, cross.midpoint(key) as usize, rule_prob + joint);
    }
  }
}

/// A single unary pass over the entries populated when the pass begins.
/// Parents introduced by the pass itself are not re-expanded, so unary
/// chains longer than one link never apply within a cell. Unary
/// back-pointers record the cell's own end as their midpoint.
pub fn unary_spmv(unary: &UnaryRules, pack: &PackingFunction, cell: &mut CellMut) {
  let end = cell.end;
  let snapshot = cell.populated();
  for (child, child_prob) in snapshot {
    for (parent, rule_prob) in unary.with_child(child) {
      cell.update_inside(parent, pack.pack_unary(child), end, rule_prob + child_prob);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chart::Chart;
  use crate::grammar::{Binarization, Grammar, Production};
  use crate::vocab::SymbolTable;

  // S -> A B plus the unary chain S -> T, T -> A
  fn toy_grammar() -> Grammar {
    let mut nts = SymbolTable::new();
    let s = nts.intern("S");
    let a = nts.intern("A");
    let b = nts.intern("B");
    let t = nts.intern("T");
    let mut lex = SymbolTable::new();
    let xa = lex.intern("a");
    let xb = lex.intern("b");
    Grammar::new(
      nts,
      lex,
      s,
      Binarization::Right,
      &[
        Production::binary(s, a, b, -0.25),
        Production::unary(t, a, -0.5),
        Production::unary(s, t, -0.125),
        Production::lexical(a, xa, -1.0),
        Production::lexical(b, xb, -2.0),
      ],
    )
    .unwrap()
  }

  fn seeded_chart(g: &Grammar) -> Chart {
    let pf = g.packing();
    let mut chart = Chart::new(g.num_nonterminals());
    chart.reset(2);
    chart.cell_mut(0, 1).update_inside(1, pf.pack_lexical(0), 1, -1.0);
    chart.finalize_cell(0, 1, 0, g);
    chart.cell_mut(1, 2).update_inside(2, pf.pack_lexical(1), 2, -2.0);
    chart.finalize_cell(1, 2, 0, g);
    chart
  }

  #[test]
  fn test_binary_spmv_applies_rules_at_cross_midpoints() {
    let g = toy_grammar();
    let pf = *g.packing();
    let mut chart = seeded_chart(&g);

    let mut cross = CrossProductVector::new(pf.packed_array_size());
    cross.union(&chart, &pf, 0, 2, 1, 1);
    let mut cell = chart.cell_mut(0, 2);
    binary_spmv(g.csc(), &cross, &mut cell);

    assert_eq!(cell.inside(0), -0.25 + -1.0 + -2.0);
    assert_eq!(cell.inside(3), LOG_ZERO);
    drop(cell);

    let tree = chart.extract_best_parse(0, 2, 0, &g).unwrap();
    assert_eq!(tree.to_string(), "(S (A a) (B b))");
  }

  #[test]
  fn test_row_range_matches_column_traversal() {
    let g = toy_grammar();
    let pf = *g.packing();
    let mut chart = seeded_chart(&g);
    let mut cross = CrossProductVector::new(pf.packed_array_size());
    cross.union(&chart, &pf, 0, 2, 1, 1);

    let mut by_column = Chart::new(g.num_nonterminals());
    by_column.reset(2);
    binary_spmv(g.csc(), &cross, &mut by_column.cell_mut(0, 2));

    let n = g.num_nonterminals();
    let mut cell = chart.cell_mut(0, 2);
    binary_spmv_row_range(g.csr(), &cross, &mut cell, 0..n);
    drop(cell);

    for nt in 0..n {
      assert_eq!(chart.inside(0, 2, nt), by_column.inside(0, 2, nt));
    }
  }

  #[test]
  fn test_unary_spmv_is_a_single_pass() {
    let g = toy_grammar();
    let pf = *g.packing();
    let mut chart = Chart::new(g.num_nonterminals());
    chart.reset(1);

    let mut cell = chart.cell_mut(0, 1);
    cell.update_inside(1, pf.pack_lexical(0), 1, -1.0);
    unary_spmv(g.unary_rules(), &pf, &mut cell);

    // T -> A applies; the chained S -> T does not, because S's parent was
    // introduced by this same pass
    assert_eq!(cell.inside(3), -0.5 + -1.0);
    assert_eq!(cell.inside(0), LOG_ZERO);

    // a second pass sees T and finishes the chain
    unary_spmv(g.unary_rules(), &pf, &mut cell);
    assert_eq!(cell.inside(0), -0.125 + -0.5 + -1.0);
  }

  #[test]
  fn test_unary_back_pointer_midpoint_is_cell_end() {
    let g = toy_grammar();
    let pf = *g.packing();
    let mut chart = Chart::new(g.num_nonterminals());
    chart.reset(1);
    {
      let mut cell = chart.cell_mut(0, 1);
      cell.update_inside(1, pf.pack_lexical(0), 1, -1.0);
      unary_spmv(g.unary_rules(), &pf, &mut cell);
    }
    let tree = chart.extract_best_parse(0, 1, 3, &g).unwrap();
    assert_eq!(tree.to_string(), "(T (A a))");
  }
}
