//! Chart-cell constraints. A selector is a flat AND-chain of constraint
//! links: every link may close cells, cap beams, or forbid unary expansion,
//! and never relaxes what another link decided. Links that need sentence
//! context (predicted beams, gold spans) precompute it in `init_sentence`.

use std::collections::HashSet;

use crate::grammar::Binarization;
use crate::syntree::SynTree;
use crate::Err;

/// One restriction in the chain. Methods default to "no opinion", so a link
/// only overrides the dimensions it actually constrains.
pub trait ConstraintLink: Send {
  /// Called once per sentence before any cell is visited. `tokens` are
  /// lexicon indices, `None` for unknown words.
  fn init_sentence(&mut self, _tokens: &[Option<usize>], _length: usize) {}

  fn is_cell_open(&self, _start: usize, _end: usize) -> bool {
    true
  }

  /// An open cell may still be restricted to factored parents only.
  fn is_cell_only_factored(&self, _start: usize, _end: usize) -> bool {
    false
  }

  fn is_unary_open(&self, _start: usize, _end: usize) -> bool {
    true
  }

  /// `Some(0)` closes the cell outright; `None` leaves the width to other
  /// links.
  fn beam_width(&self, _start: usize, _end: usize) -> Option<usize> {
    None
  }
}

/// AND-composition of constraint links, plus the split-point restriction
/// factored-only cells inherit from the grammar's binarization direction.
pub struct CellSelector {
  links: Vec<Box<dyn ConstraintLink>>,
  binarization: Binarization,
  length: usize,
}

impl CellSelector {
  pub fn new(binarization: Binarization) -> Self {
    Self {
      links: Vec::new(),
      binarization,
      length: 0,
    }
  }

  pub fn push_link(&mut self, link: Box<dyn ConstraintLink>) {
    self.links.push(link);
  }

  pub fn pop_link(&mut self) -> Option<Box<dyn ConstraintLink>> {
    self.links.pop()
  }

  pub fn init_sentence(&mut self, tokens: &[Option<usize>], length: usize) {
    self.length = length;
    for link in &mut self.links {
      link.init_sentence(tokens, length);
    }
  }

  /// A cell is open only if every link leaves it open.
  pub fn is_cell_open(&self, start: usize, end: usize) -> bool {
    self.links.iter().all(|l| l.is_cell_open(start, end))
  }

  /// A cell is factored-only if any link restricts it.
  pub fn is_cell_only_factored(&self, start: usize, end: usize) -> bool {
    self.links.iter().any(|l| l.is_cell_only_factored(start, end))
  }

  pub fn is_unary_open(&self, start: usize, end: usize) -> bool {
    self.links.iter().all(|l| l.is_unary_open(start, end))
  }

  /// Tightest width any link requests; 0 (exhaustive) when none has an
  /// opinion.
  pub fn beam_width(&self, start: usize, end: usize) -> usize {
    self
      .links
      .iter()
      .filter_map(|l| l.beam_width(start, end))
      .min()
      .unwrap_or(0)
  }

  /// First allowed split point of `(start, end)`. A factored-only cell of a
  /// single-direction binarized grammar admits exactly one split, at the
  /// boundary matching that direction.
  pub fn mid_start(&self, start: usize, end: usize) -> usize {
    if self.is_cell_only_factored(start, end) && self.binarization == Binarization::Right {
      end - 1
    } else {
      start + 1
    }
  }

  /// Last allowed split point of `(start, end)`.
  pub fn mid_end(&self, start: usize, end: usize) -> usize {
    if self.is_cell_only_factored(start, end) && self.binarization == Binarization::Left {
      start + 1
    } else {
      end - 1
    }
  }
}

/// Uniform configured beam widths, everything open. The lexical row usually
/// carries a wider beam than upper cells. A width of 0 means exhaustive and
/// is reported as no opinion, so it cannot undercut a tighter link.
pub struct StaticBeam {
  pub beam_width: usize,
  pub lexical_row_beam_width: usize,
}

impl ConstraintLink for StaticBeam {
  fn beam_width(&self, start: usize, end: usize) -> Option<usize> {
    let width = if end - start == 1 {
      self.lexical_row_beam_width
    } else {
      self.beam_width
    };
    (width > 0).then_some(width)
  }
}

/// Per-cell beam prediction. Implementations map a cell to a width class
/// before parsing begins; how they classify is opaque to the parser.
pub trait BeamWidthOracle: Send {
  fn classify(&self, tokens: &[Option<usize>], start: usize, end: usize) -> usize;
}

/// Beam widths predicted per cell by an oracle at sentence init. A predicted
/// width of 0 closes the cell. Span-1 cells are always open regardless of
/// the oracle, so every token keeps its lexical entries.
pub struct PredictedBeam {
  oracle: Box<dyn BeamWidthOracle>,
  widths: Vec<usize>,
  length: usize,
}

impl PredictedBeam {
  pub fn new(oracle: Box<dyn BeamWidthOracle>) -> Self {
    Self {
      oracle,
      widths: Vec::new(),
      length: 0,
    }
  }

  fn width(&self, start: usize, end: usize) -> usize {
    self.widths[crate::chart::cell_index(start, end, self.length)]
  }
}

impl ConstraintLink for PredictedBeam {
  fn init_sentence(&mut self, tokens: &[Option<usize>], length: usize) {
    self.length = length;
    self.widths.clear();
    self.widths.reserve(crate::chart::num_cells(length));
    for start in 0..length {
      for end in (start + 1)..=length {
        self.widths.push(self.oracle.classify(tokens, start, end));
      }
    }
  }

  fn is_cell_open(&self, start: usize, end: usize) -> bool {
    end - start == 1 || self.width(start, end) > 0
  }

  fn beam_width(&self, start: usize, end: usize) -> Option<usize> {
    if end - start == 1 {
      None
    } else {
      Some(self.width(start, end))
    }
  }
}

/// Constrains the chart to the spans of a reference derivation: only cells
/// whose span appears in the reference are open, and unary expansion is
/// allowed only where the reference used a unary rule.
pub struct GoldConstraints {
  open_spans: HashSet<(usize, usize)>,
  unary_spans: HashSet<(usize, usize)>,
}

impl GoldConstraints {
  pub fn from_reference(bracketing: &str) -> Result<Self, Err> {
    let tree: SynTree = bracketing.parse()?;
    Ok(Self {
      open_spans: tree.constituent_spans().into_iter().collect(),
      unary_spans: tree.unary_spans().into_iter().collect(),
    })
  }
}

impl ConstraintLink for GoldConstraints {
  fn is_cell_open(&self, start: usize, end: usize) -> bool {
    self.open_spans.contains(&(start, end))
  }

  fn is_unary_open(&self, start: usize, end: usize) -> bool {
    self.unary_spans.contains(&(start, end))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_chain_is_unconstrained() {
    let sel = CellSelector::new(Binarization::Right);
    assert!(sel.is_cell_open(0, 3));
    assert!(sel.is_unary_open(0, 3));
    assert!(!sel.is_cell_only_factored(0, 3));
    assert_eq!(sel.beam_width(0, 3), 0);
    assert_eq!(sel.mid_start(0, 3), 1);
    assert_eq!(sel.mid_end(0, 3), 2);
  }

  #[test]
  fn test_static_beam_widths() {
    let mut sel = CellSelector::new(Binarization::Right);
    sel.push_link(Box::new(StaticBeam {
      beam_width: 15,
      lexical_row_beam_width: 60,
    }));
    assert_eq!(sel.beam_width(2, 3), 60);
    assert_eq!(sel.beam_width(0, 3), 15);
    assert!(sel.is_cell_open(0, 3));
  }

  #[test]
  fn test_composition_takes_tightest_width() {
    struct Cap(usize);
    impl ConstraintLink for Cap {
      fn beam_width(&self, _: usize, _: usize) -> Option<usize> {
        Some(self.0)
      }
    }
    let mut sel = CellSelector::new(Binarization::Right);
    sel.push_link(Box::new(Cap(20)));
    sel.push_link(Box::new(Cap(5)));
    assert_eq!(sel.beam_width(0, 4), 5);
    sel.pop_link();
    assert_eq!(sel.beam_width(0, 4), 20);
  }

  #[test]
  fn test_factored_only_restricts_split_points() {
    struct FactoredEverywhere;
    impl ConstraintLink for FactoredEverywhere {
      fn is_cell_only_factored(&self, _: usize, _: usize) -> bool {
        true
      }
    }

    let mut right = CellSelector::new(Binarization::Right);
    right.push_link(Box::new(FactoredEverywhere));
    assert_eq!(right.mid_start(1, 5), 4);
    assert_eq!(right.mid_end(1, 5), 4);

    let mut left = CellSelector::new(Binarization::Left);
    left.push_link(Box::new(FactoredEverywhere));
    assert_eq!(left.mid_start(1, 5), 2);
    assert_eq!(left.mid_end(1, 5), 2);
  }

  #[test]
  fn test_predicted_beam_keeps_lexical_row_open() {
    struct CloseAll;
    impl BeamWidthOracle for CloseAll {
      fn classify(&self, _: &[Option<usize>], _: usize, _: usize) -> usize {
        0
      }
    }
    let mut sel = CellSelector::new(Binarization::Right);
    sel.push_link(Box::new(PredictedBeam::new(Box::new(CloseAll))));
    sel.init_sentence(&[Some(0), Some(1), Some(2)], 3);
    assert!(sel.is_cell_open(1, 2));
    assert!(!sel.is_cell_open(0, 2));
    assert!(!sel.is_cell_open(0, 3));
  }

  #[test]
  fn test_gold_constraints_open_reference_spans_only() {
    let gold = GoldConstraints::from_reference("(S (NP (NN dogs)) (VP bark))").unwrap();
    let mut sel = CellSelector::new(Binarization::Right);
    sel.push_link(Box::new(gold));
    sel.init_sentence(&[Some(0), Some(1)], 2);

    assert!(sel.is_cell_open(0, 2)); // S
    assert!(sel.is_cell_open(0, 1)); // NP, NN
    assert!(sel.is_cell_open(1, 2)); // VP
    assert!(sel.is_unary_open(0, 1)); // NP -> NN
    assert!(!sel.is_unary_open(1, 2));
    assert!(!sel.is_unary_open(0, 2));
  }

  #[test]
  fn test_gold_constraints_reject_malformed_reference() {
    assert!(GoldConstraints::from_reference("(S (NP").is_err());
  }
}
