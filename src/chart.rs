use crate::grammar::Grammar;
use crate::matrix::LOG_ZERO;
use crate::pack::Unpacked;
use crate::syntree::SynTree;

/// Index of span `(start, end)` in start-major triangular order.
pub fn cell_index(start: usize, end: usize, size: usize) -> usize {
  debug_assert!(start < end && end <= size);
  start * (2 * size - start + 1) / 2 + (end - start - 1)
}

pub fn num_cells(size: usize) -> usize {
  size * (size + 1) / 2
}

/// The triangular chart, stored as a 3-way parallel array indexed by
/// `cell_offset + nonterminal`:
///
/// 1. best inside log-probability (`-inf` for unobserved nonterminals)
/// 2. packed child key that produced it, which identifies the grammar rule
/// 3. split point (== `end` for unary and lexical back-pointers)
///
/// Those three fields are enough to back-trace the best derivation. Cells are
/// fixed-length slices of the arrays, so storage is reused across sentences
/// by refilling rather than reallocating.
#[derive(Debug)]
pub struct Chart {
  num_nts: usize,
  size: usize,
  probabilities: Vec<f32>,
  children: Vec<u32>,
  midpoints: Vec<u16>,
  // per-cell entry lists frozen at finalization, consumed by the
  // cross-product stage
  left_entries: Vec<Vec<(u32, f32)>>,
  right_entries: Vec<Vec<(u32, f32)>>,
  edges_considered: u64,
  edges_added: u64,
}

/// A mutable view of one cell during its accumulating phase.
pub struct CellMut<'a> {
  pub start: usize,
  pub end: usize,
  probs: &'a mut [f32],
  children: &'a mut [u32],
  midpoints: &'a mut [u16],
  considered: &'a mut u64,
  added: &'a mut u64,
}

impl CellMut<'_> {
  /// The single mutation primitive: keep the new entry only if it beats the
  /// best probability recorded so far for `parent` in this cell.
  pub fn update_inside(&mut self, parent: usize, packed_key: usize, midpoint: usize, log_prob: f32) {
    *self.considered += 1;
    if log_prob > self.probs[parent] {
      self.probs[parent] = log_prob;
      self.children[parent] = packed_key as u32;
      self.midpoints[parent] = midpoint as u16;
      *self.added += 1;
    }
  }

  pub fn inside(&self, nt: usize) -> f32 {
    self.probs[nt]
  }

  /// Snapshot of the currently populated `(nonterminal, log_prob)` entries.
  pub fn populated(&self) -> Vec<(usize, f32)> {
    self
      .probs
      .iter()
      .enumerate()
      .filter(|&(_, &p)| p > LOG_ZERO)
      .map(|(nt, &p)| (nt, p))
      .collect()
  }
}

impl Chart {
  pub fn new(num_nts: usize) -> Self {
    Self {
      num_nts,
      size: 0,
      probabilities: Vec::new(),
      children: Vec::new(),
      midpoints: Vec::new(),
      left_entries: Vec::new(),
      right_entries: Vec::new(),
      edges_considered: 0,
      edges_added: 0,
    }
  }

  /// Prepares the chart for a sentence of `sentence_length` tokens, reusing
  /// existing storage where possible.
  pub fn reset(&mut self, sentence_length: usize) {
    self.size = sentence_length;
    let cells = num_cells(sentence_length);
    let needed = cells * self.num_nts;

    self.probabilities.resize(needed, LOG_ZERO);
    self.probabilities.fill(LOG_ZERO);
    self.children.resize(needed, 0);
    self.midpoints.resize(needed, 0);

    self.left_entries.resize(cells, Vec::new());
    self.right_entries.resize(cells, Vec::new());
    for entries in &mut self.left_entries[..cells] {
      entries.clear();
    }
    for entries in &mut self.right_entries[..cells] {
      entries.clear();
    }

    self.edges_considered = 0;
    self.edges_added = 0;
  }

  /// Sentence length this chart is currently sized for.
  pub fn size(&self) -> usize {
    self.size
  }

  pub fn num_nonterminals(&self) -> usize {
    self.num_nts
  }

  pub fn edges_considered(&self) -> u64 {
    self.edges_considered
  }

  pub fn edges_added(&self) -> u64 {
    self.edges_added
  }

  fn offset(&self, start: usize, end: usize) -> usize {
    cell_index(start, end, self.size) * self.num_nts
  }

  pub fn cell_mut(&mut self, start: usize, end: usize) -> CellMut<'_> {
    let off = self.offset(start, end);
    CellMut {
      start,
      end,
      probs: &mut self.probabilities[off..off + self.num_nts],
      children: &mut self.children[off..off + self.num_nts],
      midpoints: &mut self.midpoints[off..off + self.num_nts],
      considered: &mut self.edges_considered,
      added: &mut self.edges_added,
    }
  }

  pub fn inside(&self, start: usize, end: usize, nt: usize) -> f32 {
    self.probabilities[self.offset(start, end) + nt]
  }

  /// Prunes the cell to its `beam_width` best entries (0 = exhaustive), ties
  /// broken toward the lower nonterminal index, then freezes the compact
  /// valid-left/right child lists read by later cross-products. After this
  /// the cell is immutable until the next `reset`.
  pub fn finalize_cell(&mut self, start: usize, end: usize, beam_width: usize, grammar: &Grammar) {
    let off = self.offset(start, end);

    if beam_width > 0 {
      let mut live: Vec<(usize, f32)> = (0..self.num_nts)
        .filter(|&nt| self.probabilities[off + nt] > LOG_ZERO)
        .map(|nt| (nt, self.probabilities[off + nt]))
        .collect();
      if live.len() > beam_width {
        live.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        for &(nt, _) in &live[beam_width..] {
          self.probabilities[off + nt] = LOG_ZERO;
        }
      }
    }

    let ci = cell_index(start, end, self.size);
    let mut left = Vec::new();
    let mut right = Vec::new();
    for nt in 0..self.num_nts {
      let p = self.probabilities[off + nt];
      if p > LOG_ZERO {
        if grammar.is_valid_left_child(nt) {
          left.push((nt as u32, p));
        }
        if grammar.is_valid_right_child(nt) {
          right.push((nt as u32, p));
        }
      }
    }
    self.left_entries[ci] = left;
    self.right_entries[ci] = right;
  }

  /// Finalized entries of `(start, end)` usable as left children of a binary
  /// rule.
  pub fn left_entries(&self, start: usize, end: usize) -> &[(u32, f32)] {
    &self.left_entries[cell_index(start, end, self.size)]
  }

  /// Finalized entries of `(start, end)` usable as right children of a
  /// binary rule.
  pub fn right_entries(&self, start: usize, end: usize) -> &[(u32, f32)] {
    &self.right_entries[cell_index(start, end, self.size)]
  }

  /// Follows back-pointers down from `(start, end, parent)` and rebuilds the
  /// best derivation. Returns `None` if the entry is unpopulated.
  pub fn extract_best_parse(
    &self,
    start: usize,
    end: usize,
    parent: usize,
    grammar: &Grammar,
  ) -> Option<SynTree> {
    let off = self.offset(start, end);
    if self.probabilities[off + parent] == LOG_ZERO {
      return None;
    }
    let key = self.children[off + parent] as usize;
    let midpoint = self.midpoints[off + parent] as usize;
    let symbol = grammar.nonterminals().symbol(parent);

    match grammar.packing().unpacked(key) {
      Unpacked::Lexical { lex } => Some(SynTree::branch(
        symbol,
        (start, end),
        vec![SynTree::leaf(grammar.lexicon().symbol(lex), (start, end))],
      )),
      Unpacked::Unary { child } => {
        let sub = self.extract_best_parse(start, end, child, grammar)?;
        Some(SynTree::branch(symbol, (start, end), vec![sub]))
      }
      Unpacked::Binary { left, right } => {
        let l = self.extract_best_parse(start, midpoint, left, grammar)?;
        let r = self.extract_best_parse(midpoint, end, right, grammar)?;
        Some(SynTree::branch(symbol, (start, end), vec![l, r]))
      }
    }
  }
}
