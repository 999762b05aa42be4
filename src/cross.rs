use crate::chart::Chart;
use crate::matrix::LOG_ZERO;
use crate::pack::PackingFunction;

/// Dense vector over the packed binary key space, holding the best joint
/// child probability found for each child pair across all split points of a
/// cell, plus the split point that achieved it.
///
/// Allocated once per parser instance and reused for every cell: the union
/// pass refills it rather than reallocating.
#[derive(Debug)]
pub struct CrossProductVector {
  probabilities: Vec<f32>,
  midpoints: Vec<u16>,
  populated: usize,
}

impl CrossProductVector {
  pub fn new(packed_array_size: usize) -> Self {
    Self {
      probabilities: vec![LOG_ZERO; packed_array_size],
      midpoints: vec![0; packed_array_size],
      populated: 0,
    }
  }

  /// Unions the cross-products of every split point in
  /// `mid_start..=mid_end`: for each pair of a valid left child of
  /// `(start, mid)` and a valid right child of `(mid, end)`, keeps the
  /// maximum `left + right` joint probability per packed key. Later split
  /// points overwrite only on strict improvement, so the first split point
  /// to reach a probability wins ties.
  pub fn union(
    &mut self,
    chart: &Chart,
    pack: &PackingFunction,
    start: usize,
    end: usize,
    mid_start: usize,
    mid_end: usize,
  ) {
    self.probabilities.fill(LOG_ZERO);
    self.populated = 0;

    for mid in mid_start..=mid_end {
      let left_entries = chart.left_entries(start, mid);
      let right_entries = chart.right_entries(mid, end);

      for &(left, left_prob) in left_entries {
        for &(right, right_prob) in right_entries {
          let joint = left_prob + right_prob;
          let key = pack.pack(left as usize, right as usize);
          let current = self.probabilities[key];

          if joint > current {
            self.probabilities[key] = joint;
            self.midpoints[key] = mid as u16;
            if current == LOG_ZERO {
              self.populated += 1;
            }
          }
        }
      }
    }
  }

  pub fn probability(&self, key: usize) -> f32 {
    self.probabilities[key]
  }

  pub fn midpoint(&self, key: usize) -> u16 {
    self.midpoints[key]
  }

  /// Number of packed keys with a finite probability after the last union.
  pub fn len(&self) -> usize {
    self.populated
  }

  pub fn is_empty(&self) -> bool {
    self.populated == 0
  }
}
