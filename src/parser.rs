//! The parse controller: drives lexical-row population, the bottom-up
//! open-cell sweep (cross-product, SpMV, finalization), and back-pointer
//! extraction. A `Parser` owns its chart and scratch storage and must not be
//! shared across concurrently parsed sentences; batch parsing gives each
//! worker thread its own instance over one shared `&Grammar`.

use std::fmt;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cell_selector::{CellSelector, GoldConstraints, StaticBeam};
use crate::chart::Chart;
use crate::cross::CrossProductVector;
use crate::grammar::Grammar;
use crate::matrix::LOG_ZERO;
use crate::spmv::{binary_spmv, unary_spmv};
use crate::syntree::SynTree;
use crate::Err;

#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
  /// Sentences longer than this are skipped before any chart allocation.
  pub max_length: usize,
  /// Per-cell beam width above the lexical row; 0 = exhaustive.
  pub beam_width: usize,
  /// Beam width for span-1 cells; 0 = exhaustive.
  pub lexical_row_beam_width: usize,
}

impl Default for ParserOptions {
  fn default() -> Self {
    Self {
      max_length: 250,
      beam_width: 0,
      lexical_row_beam_width: 0,
    }
  }
}

/// How a sentence came out. Failure and skipping are ordinary values; a
/// batch run never stops for them.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
  Tree(SynTree),
  /// No start-symbol entry spans the sentence.
  Failure,
  /// Rejected by admission control before parsing.
  Skipped,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseStats {
  pub cross_product_time: Duration,
  pub spmv_time: Duration,
  pub edges_considered: u64,
  pub edges_added: u64,
}

impl ParseStats {
  /// Column header matching the `Display` rendering, for batch reports.
  pub fn header() -> &'static str {
    "xprod-ms\tspmv-ms\tedges-considered\tedges-added"
  }
}

impl fmt::Display for ParseStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{:.2}\t{:.2}\t{}\t{}",
      self.cross_product_time.as_secs_f64() * 1e3,
      self.spmv_time.as_secs_f64() * 1e3,
      self.edges_considered,
      self.edges_added
    )
  }
}

#[derive(Debug, Clone)]
pub struct ParseResult {
  pub outcome: ParseOutcome,
  /// Inside log-probability of the root, `-inf` on failure.
  pub inside_log_prob: f32,
  pub stats: ParseStats,
}

impl ParseResult {
  fn failure(stats: ParseStats) -> Self {
    Self {
      outcome: ParseOutcome::Failure,
      inside_log_prob: LOG_ZERO,
      stats,
    }
  }

  /// The bracketed tree, or the `()` failure marker.
  pub fn bracketing(&self) -> String {
    match &self.outcome {
      ParseOutcome::Tree(tree) => tree.to_string(),
      ParseOutcome::Failure | ParseOutcome::Skipped => "()".to_string(),
    }
  }
}

/// One parsing engine over a shared grammar. Chart and cross-product storage
/// persist across sentences and are refilled per parse.
pub struct Parser<'g> {
  grammar: &'g Grammar,
  options: ParserOptions,
  chart: Chart,
  cross: CrossProductVector,
  selector: CellSelector,
}

impl<'g> Parser<'g> {
  pub fn new(grammar: &'g Grammar, options: ParserOptions) -> Self {
    let mut selector = CellSelector::new(grammar.binarization());
    selector.push_link(Box::new(StaticBeam {
      beam_width: options.beam_width,
      lexical_row_beam_width: options.lexical_row_beam_width,
    }));
    Self {
      grammar,
      options,
      chart: Chart::new(grammar.num_nonterminals()),
      cross: CrossProductVector::new(grammar.packing().packed_array_size()),
      selector,
    }
  }

  pub fn grammar(&self) -> &'g Grammar {
    self.grammar
  }

  /// Adds a constraint link for all following sentences, e.g. a predicted
  /// beam model.
  pub fn push_link(&mut self, link: Box<dyn crate::cell_selector::ConstraintLink>) {
    self.selector.push_link(link);
  }

  /// Parses lexicon-indexed tokens. An out-of-range index is a caller bug
  /// and an error; an unparseable sentence is not.
  pub fn parse(&mut self, tokens: &[usize]) -> Result<ParseResult, Err> {
    for &t in tokens {
      if t >= self.grammar.num_lexemes() {
        return Err(format!("token index {} out of lexicon range", t).into());
      }
    }
    let tokens: Vec<Option<usize>> = tokens.iter().map(|&t| Some(t)).collect();
    Ok(self.parse_tokens(&tokens))
  }

  /// Splits on whitespace and looks each word up in the lexicon. Unknown
  /// words simply have no lexical rules, which usually surfaces as a
  /// failure result rather than an error.
  pub fn parse_sentence(&mut self, sentence: &str) -> ParseResult {
    let tokens: Vec<Option<usize>> = sentence
      .split_whitespace()
      .map(|w| self.grammar.lexicon().index_of(w))
      .collect();
    self.parse_tokens(&tokens)
  }

  /// Parses with the chart constrained to the spans of a reference
  /// derivation. The constraint applies to this sentence only.
  pub fn parse_constrained(&mut self, sentence: &str, reference: &str) -> Result<ParseResult, Err> {
    let gold = GoldConstraints::from_reference(reference)?;
    self.selector.push_link(Box::new(gold));
    let result = self.parse_sentence(sentence);
    self.selector.pop_link();
    Ok(result)
  }

  fn parse_tokens(&mut self, tokens: &[Option<usize>]) -> ParseResult {
    let n = tokens.len();
    // midpoints are stored as u16, so the length cap can never exceed that
    let max_length = self.options.max_length.min(u16::MAX as usize);
    if n > max_length {
      warn!(length = n, max_length, "sentence over length limit, skipping");
      return ParseResult {
        outcome: ParseOutcome::Skipped,
        inside_log_prob: LOG_ZERO,
        stats: ParseStats::default(),
      };
    }
    if n == 0 {
      return ParseResult::failure(ParseStats::default());
    }

    let grammar = self.grammar;
    let pack = *grammar.packing();
    let mut cross_product_time = Duration::ZERO;
    let mut spmv_time = Duration::ZERO;

    self.chart.reset(n);
    self.selector.init_sentence(tokens, n);

    for (i, token) in tokens.iter().enumerate() {
      let mut cell = self.chart.cell_mut(i, i + 1);
      if let Some(lex) = *token {
        for (parent, prob) in grammar.lexical_rules().with_lexeme(lex) {
          cell.update_inside(parent, pack.pack_lexical(lex), i + 1, prob);
        }
      }
      if self.selector.is_unary_open(i, i + 1) {
        unary_spmv(grammar.unary_rules(), &pack, &mut cell);
      }
      drop(cell);
      self
        .chart
        .finalize_cell(i, i + 1, self.selector.beam_width(i, i + 1), grammar);
    }

    for span in 2..=n {
      for start in 0..=(n - span) {
        let end = start + span;
        if !self.selector.is_cell_open(start, end) {
          continue;
        }

        let t = Instant::now();
        self.cross.union(
          &self.chart,
          &pack,
          start,
          end,
          self.selector.mid_start(start, end),
          self.selector.mid_end(start, end),
        );
        cross_product_time += t.elapsed();

        let matrix = if self.selector.is_cell_only_factored(start, end) {
          grammar.factored_csc()
        } else {
          grammar.csc()
        };
        let t = Instant::now();
        let mut cell = self.chart.cell_mut(start, end);
        binary_spmv(matrix, &self.cross, &mut cell);
        if self.selector.is_unary_open(start, end) {
          unary_spmv(grammar.unary_rules(), &pack, &mut cell);
        }
        drop(cell);
        spmv_time += t.elapsed();

        self
          .chart
          .finalize_cell(start, end, self.selector.beam_width(start, end), grammar);
      }
    }

    let stats = ParseStats {
      cross_product_time,
      spmv_time,
      edges_considered: self.chart.edges_considered(),
      edges_added: self.chart.edges_added(),
    };
    let root = self.chart.inside(0, n, grammar.start());
    debug!(
      length = n,
      root_log_prob = root,
      edges_added = stats.edges_added,
      "parsed sentence"
    );

    match self.chart.extract_best_parse(0, n, grammar.start(), grammar) {
      Some(tree) => ParseResult {
        outcome: ParseOutcome::Tree(tree),
        inside_log_prob: root,
        stats,
      },
      None => ParseResult::failure(stats),
    }
  }
}

/// Aggregate counters for one batch run; accumulated from per-sentence
/// results rather than mutated globally.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchContext {
  pub sentences: usize,
  pub parsed: usize,
  pub failures: usize,
  pub skipped: usize,
  /// Sum of root log-probabilities over parsed sentences only.
  pub total_log_prob: f64,
}

impl BatchContext {
  pub fn record(&mut self, result: &ParseResult) {
    self.sentences += 1;
    match result.outcome {
      ParseOutcome::Tree(_) => {
        self.parsed += 1;
        self.total_log_prob += result.inside_log_prob as f64;
      }
      ParseOutcome::Failure => self.failures += 1,
      ParseOutcome::Skipped => self.skipped += 1,
    }
  }
}

impl fmt::Display for BatchContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} sentences: {} parsed, {} failed, {} skipped, total log-prob {:.4}",
      self.sentences, self.parsed, self.failures, self.skipped, self.total_log_prob
    )
  }
}

/// Parses a batch in parallel, one `Parser` per rayon worker. Results come
/// back in input order.
pub fn parse_batch(
  grammar: &Grammar,
  options: ParserOptions,
  sentences: &[&str],
) -> (Vec<ParseResult>, BatchContext) {
  let results: Vec<ParseResult> = sentences
    .par_iter()
    .map_init(
      || Parser::new(grammar, options),
      |parser, sentence| parser.parse_sentence(sentence),
    )
    .collect();

  let mut context = BatchContext::default();
  for result in &results {
    context.record(result);
  }
  (results, context)
}

#[cfg(test)]
mod tests {
  use super::*;

  const TOY_GRAMMAR: &str = r#"
start=S binarization=right
S -> NP VP 0.000000
NP -> D N -0.500000
===== LEXICON =====
D -> the 0.000000
N -> dog 0.000000
VP -> barks -1.000000
"#;

  // adds an ambiguous attachment so beams have something to prune
  const AMBIGUOUS_GRAMMAR: &str = r#"
start=S binarization=right
S -> NP VP -0.100000
S -> S PP -0.900000
NP -> NP PP -1.200000
VP -> V NP -0.300000
VP -> VP PP -0.800000
PP -> P NP -0.100000
===== LEXICON =====
NP -> she 0.000000
V -> saw -0.100000
NP -> stars -0.700000
P -> with -0.100000
NP -> telescopes -0.900000
"#;

  fn toy() -> Grammar {
    TOY_GRAMMAR.parse().unwrap()
  }

  #[test]
  fn test_toy_end_to_end() {
    let g = toy();
    let mut parser = Parser::new(&g, ParserOptions::default());
    let result = parser.parse_sentence("the dog barks");
    assert_eq!(result.bracketing(), "(S (NP (D the) (N dog)) (VP barks))");
    assert_eq!(result.inside_log_prob, -1.5);
    assert!(result.stats.edges_added > 0);
  }

  #[test]
  fn test_parse_by_token_indices() {
    let g = toy();
    let mut parser = Parser::new(&g, ParserOptions::default());
    let the = g.lexicon().index_of("the").unwrap();
    let dog = g.lexicon().index_of("dog").unwrap();
    let barks = g.lexicon().index_of("barks").unwrap();
    let result = parser.parse(&[the, dog, barks]).unwrap();
    assert_eq!(result.bracketing(), "(S (NP (D the) (N dog)) (VP barks))");

    assert!(parser.parse(&[the, 999]).is_err());
  }

  #[test]
  fn test_unknown_token_fails_without_panic() {
    let g = toy();
    let mut parser = Parser::new(&g, ParserOptions::default());
    let result = parser.parse_sentence("the zyzzyva barks");
    assert_eq!(result.outcome, ParseOutcome::Failure);
    assert_eq!(result.bracketing(), "()");
    assert_eq!(result.inside_log_prob, LOG_ZERO);
  }

  #[test]
  fn test_unparseable_sentence_fails() {
    let g = toy();
    let mut parser = Parser::new(&g, ParserOptions::default());
    assert_eq!(parser.parse_sentence("dog the barks").outcome, ParseOutcome::Failure);
    assert_eq!(parser.parse_sentence("").outcome, ParseOutcome::Failure);
  }

  #[test]
  fn test_max_length_capped_by_midpoint_range() {
    let g = toy();
    let mut parser = Parser::new(
      &g,
      ParserOptions {
        max_length: usize::MAX,
        ..ParserOptions::default()
      },
    );
    // longer than a u16 midpoint can address; skipped despite the huge cap
    let sentence = "the ".repeat((u16::MAX as usize) + 2);
    let result = parser.parse_sentence(&sentence);
    assert_eq!(result.outcome, ParseOutcome::Skipped);
  }

  #[test]
  fn test_over_length_sentence_skipped() {
    let g = toy();
    let mut parser = Parser::new(
      &g,
      ParserOptions {
        max_length: 2,
        ..ParserOptions::default()
      },
    );
    let result = parser.parse_sentence("the dog barks");
    assert_eq!(result.outcome, ParseOutcome::Skipped);
    assert_eq!(result.bracketing(), "()");
  }

  #[test]
  fn test_determinism_across_reuse() {
    let g: Grammar = AMBIGUOUS_GRAMMAR.parse().unwrap();
    let mut parser = Parser::new(&g, ParserOptions::default());
    let sentence = "she saw stars with telescopes";
    let first = parser.parse_sentence(sentence);
    let second = parser.parse_sentence(sentence);
    assert_eq!(first.bracketing(), second.bracketing());
    assert_eq!(first.inside_log_prob, second.inside_log_prob);
  }

  #[test]
  fn test_beam_monotonicity() {
    let g: Grammar = AMBIGUOUS_GRAMMAR.parse().unwrap();
    let sentence = "she saw stars with telescopes";
    let mut last = LOG_ZERO;
    for beam in [1, 2, 4, 0] {
      let mut parser = Parser::new(
        &g,
        ParserOptions {
          beam_width: beam,
          ..ParserOptions::default()
        },
      );
      let result = parser.parse_sentence(sentence);
      if let ParseOutcome::Tree(_) = result.outcome {
        assert!(result.inside_log_prob >= last);
        last = result.inside_log_prob;
      }
    }
    // exhaustive (beam 0) ran last, so the final score is the true optimum
    assert!(last > LOG_ZERO);
  }

  #[test]
  fn test_constrained_parse_follows_reference() {
    let g: Grammar = AMBIGUOUS_GRAMMAR.parse().unwrap();
    let mut parser = Parser::new(&g, ParserOptions::default());
    // force low attachment of the PP even though high attachment scores
    // better under this grammar
    let reference = "(S (NP she) (VP (V saw) (NP (NP stars) (PP (P with) (NP telescopes)))))";
    let constrained = parser
      .parse_constrained("she saw stars with telescopes", reference)
      .unwrap();
    assert_eq!(constrained.bracketing(), reference);

    // the link is popped afterwards
    let free = parser.parse_sentence("she saw stars with telescopes");
    assert_ne!(free.bracketing(), "()");
  }

  // a factored parent competing with a better non-factored parent over the
  // same children
  const FACTORED_GRAMMAR: &str = r#"
start=S binarization=right
S -> A @S -0.100000
S -> A X 0.000000
@S -> B C -0.200000
X -> B C -0.100000
===== LEXICON =====
A -> a 0.000000
B -> b 0.000000
C -> c 0.000000
"#;

  #[test]
  fn test_factored_only_cell_uses_factored_rules() {
    struct FactoredSpan {
      start: usize,
      end: usize,
    }
    impl crate::cell_selector::ConstraintLink for FactoredSpan {
      fn is_cell_only_factored(&self, start: usize, end: usize) -> bool {
        (start, end) == (self.start, self.end)
      }
    }

    let g: Grammar = FACTORED_GRAMMAR.parse().unwrap();

    // unconstrained, the higher-scoring non-factored X wins the inner span
    let mut free = Parser::new(&g, ParserOptions::default());
    assert_eq!(
      free.parse_sentence("a b c").bracketing(),
      "(S (A a) (X (B b) (C c)))"
    );

    // restricted to factored parents, cell (1, 3) admits only @S
    let mut parser = Parser::new(&g, ParserOptions::default());
    parser.push_link(Box::new(FactoredSpan { start: 1, end: 3 }));
    let result = parser.parse_sentence("a b c");
    assert_eq!(result.bracketing(), "(S (A a) (@S (B b) (C c)))");
    assert_eq!(result.inside_log_prob, -0.1 + -0.2);
  }

  #[test]
  fn test_batch_context_counts() {
    let g = toy();
    let options = ParserOptions {
      max_length: 3,
      ..ParserOptions::default()
    };
    let sentences = [
      "the dog barks",
      "the zyzzyva barks",
      "the dog barks the dog barks",
      "the dog barks",
    ];
    let (results, context) = parse_batch(&g, options, &sentences);
    assert_eq!(results.len(), 4);
    assert_eq!(context.sentences, 4);
    assert_eq!(context.parsed, 2);
    assert_eq!(context.failures, 1);
    assert_eq!(context.skipped, 1);
    assert_eq!(context.total_log_prob, -3.0);
  }

  #[test]
  fn test_stats_render() {
    let g = toy();
    let mut parser = Parser::new(&g, ParserOptions::default());
    let result = parser.parse_sentence("the dog barks");
    let line = result.stats.to_string();
    assert_eq!(line.split('\t').count(), ParseStats::header().split('\t').count());
  }
}
