//! Reader for the grammar text format: a `key=value` header line, one rule
//! per line (`PARENT -> LEFT RIGHT logprob` binary, `PARENT -> CHILD logprob`
//! unary), a literal delimiter, then lexical rules (`PARENT -> word logprob`).
//! Probabilities are natural logs; six decimal digits round-trip.

use regex::Regex;
use std::str::FromStr;

use crate::grammar::{Binarization, Grammar, Production};
use crate::vocab::SymbolTable;
use crate::Err;

pub const LEXICON_DELIMITER: &str = "===== LEXICON =====";

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

fn parse_header(line: &str) -> Result<(String, Binarization, Option<[usize; 3]>), Err> {
  regex_static!(KEY_VALUE, r"^([A-Za-z][A-Za-z0-9_]*)=(\S+)$");

  let mut start = None;
  let mut binarization = Binarization::Right;
  let mut counts = [None; 3];

  for pair in line.split_whitespace() {
    let caps = KEY_VALUE
      .captures(pair)
      .ok_or_else(|| -> Err { format!("malformed header entry {:?}", pair).into() })?;
    let (key, value) = (&caps[1], caps[2].to_string());
    match key {
      "start" => start = Some(value),
      "binarization" => {
        binarization = match value.as_str() {
          "left" => Binarization::Left,
          "right" => Binarization::Right,
          other => return Err(format!("unknown binarization {:?}", other).into()),
        }
      }
      "nBinary" | "nUnary" | "nLex" => {
        let slot = match key {
          "nBinary" => 0,
          "nUnary" => 1,
          _ => 2,
        };
        counts[slot] = Some(
          value
            .parse::<usize>()
            .map_err(|e| -> Err { format!("bad {} count: {}", key, e).into() })?,
        );
      }
      // language, format tags etc. are recorded by the training pipeline but
      // don't affect parsing
      _ => {}
    }
  }

  let start = start.ok_or_else(|| -> Err { "header missing start= symbol".into() })?;
  let counts = match counts {
    [Some(b), Some(u), Some(l)] => Some([b, u, l]),
    [None, None, None] => None,
    _ => return Err("header must carry all of nBinary/nUnary/nLex or none".into()),
  };
  Ok((start, binarization, counts))
}

fn parse_log_prob(token: &str, line_no: usize) -> Result<f32, Err> {
  let prob: f32 = token
    .parse()
    .map_err(|e| -> Err { format!("line {}: bad log-probability {:?}: {}", line_no, token, e).into() })?;
  if prob > 0.0 {
    return Err(format!("line {}: log-probability {} is positive", line_no, prob).into());
  }
  Ok(prob)
}

impl FromStr for Grammar {
  type Err = Err;

  /// Parses a grammar from the text format. Any malformed line is fatal;
  /// nothing is parsed with a partially loaded grammar.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut lines = s
      .lines()
      .enumerate()
      .map(|(i, l)| (i + 1, l.trim()))
      .filter(|(_, l)| !l.is_empty());

    let (_, header) = lines
      .next()
      .ok_or_else(|| -> Err { "empty grammar".into() })?;
    let (start_symbol, binarization, counts) = parse_header(header)?;

    let mut nonterminals = SymbolTable::new();
    let mut lexicon = SymbolTable::new();
    // index 0 is the start symbol by convention
    let start = nonterminals.intern(&start_symbol);

    let mut productions = Vec::new();
    let mut in_lexicon = false;
    let mut rule_counts = [0usize; 3];

    for (line_no, line) in lines {
      if line == LEXICON_DELIMITER {
        if in_lexicon {
          return Err(format!("line {}: duplicate lexicon delimiter", line_no).into());
        }
        in_lexicon = true;
        continue;
      }

      let tokens: Vec<&str> = line.split_whitespace().collect();
      let (parent, rhs) = match tokens.as_slice() {
        [parent, "->", rest @ ..] if !rest.is_empty() => (*parent, rest),
        _ => return Err(format!("line {}: malformed rule {:?}", line_no, line).into()),
      };
      let parent = nonterminals.intern(parent);

      if in_lexicon {
        let [word, prob] = rhs else {
          return Err(format!("line {}: malformed lexical rule {:?}", line_no, line).into());
        };
        let prob = parse_log_prob(prob, line_no)?;
        let lex = lexicon.intern(word);
        productions.push(Production::lexical(parent, lex, prob));
        rule_counts[2] += 1;
      } else {
        match rhs {
          [child, prob] => {
            let prob = parse_log_prob(prob, line_no)?;
            let child = nonterminals.intern(child);
            productions.push(Production::unary(parent, child, prob));
            rule_counts[1] += 1;
          }
          [left, right, prob] => {
            let prob = parse_log_prob(prob, line_no)?;
            let left = nonterminals.intern(left);
            let right = nonterminals.intern(right);
            productions.push(Production::binary(parent, left, right, prob));
            rule_counts[0] += 1;
          }
          _ => return Err(format!("line {}: malformed rule {:?}", line_no, line).into()),
        }
      }
    }

    if !in_lexicon {
      return Err(format!("grammar missing {:?} delimiter", LEXICON_DELIMITER).into());
    }
    if let Some(expected) = counts {
      if expected != rule_counts {
        return Err(
          format!(
            "header declares {:?} binary/unary/lexical rules, found {:?}",
            expected, rule_counts
          )
          .into(),
        );
      }
    }

    Grammar::new(nonterminals, lexicon, start, binarization, &productions)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::matrix::{BinaryRuleLayout, RuleMatrix};

  pub const TOY_GRAMMAR: &str = r#"
start=S binarization=right
S -> NP VP 0.000000
NP -> D N -0.500000
===== LEXICON =====
D -> the 0.000000
N -> dog 0.000000
VP -> barks -1.000000
"#;

  #[test]
  fn test_parse_toy_grammar() {
    let g: Grammar = TOY_GRAMMAR.parse().unwrap();
    assert_eq!(g.start(), 0);
    assert_eq!(g.nonterminals().symbol(0), "S");
    assert_eq!(g.num_nonterminals(), 5);
    assert_eq!(g.num_lexemes(), 3);

    let np = g.nonterminals().index_of("NP").unwrap();
    let vp = g.nonterminals().index_of("VP").unwrap();
    assert_eq!(g.binary_log_prob(0, g.packing().pack(np, vp)), 0.0);
    let barks = g.lexicon().index_of("barks").unwrap();
    assert_eq!(g.lexical_log_prob(vp, barks), -1.0);
  }

  #[test]
  fn test_display_round_trips() {
    let g: Grammar = TOY_GRAMMAR.parse().unwrap();
    let g2: Grammar = g.to_string().parse().unwrap();
    assert_eq!(g2.to_string(), g.to_string());
    assert_eq!(g2.num_nonterminals(), g.num_nonterminals());
    assert_eq!(g2.binarization(), g.binarization());
  }

  #[test]
  fn test_header_counts_checked() {
    let src = "start=S nBinary=2 nUnary=0 nLex=1\nS -> A B -1.0\n===== LEXICON =====\nA -> a 0.0\n";
    assert!(src.parse::<Grammar>().is_err());

    let ok = "start=S nBinary=1 nUnary=0 nLex=1\nS -> A B -1.0\n===== LEXICON =====\nA -> a 0.0\n";
    assert!(ok.parse::<Grammar>().is_ok());
  }

  #[test]
  fn test_malformed_grammars_are_fatal() {
    // no header
    assert!("".parse::<Grammar>().is_err());
    // missing start
    assert!("binarization=left\n===== LEXICON =====\n".parse::<Grammar>().is_err());
    // unparseable rule line
    assert!("start=S\nS NP VP -1.0\n===== LEXICON =====\n".parse::<Grammar>().is_err());
    // positive probability
    assert!("start=S\nS -> A B 0.5\n===== LEXICON =====\n".parse::<Grammar>().is_err());
    // missing delimiter
    assert!("start=S\nS -> A B -0.5\n".parse::<Grammar>().is_err());
  }

  #[test]
  fn test_factored_symbols_recognized() {
    let src = "start=S\nS -> NP @NP -0.1\n@NP -> NP NP -0.2\n===== LEXICON =====\nNP -> dog -0.3\n";
    let g: Grammar = src.parse().unwrap();
    let at_np = g.nonterminals().index_of("@NP").unwrap();
    assert!(g.is_factored(at_np));
    assert_eq!(g.factored_csc().num_rules(), 1);
  }
}
