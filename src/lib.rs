//! A sparse-matrix PCFG chart parser. The grammar's binary rules live in
//! compressed sparse matrices over a packed child-pair key space; parsing a
//! sentence is a bottom-up sweep where each chart cell takes the
//! cross-product of its children's probabilities over all split points and
//! pushes it through a sparse matrix-vector product, with per-cell beam
//! pruning and pluggable open/closed cell constraints.

#[macro_use]
extern crate lazy_static;

pub mod cell_selector;
pub mod chart;
pub mod cross;
pub mod grammar;
pub mod matrix;
pub mod pack;
pub mod parse_grammar;
pub mod parser;
pub mod spmv;
pub mod syntree;
pub mod vocab;

pub use crate::cell_selector::{BeamWidthOracle, CellSelector, ConstraintLink};
pub use crate::chart::Chart;
pub use crate::grammar::{Binarization, Grammar, Production};
pub use crate::matrix::{RuleMatrix, LOG_ZERO};
pub use crate::pack::PackingFunction;
pub use crate::parser::{
  parse_batch, BatchContext, ParseOutcome, ParseResult, Parser, ParserOptions,
};
pub use crate::syntree::SynTree;
pub use crate::vocab::SymbolTable;

pub type Err = Box<dyn std::error::Error + 'static>;
