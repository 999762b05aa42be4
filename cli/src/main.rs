use std::env;
use std::fs;
use std::io;
use std::io::Write;
use std::process;

use tracing_subscriber::EnvFilter;

use spanbeam::parser::ParseStats;
use spanbeam::{parse_batch, Err, Grammar, Parser, ParserOptions};

fn usage(prog_name: &str) -> String {
  format!(
    r"Usage: {} GRAMMAR [options]

Reads sentences from stdin (one per line) and prints the best parse of each,
or `()` when the sentence has no parse.

Options:
  -h, --help            Print this message
  -b, --beam N          Beam width for cells above the lexical row
                        (default 0 = exhaustive)
  -l, --lex-beam N      Beam width for the lexical row (default 0)
  -m, --max-length N    Skip sentences longer than N tokens (default 250)
  -s, --stats           Print per-sentence statistics to stderr
  -f, --file FILE       Parse every line of FILE in parallel instead of
                        reading stdin",
    prog_name
  )
}

struct Args {
  grammar_path: String,
  options: ParserOptions,
  print_stats: bool,
  batch_file: Option<String>,
}

impl Args {
  fn make_error_message(msg: &str, prog_name: impl AsRef<str>) -> String {
    format!("argument error: {}.\n\n{}", msg, usage(prog_name.as_ref()))
  }

  fn parse(v: Vec<String>) -> Result<Self, String> {
    if v.is_empty() {
      return Err(Self::make_error_message("bad argument vector", "spanbeam"));
    }

    let args_len = v.len();
    let mut iter = v.into_iter();
    let prog_name = iter.next().unwrap();

    if args_len < 2 {
      return Err(Self::make_error_message("not enough arguments", prog_name));
    }

    let mut grammar_path: Option<String> = None;
    let mut options = ParserOptions::default();
    let mut print_stats = false;
    let mut batch_file: Option<String> = None;

    let numeric = |iter: &mut dyn Iterator<Item = String>, flag: &str| {
      iter
        .next()
        .ok_or_else(|| format!("{} takes a value", flag))?
        .parse::<usize>()
        .map_err(|e| format!("bad value for {}: {}", flag, e))
    };

    while let Some(o) = iter.next() {
      if o == "-h" || o == "--help" {
        println!("{}", usage(&prog_name));
        process::exit(0);
      } else if o == "-b" || o == "--beam" {
        options.beam_width = numeric(&mut iter, &o)
          .map_err(|msg| Self::make_error_message(&msg, &prog_name))?;
      } else if o == "-l" || o == "--lex-beam" {
        options.lexical_row_beam_width = numeric(&mut iter, &o)
          .map_err(|msg| Self::make_error_message(&msg, &prog_name))?;
      } else if o == "-m" || o == "--max-length" {
        options.max_length = numeric(&mut iter, &o)
          .map_err(|msg| Self::make_error_message(&msg, &prog_name))?;
      } else if o == "-s" || o == "--stats" {
        print_stats = true;
      } else if o == "-f" || o == "--file" {
        batch_file = Some(
          iter
            .next()
            .ok_or_else(|| Self::make_error_message("--file takes a value", &prog_name))?,
        );
      } else if grammar_path.is_none() {
        grammar_path = Some(o);
      } else {
        return Err(Self::make_error_message("invalid arguments", prog_name));
      }
    }

    if let Some(grammar_path) = grammar_path {
      Ok(Self {
        grammar_path,
        options,
        print_stats,
        batch_file,
      })
    } else {
      Err(Self::make_error_message("missing grammar file", prog_name))
    }
  }
}

fn run_batch(g: &Grammar, opts: &Args, path: &str) -> Result<(), Err> {
  let source = fs::read_to_string(path)?;
  let sentences: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();

  let (results, context) = parse_batch(g, opts.options, &sentences);

  if opts.print_stats {
    eprintln!("{}", ParseStats::header());
  }
  for result in &results {
    println!("{}", result.bracketing());
    if opts.print_stats {
      eprintln!("{}", result.stats);
    }
  }
  eprintln!("{}", context);
  Ok(())
}

fn run_repl(g: &Grammar, opts: &Args) -> Result<(), Err> {
  let mut parser = Parser::new(g, opts.options);

  let mut input = String::new();
  loop {
    print!("> ");
    io::stdout().flush()?;

    match io::stdin().read_line(&mut input) {
      Ok(_) => {
        if input.is_empty() {
          // ctrl+d
          return Ok(());
        }
        let result = parser.parse_sentence(input.trim());
        println!("{}", result.bracketing());
        println!("inside log-prob: {}", result.inside_log_prob);
        if opts.print_stats {
          eprintln!("{}\n{}", ParseStats::header(), result.stats);
        }
        input.clear();
      }
      Err(error) => return Err(error.into()),
    }
  }
}

fn main() -> Result<(), Err> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  let opts = match Args::parse(env::args().collect()) {
    Ok(opts) => opts,
    Err(msg) => {
      eprintln!("{}", msg);
      process::exit(255);
    }
  };

  let g = Grammar::read_from_file(&opts.grammar_path)?;

  match &opts.batch_file {
    Some(path) => run_batch(&g, &opts, path),
    None => run_repl(&g, &opts),
  }
}
