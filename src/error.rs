//! Shared error utilities used across the compilation pipeline.
//!
//! Diagnostics are kept lightweight on purpose – lexer and parser errors
//! quote the offending source line and point at the offending byte with a
//! caret. `Fault` is different in kind: it marks an internal contract
//! violation between pipeline stages and never describes bad user input.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  /// A character sequence that is neither a keyword, an identifier nor an
  /// integer literal.
  #[snafu(display("{source_line}\n{marker} {message}"))]
  Lex {
    source_line: String,
    marker: String,
    message: String,
  },

  /// A grammar or declaration-order violation found while parsing.
  #[snafu(display("{source_line}\n{marker} {message}"))]
  Parse {
    source_line: String,
    marker: String,
    message: String,
  },

  /// Internal inconsistency: the parser let something through that the
  /// generator cannot handle. Indicates a compiler defect, not a user error.
  #[snafu(display("internal fault: {message}"))]
  Fault { message: String },
}

impl CompileError {
  /// Construct a lexical error anchored at a byte offset in the source.
  pub fn lex_at(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (source_line, marker) = anchor(source, loc);
    Self::Lex {
      source_line,
      marker,
      message: message.into(),
    }
  }

  /// Construct a parse error anchored at a byte offset in the source.
  pub fn parse_at(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (source_line, marker) = anchor(source, loc);
    Self::Parse {
      source_line,
      marker,
      message: message.into(),
    }
  }

  pub fn fault(message: impl Into<String>) -> Self {
    Self::Fault {
      message: message.into(),
    }
  }
}

/// Quote the line containing `loc` and build a caret marker below it.
fn anchor(source: &str, loc: usize) -> (String, String) {
  let safe_loc = loc.min(source.len());
  let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
  let line_end = source[safe_loc..]
    .find('\n')
    .map_or(source.len(), |i| safe_loc + i);
  let line = &source[line_start..line_end];
  let column = source[line_start..safe_loc].chars().count() + 1; // account for opening quote
  let marker = format!("{}^", " ".repeat(column));
  (format!("'{line}'"), marker)
}
