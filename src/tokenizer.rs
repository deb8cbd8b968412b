//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer is a single left-to-right scan over the bytes of the
//! source. Characters that belong to multi-character tokens (keywords,
//! identifiers, integer literals) accumulate in a buffer; any separator or
//! operator character flushes the buffer first, then emits its own token.
//! Comments run from `/>` to the end of the line. The scan is total – every
//! byte is consumed – and an unclassifiable buffer aborts the compilation
//! with a located `Lex` error rather than producing partial output.

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Exit,
  Int,
  EndOfStatement,
  OpenParen,
  CloseParen,
  OpenBrace,
  CloseBrace,
  Multiply,
  Percent,
  Plus,
  Minus,
  Equal,
  LessThan,
  GreaterThan,
  Assign,
  Identifier,
  For,
  If,
  Else,
  Let,
  Define,
  While,
  Return,
  Error,
}

impl TokenKind {
  /// Fixed spelling of the kind, used in diagnostics and token dumps.
  pub fn spelling(self) -> &'static str {
    match self {
      TokenKind::Exit => "exit",
      TokenKind::Int => "integer",
      TokenKind::EndOfStatement => ";",
      TokenKind::OpenParen => "(",
      TokenKind::CloseParen => ")",
      TokenKind::OpenBrace => "{",
      TokenKind::CloseBrace => "}",
      TokenKind::Multiply => "*",
      TokenKind::Percent => "%",
      TokenKind::Plus => "+",
      TokenKind::Minus => "-",
      TokenKind::Equal => "==",
      TokenKind::LessThan => "<",
      TokenKind::GreaterThan => ">",
      TokenKind::Assign => "=",
      TokenKind::Identifier => "identifier",
      TokenKind::For => "for",
      TokenKind::If => "if",
      TokenKind::Else => "else",
      TokenKind::Let => "let",
      TokenKind::Define => "define",
      TokenKind::While => "while",
      TokenKind::Return => "return",
      TokenKind::Error => "error",
    }
  }
}

impl std::fmt::Display for TokenKind {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.write_str(self.spelling())
  }
}

/// A classified lexical unit with an optional literal payload and the byte
/// range it came from (kept for diagnostics in later stages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: Option<String>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize, text: Option<String>) -> Self {
    Self {
      kind,
      text,
      loc,
      len,
    }
  }

  /// Human-friendly description used in diagnostics: the literal payload for
  /// integers and identifiers, the fixed spelling otherwise.
  pub fn describe(&self) -> &str {
    match self.text {
      Some(ref text) => text,
      None => self.kind.spelling(),
    }
  }
}

/// Lex the input into a flat vector of tokens.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let bytes = input.as_bytes();
  let mut tokens = Vec::new();
  let mut buffer = String::new();
  let mut buffer_start = 0;
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];

    // Comments run from `/>` to the end of the line.
    if c == b'/' && bytes.get(i + 1) == Some(&b'>') {
      flush(&mut tokens, &mut buffer, buffer_start, input)?;
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
      }
      continue;
    }

    // Whitespace, the statement terminator and the argument separator all
    // end the current buffer; only `;` emits a token of its own.
    if c.is_ascii_whitespace() || c == b';' || c == b',' {
      flush(&mut tokens, &mut buffer, buffer_start, input)?;
      if c == b';' {
        tokens.push(Token::new(TokenKind::EndOfStatement, i, 1, None));
      }
      i += 1;
      continue;
    }

    // `=` needs one character of lookahead to tell `==` from `=`.
    if c == b'=' {
      flush(&mut tokens, &mut buffer, buffer_start, input)?;
      if bytes.get(i + 1) == Some(&b'=') {
        tokens.push(Token::new(TokenKind::Equal, i, 2, Some("==".to_string())));
        i += 2;
      } else {
        tokens.push(Token::new(TokenKind::Assign, i, 1, Some("=".to_string())));
        i += 1;
      }
      continue;
    }

    if let Some(kind) = punctuator_kind(c) {
      flush(&mut tokens, &mut buffer, buffer_start, input)?;
      let text = (c as char).to_string();
      tokens.push(Token::new(kind, i, 1, Some(text)));
      i += 1;
      continue;
    }

    if buffer.is_empty() {
      buffer_start = i;
    }
    buffer.push(c as char);
    i += 1;
  }

  flush(&mut tokens, &mut buffer, buffer_start, input)?;
  Ok(tokens)
}

/// Single-character operators and punctuation emitted without lookahead.
fn punctuator_kind(c: u8) -> Option<TokenKind> {
  match c {
    b'+' => Some(TokenKind::Plus),
    b'-' => Some(TokenKind::Minus),
    b'*' => Some(TokenKind::Multiply),
    b'%' => Some(TokenKind::Percent),
    b'<' => Some(TokenKind::LessThan),
    b'>' => Some(TokenKind::GreaterThan),
    b'(' => Some(TokenKind::OpenParen),
    b')' => Some(TokenKind::CloseParen),
    b'{' => Some(TokenKind::OpenBrace),
    b'}' => Some(TokenKind::CloseBrace),
    _ => None,
  }
}

/// Classify the accumulated buffer and append the resulting token. An
/// `Error` classification aborts the scan with a located diagnostic.
fn flush(
  tokens: &mut Vec<Token>,
  buffer: &mut String,
  start: usize,
  source: &str,
) -> CompileResult<()> {
  if buffer.is_empty() {
    return Ok(());
  }
  let (kind, text) = classify(buffer);
  if kind == TokenKind::Error {
    let message = if buffer.starts_with(|c: char| c.is_ascii_digit()) {
      format!("invalid integer \"{buffer}\"")
    } else {
      format!("unrecognized token \"{buffer}\"")
    };
    return Err(CompileError::lex_at(source, start, message));
  }
  tokens.push(Token::new(kind, start, buffer.len(), text));
  buffer.clear();
  Ok(())
}

/// Decide what a flushed buffer is: an integer if it is all digits, a
/// keyword on an exact match, an identifier if it fits the identifier
/// character set, and `Error` otherwise.
fn classify(buffer: &str) -> (TokenKind, Option<String>) {
  if buffer.starts_with(|c: char| c.is_ascii_digit()) {
    if buffer.bytes().all(|b| b.is_ascii_digit()) {
      return (TokenKind::Int, Some(buffer.to_string()));
    }
    return (TokenKind::Error, None);
  }
  let keyword = match buffer {
    "exit" => Some(TokenKind::Exit),
    "let" => Some(TokenKind::Let),
    "if" => Some(TokenKind::If),
    "else" => Some(TokenKind::Else),
    "while" => Some(TokenKind::While),
    "for" => Some(TokenKind::For),
    "define" => Some(TokenKind::Define),
    "return" => Some(TokenKind::Return),
    _ => None,
  };
  if let Some(kind) = keyword {
    return (kind, None);
  }
  if is_identifier(buffer) {
    return (TokenKind::Identifier, Some(buffer.to_string()));
  }
  (TokenKind::Error, None)
}

fn is_identifier(buffer: &str) -> bool {
  let mut chars = buffer.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source)
      .expect("test source should lex")
      .into_iter()
      .map(|t| t.kind)
      .collect()
  }

  #[test]
  fn exit_statement() {
    use TokenKind::*;
    assert_eq!(kinds("exit 42;"), vec![Exit, Int, EndOfStatement]);
  }

  #[test]
  fn integer_carries_its_text() {
    let tokens = tokenize("exit 42;").unwrap();
    assert_eq!(tokens[1].text.as_deref(), Some("42"));
    assert_eq!(tokens[1].loc, 5);
    assert_eq!(tokens[1].len, 2);
  }

  #[test]
  fn keywords_and_identifiers() {
    use TokenKind::*;
    let tokens = tokenize("let counter = 0;").unwrap();
    assert_eq!(
      tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
      vec![Let, Identifier, Assign, Int, EndOfStatement]
    );
    assert_eq!(tokens[1].text.as_deref(), Some("counter"));
  }

  #[test]
  fn assign_versus_equality_lookahead() {
    use TokenKind::*;
    assert_eq!(
      kinds("a = b == c;"),
      vec![Identifier, Assign, Identifier, Equal, Identifier, EndOfStatement]
    );
  }

  #[test]
  fn operator_flushes_buffer_without_spaces() {
    use TokenKind::*;
    assert_eq!(kinds("1+2*3"), vec![Int, Plus, Int, Multiply, Int]);
  }

  #[test]
  fn comment_runs_to_end_of_line() {
    use TokenKind::*;
    assert_eq!(
      kinds("exit 1; /> trailing words + * }\nexit 2;"),
      vec![Exit, Int, EndOfStatement, Exit, Int, EndOfStatement]
    );
  }

  #[test]
  fn comma_separates_without_a_token() {
    use TokenKind::*;
    assert_eq!(
      kinds("add(2, 3)"),
      vec![Identifier, OpenParen, Int, Int, CloseParen]
    );
  }

  #[test]
  fn braces_and_control_keywords() {
    use TokenKind::*;
    assert_eq!(
      kinds("while (i < 3) { i = i + 1; }"),
      vec![
        While,
        OpenParen,
        Identifier,
        LessThan,
        Int,
        CloseParen,
        OpenBrace,
        Identifier,
        Assign,
        Identifier,
        Plus,
        Int,
        EndOfStatement,
        CloseBrace,
      ]
    );
  }

  #[test]
  fn invalid_integer_is_a_lex_error() {
    let err = tokenize("let x = 12ab;").unwrap_err();
    assert!(format!("{err}").contains("invalid integer \"12ab\""));
  }

  #[test]
  fn unrecognized_sequence_is_a_lex_error() {
    let err = tokenize("let x = a@b;").unwrap_err();
    assert!(format!("{err}").contains("unrecognized token \"a@b\""));
  }

  #[test]
  fn underscore_leading_identifier() {
    let tokens = tokenize("_tmp").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Identifier);
    assert_eq!(tokens[0].text.as_deref(), Some("_tmp"));
  }

  #[test]
  fn spellings_round_trip_modulo_whitespace() {
    let source = "exit   7 ;\nexit 42 ;";
    let rendered = tokenize(source)
      .unwrap()
      .iter()
      .map(Token::describe)
      .collect::<Vec<_>>()
      .join(" ");
    let normalized = source.split_whitespace().collect::<Vec<_>>().join(" ");
    assert_eq!(rendered, normalized);
    assert_eq!(rendered, "exit 7 ; exit 42 ;");
  }
}
