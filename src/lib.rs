//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` performs lexical analysis and produces a flat token vector.
//! - `parser` owns all syntactic knowledge, checks declaration order, and
//!   builds the AST.
//! - `codegen` lowers the AST into x86-64 AT&T assembly.
//! - `error` centralises the diagnostics shared by the other modules.

pub mod ast;
pub mod error;
pub mod parser;
pub mod tokenizer;

mod codegen;

pub use error::{CompileError, CompileResult};

/// Compile a source string into AT&T assembly, ready to assemble and link
/// with no runtime (the output carries its own `_start`).
pub fn compile(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  log::debug!("lexed {} tokens", tokens.len());
  for token in &tokens {
    log::trace!("token {:?} \"{}\" at byte {}", token.kind, token.describe(), token.loc);
  }
  let program = parser::parse(tokens, source)?;
  log::trace!("parsed program:\n{}", program.visualize());
  codegen::generate(&program)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_source_compiles_to_a_bare_entry_point() {
    let asm = compile("").expect("empty program should compile");
    assert!(asm.contains("main:\n"));
    assert!(asm.contains("_start:\n"));
  }

  #[test]
  fn lex_errors_surface_through_compile() {
    assert!(compile("let x = 1$2;").is_err());
  }

  #[test]
  fn parse_errors_surface_through_compile() {
    assert!(compile("exit y;").is_err());
  }
}
